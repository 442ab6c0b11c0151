//! Connector registry.
//!
//! Owns every live [`DatabasePlugin`] in the process, keyed by
//! `engine:config-id`. Engines are dispatched through a factory table, so
//! adding an engine is a [`register_engine`](ConnectorRegistry::register_engine)
//! call and never touches the registry itself.
//!
//! ```text
//!              get_or_create(config)
//!                       │
//!            ┌──────────▼──────────┐   miss   ┌──────────────────┐
//!            │ live: key → plugin  │─────────▶│ factories[engine]│
//!            └──────────┬──────────┘          └────────┬─────────┘
//!                  hit  │        insert under the lock  │
//!                       ▼◀──────────────────────────────┘
//!               Arc<dyn DatabasePlugin>
//! ```
//!
//! Lookup, construction, and insertion happen under one lock, so concurrent
//! callers asking for the same key always get the same instance. A cached
//! plugin is returned even if its connection has gone stale; reconnecting
//! is the plugin's job.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{DataSourceConfig, EngineType};
use crate::plugin::{DatabasePlugin, PluginError};
use crate::plugin_postgres::PostgresPlugin;
use crate::plugin_sqlite::SqlitePlugin;

/// Builds a plugin for one data-source config. Must not perform I/O.
pub type PluginFactory = Arc<dyn Fn(&DataSourceConfig) -> Arc<dyn DatabasePlugin> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unsupported database engine: {0}")]
    UnsupportedEngine(EngineType),

    #[error("connection failed for {key}: {source}")]
    ConnectionFailed {
        key: String,
        #[source]
        source: PluginError,
    },
}

pub struct ConnectorRegistry {
    factories: HashMap<EngineType, PluginFactory>,
    live: Mutex<HashMap<String, Arc<dyn DatabasePlugin>>>,
}

impl ConnectorRegistry {
    /// A registry with no engines registered.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// A registry with the built-in PostgreSQL and SQLite engines.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_engine(EngineType::Postgresql, |config| {
            Arc::new(PostgresPlugin::new(config))
        });
        registry.register_engine(EngineType::Sqlite, |config| Arc::new(SqlitePlugin::new(config)));
        registry
    }

    /// Register (or replace) the factory for an engine.
    pub fn register_engine<F>(&mut self, engine: EngineType, factory: F)
    where
        F: Fn(&DataSourceConfig) -> Arc<dyn DatabasePlugin> + Send + Sync + 'static,
    {
        self.factories.insert(engine, Arc::new(factory));
    }

    /// Registered engines, in a stable order.
    pub fn engines(&self) -> Vec<EngineType> {
        let mut engines: Vec<_> = self.factories.keys().copied().collect();
        engines.sort_by_key(|e| e.as_str());
        engines
    }

    /// The cached connector for `config`, creating one if absent.
    pub fn get_or_create(
        &self,
        config: &DataSourceConfig,
    ) -> Result<Arc<dyn DatabasePlugin>, RegistryError> {
        let key = config.connector_key();
        let mut live = self.live.lock();
        if let Some(existing) = live.get(&key) {
            debug!(%key, "reusing connector");
            return Ok(Arc::clone(existing));
        }
        let factory = self
            .factories
            .get(&config.engine())
            .ok_or(RegistryError::UnsupportedEngine(config.engine()))?;
        let plugin = factory(config);
        live.insert(key.clone(), Arc::clone(&plugin));
        info!(%key, "created connector");
        Ok(plugin)
    }

    /// The cached connector for `config`, without creating one.
    pub fn get(&self, config: &DataSourceConfig) -> Option<Arc<dyn DatabasePlugin>> {
        self.live.lock().get(&config.connector_key()).cloned()
    }

    /// Obtain the connector for `config` and run its connection test.
    pub async fn test_connection(&self, config: &DataSourceConfig) -> Result<String, RegistryError> {
        let plugin = self.get_or_create(config)?;
        plugin
            .test_connection()
            .await
            .map_err(|source| RegistryError::ConnectionFailed {
                key: config.connector_key(),
                source,
            })
    }

    /// Evict and tear down the connector for `config`. Returns whether one
    /// was cached.
    pub async fn disconnect(&self, config: &DataSourceConfig) -> bool {
        let key = config.connector_key();
        let removed = self.live.lock().remove(&key);
        match removed {
            Some(plugin) => {
                plugin.disconnect().await;
                info!(%key, "evicted connector");
                true
            }
            None => false,
        }
    }

    /// Tear down every connector concurrently, then evict them. Returns how
    /// many were torn down. Connectors created while teardown is running
    /// are left in place.
    pub async fn disconnect_all(&self) -> usize {
        let snapshot: Vec<(String, Arc<dyn DatabasePlugin>)> = self
            .live
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        join_all(snapshot.iter().map(|(key, plugin)| async move {
            plugin.disconnect().await;
            debug!(%key, "connector torn down");
        }))
        .await;

        self.live.lock().retain(|key, plugin| {
            !snapshot
                .iter()
                .any(|(k, p)| k == key && Arc::ptr_eq(p, plugin))
        });
        info!(count = snapshot.len(), "evicted all connectors");
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
