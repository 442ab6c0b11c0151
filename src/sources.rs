//! Data-source lifecycle.
//!
//! [`SourceService`] is the only writer of the config store. Every change
//! goes through the connector registry first:
//!
//! | Operation | Sequence |
//! |-----------|----------|
//! | `create` | validate → test connection → persist |
//! | `update` | validate → evict old connector → test replacement → persist |
//! | `delete` | tear down connector → remove |
//!
//! A config that fails its connection test is never persisted.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::config_store::ConfigStore;
use crate::models::{DataSourceConfig, DataSourceDraft, InvalidConfig};
use crate::plugin::{ConnectionReport, DatabasePlugin};
use crate::registry::{ConnectorRegistry, RegistryError};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("data source '{0}' not found")]
    NotFound(String),

    #[error("data source name '{0}' matches more than one source; use its id")]
    Ambiguous(String),

    #[error(transparent)]
    InvalidConfig(#[from] InvalidConfig),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("config store error: {0}")]
    Store(String),
}

impl SourceError {
    fn store(err: anyhow::Error) -> Self {
        Self::Store(format!("{err:#}"))
    }
}

pub struct SourceService {
    store: Arc<dyn ConfigStore>,
    registry: Arc<ConnectorRegistry>,
    /// Serializes read-modify-write cycles on the store.
    write_lock: Mutex<()>,
}

impl SourceService {
    pub fn new(store: Arc<dyn ConfigStore>, registry: Arc<ConnectorRegistry>) -> Self {
        Self {
            store,
            registry,
            write_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectorRegistry> {
        &self.registry
    }

    pub fn list(&self) -> Result<Vec<DataSourceConfig>, SourceError> {
        self.store.list().map_err(SourceError::store)
    }

    pub fn get(&self, id: &str) -> Result<DataSourceConfig, SourceError> {
        self.store
            .get(id)
            .map_err(SourceError::store)?
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }

    /// Look a source up by id, falling back to a unique name match.
    pub fn resolve(&self, id_or_name: &str) -> Result<DataSourceConfig, SourceError> {
        let all = self.list()?;
        if let Some(found) = all.iter().find(|c| c.id == id_or_name) {
            return Ok(found.clone());
        }
        let mut by_name = all.into_iter().filter(|c| c.settings.name == id_or_name);
        match (by_name.next(), by_name.next()) {
            (Some(found), None) => Ok(found),
            (Some(_), Some(_)) => Err(SourceError::Ambiguous(id_or_name.to_string())),
            _ => Err(SourceError::NotFound(id_or_name.to_string())),
        }
    }

    /// The live connector for a stored source.
    pub fn connector(
        &self,
        id_or_name: &str,
    ) -> Result<(DataSourceConfig, Arc<dyn DatabasePlugin>), SourceError> {
        let config = self.resolve(id_or_name)?;
        let plugin = self.registry.get_or_create(&config)?;
        Ok((config, plugin))
    }

    /// Validate, test, then persist a new source.
    pub async fn create(&self, draft: DataSourceDraft) -> Result<DataSourceConfig, SourceError> {
        draft.validate()?;
        let config = DataSourceConfig::create(draft);
        self.test_candidate(&config).await?;

        let _guard = self.write_lock.lock();
        let mut all = self.list()?;
        all.push(config.clone());
        self.store.put(&all).map_err(SourceError::store)?;
        info!(id = %config.id, name = %config.settings.name, engine = %config.engine(), "created data source");
        Ok(config)
    }

    /// Replace a source's settings, keeping its id and creation time.
    pub async fn update(
        &self,
        id: &str,
        draft: DataSourceDraft,
    ) -> Result<DataSourceConfig, SourceError> {
        draft.validate()?;
        let existing = self.get(id)?;
        let updated = existing.replaced(draft);

        // The cached connector holds the old settings.
        self.registry.disconnect(&existing).await;
        self.test_candidate(&updated).await?;

        let _guard = self.write_lock.lock();
        let mut all = self.list()?;
        let slot = all
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| SourceError::NotFound(id.to_string()))?;
        *slot = updated.clone();
        self.store.put(&all).map_err(SourceError::store)?;
        info!(id = %updated.id, "updated data source");
        Ok(updated)
    }

    /// Tear down the source's connector, then remove it from the store.
    pub async fn delete(&self, id: &str) -> Result<DataSourceConfig, SourceError> {
        let existing = self.get(id)?;
        self.registry.disconnect(&existing).await;

        let _guard = self.write_lock.lock();
        let mut all = self.list()?;
        all.retain(|c| c.id != id);
        self.store.put(&all).map_err(SourceError::store)?;
        info!(id = %existing.id, "deleted data source");
        Ok(existing)
    }

    /// Run the connection test of a stored source.
    pub async fn test(&self, id_or_name: &str) -> Result<ConnectionReport, SourceError> {
        let (config, plugin) = self.connector(id_or_name)?;
        Ok(ConnectionReport::from_result(
            config.engine(),
            plugin.test_connection().await,
        ))
    }

    async fn test_candidate(&self, config: &DataSourceConfig) -> Result<(), SourceError> {
        if let Err(e) = self.registry.test_connection(config).await {
            warn!(id = %config.id, error = %e, "connection test failed");
            self.registry.disconnect(config).await;
            return Err(e.into());
        }
        Ok(())
    }
}
