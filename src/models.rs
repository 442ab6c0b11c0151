//! Data-source configuration types.
//!
//! A [`DataSourceConfig`] identifies one registered database. Its
//! [`connector_key`](DataSourceConfig::connector_key) (`engine:id`) is the
//! identity the connector registry caches live connections under.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Database engines a data source can point at. Only engines with a
/// registered plugin factory can actually be connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    Postgresql,
    Mysql,
    Mariadb,
    Sqlite,
    Mongodb,
    Redis,
}

impl EngineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Postgresql => "postgresql",
            EngineType::Mysql => "mysql",
            EngineType::Mariadb => "mariadb",
            EngineType::Sqlite => "sqlite",
            EngineType::Mongodb => "mongodb",
            EngineType::Redis => "redis",
        }
    }

    /// Conventional server port, `None` for file-based engines.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            EngineType::Postgresql => Some(5432),
            EngineType::Mysql | EngineType::Mariadb => Some(3306),
            EngineType::Mongodb => Some(27017),
            EngineType::Redis => Some(6379),
            EngineType::Sqlite => None,
        }
    }

    pub fn is_file_based(&self) -> bool {
        matches!(self, EngineType::Sqlite)
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid data source config: {0}")]
pub struct InvalidConfig(pub String);

/// Everything a caller supplies when creating or replacing a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceDraft {
    pub name: String,
    pub engine: EngineType,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<SslMode>,
    /// PostgreSQL schema, `public` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Database file for SQLite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Connection establishment timeout in seconds.
    #[serde(default = "default_timeout")]
    pub connection_timeout: u64,
}

impl DataSourceDraft {
    /// A draft for a file-based SQLite database.
    pub fn sqlite(name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine: EngineType::Sqlite,
            host: String::new(),
            port: 0,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            ssl: false,
            ssl_mode: None,
            schema: None,
            file_path: Some(file_path.into()),
            connection_timeout: default_timeout(),
        }
    }

    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.name.trim().is_empty() {
            return Err(InvalidConfig("name must not be empty".into()));
        }
        if self.connection_timeout == 0 {
            return Err(InvalidConfig("connection_timeout must be > 0".into()));
        }
        if self.engine.is_file_based() {
            if self.file_path.as_deref().map_or(true, |p| p.trim().is_empty()) {
                return Err(InvalidConfig(format!("{} requires file_path", self.engine)));
            }
            return Ok(());
        }
        if self.host.trim().is_empty() {
            return Err(InvalidConfig(format!("{} requires host", self.engine)));
        }
        if self.port == 0 {
            return Err(InvalidConfig("port must be > 0".into()));
        }
        if self.database.trim().is_empty() {
            return Err(InvalidConfig(format!("{} requires database", self.engine)));
        }
        Ok(())
    }
}

/// A registered data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// `db_` followed by 32 hex characters; never changes after creation.
    pub id: String,
    pub settings: DataSourceDraft,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSourceConfig {
    pub fn new_id() -> String {
        format!("db_{}", uuid::Uuid::new_v4().simple())
    }

    /// A fresh config with a new id and both timestamps set to now.
    pub fn create(settings: DataSourceDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Self::new_id(),
            settings,
            created_at: now,
            updated_at: now,
        }
    }

    /// The same identity with replaced settings.
    pub fn replaced(&self, settings: DataSourceDraft) -> Self {
        Self {
            id: self.id.clone(),
            settings,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    pub fn engine(&self) -> EngineType {
        self.settings.engine
    }

    /// Registry key: `engine:id`.
    pub fn connector_key(&self) -> String {
        format!("{}:{}", self.settings.engine, self.id)
    }

    /// PostgreSQL schema to introspect.
    pub fn schema_name(&self) -> &str {
        self.settings.schema.as_deref().unwrap_or("public")
    }

    /// Copy with the password masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.settings.password.is_empty() {
            copy.settings.password = "********".to_string();
        }
        copy
    }
}
