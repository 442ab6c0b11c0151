//! Application configuration.
//!
//! Loaded from a TOML file (default `./config/dbi.toml`):
//!
//! ```toml
//! [store]
//! path = "./data/sources.json"
//!
//! [search]
//! api_key = "xyz"
//! connection_timeout_secs = 2
//! [[search.nodes]]
//! host = "localhost"
//! port = 8108
//! protocol = "http"
//!
//! [import]
//! id_column = "id"
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    #[serde(default)]
    pub nodes: Vec<SearchNode>,
}

fn default_connection_timeout() -> u64 {
    2
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SearchNode {
    pub host: String,
    #[serde(default = "default_search_port")]
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_search_port() -> u16 {
    8108
}
fn default_protocol() -> String {
    "http".to_string()
}

impl SearchNode {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_id_column")]
    pub id_column: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            id_column: default_id_column(),
        }
    }
}

fn default_id_column() -> String {
    "id".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    /// In-process defaults for commands that run without a config file.
    pub fn minimal() -> Self {
        Self {
            store: StoreConfig {
                path: PathBuf::from("./data/sources.json"),
            },
            search: SearchConfig {
                api_key: String::new(),
                connection_timeout_secs: default_connection_timeout(),
                nodes: vec![SearchNode {
                    host: "localhost".to_string(),
                    port: default_search_port(),
                    protocol: default_protocol(),
                }],
            },
            import: ImportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    if config.search.nodes.is_empty() {
        anyhow::bail!("search.nodes must contain at least one node");
    }
    for node in &config.search.nodes {
        if node.host.trim().is_empty() {
            anyhow::bail!("search.nodes[].host must not be empty");
        }
        if node.port == 0 {
            anyhow::bail!("search.nodes[].port must be > 0 (node '{}')", node.host);
        }
        match node.protocol.as_str() {
            "http" | "https" => {}
            other => anyhow::bail!(
                "Unknown search node protocol: '{}'. Must be http or https.",
                other
            ),
        }
    }
    if config.search.connection_timeout_secs == 0 {
        anyhow::bail!("search.connection_timeout_secs must be > 0");
    }
    if config.import.id_column.trim().is_empty() {
        anyhow::bail!("import.id_column must not be empty");
    }
    Ok(())
}
