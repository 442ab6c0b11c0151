//! Persistence for data-source configs.
//!
//! The store is a plain list: [`get`](ConfigStore::get), [`list`](ConfigStore::list)
//! and a whole-list [`put`](ConfigStore::put). [`JsonFileStore`] keeps the
//! list in one pretty-printed JSON file, written atomically via a temp file
//! and rename. [`MemoryConfigStore`] backs tests.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};

use crate::models::DataSourceConfig;

pub trait ConfigStore: Send + Sync {
    fn list(&self) -> Result<Vec<DataSourceConfig>>;

    /// Replace the stored list.
    fn put(&self, configs: &[DataSourceConfig]) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<DataSourceConfig>> {
        Ok(self.list()?.into_iter().find(|c| c.id == id))
    }
}

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonFileStore {
    fn list(&self) -> Result<Vec<DataSourceConfig>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read source store: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse source store: {}", self.path.display()))
    }

    fn put(&self, configs: &[DataSourceConfig]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(configs)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write source store: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace source store: {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    configs: RwLock<Vec<DataSourceConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn list(&self) -> Result<Vec<DataSourceConfig>> {
        Ok(self.configs.read().clone())
    }

    fn put(&self, configs: &[DataSourceConfig]) -> Result<()> {
        *self.configs.write() = configs.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DataSourceDraft;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path().join("sources.json"));
        assert!(store.list().unwrap().is_empty());
        assert!(store.get("db_x").unwrap().is_none());
    }

    #[test]
    fn file_round_trip_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path().join("nested/dir/sources.json"));
        let a = DataSourceConfig::create(DataSourceDraft::sqlite("a", "/tmp/a.db"));
        let b = DataSourceConfig::create(DataSourceDraft::sqlite("b", "/tmp/b.db"));
        store.put(&[a.clone(), b.clone()]).unwrap();

        let reopened = JsonFileStore::new(store.path());
        assert_eq!(reopened.list().unwrap(), vec![a, b.clone()]);
        assert_eq!(reopened.get(&b.id).unwrap(), Some(b));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sources.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JsonFileStore::new(&path).list().unwrap_err();
        assert!(err.to_string().contains("Failed to parse source store"));
    }

    #[test]
    fn memory_store_replaces_list() {
        let store = MemoryConfigStore::new();
        let a = DataSourceConfig::create(DataSourceDraft::sqlite("a", "/tmp/a.db"));
        store.put(std::slice::from_ref(&a)).unwrap();
        store.put(&[]).unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
