//! Data-source lifecycle over a JSON file store.

use std::path::Path;
use std::sync::Arc;

use db_index::config_store::{ConfigStore, JsonFileStore};
use db_index::models::DataSourceDraft;
use db_index::registry::ConnectorRegistry;
use db_index::sources::{SourceError, SourceService};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use tempfile::TempDir;

async fn touch_db(path: &Path) {
    let conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .connect()
        .await
        .unwrap();
    conn.close().await.unwrap();
}

fn service(tmp: &TempDir) -> (SourceService, Arc<JsonFileStore>, Arc<ConnectorRegistry>) {
    let store = Arc::new(JsonFileStore::new(tmp.path().join("data/sources.json")));
    let registry = Arc::new(ConnectorRegistry::with_builtins());
    let service = SourceService::new(store.clone(), Arc::clone(&registry));
    (service, store, registry)
}

fn db_path(tmp: &TempDir, name: &str) -> String {
    tmp.path().join(name).to_string_lossy().to_string()
}

#[tokio::test]
async fn create_tests_then_persists() {
    let tmp = TempDir::new().unwrap();
    touch_db(&tmp.path().join("a.db")).await;
    let (service, store, _) = service(&tmp);

    let created = service
        .create(DataSourceDraft::sqlite("alpha", db_path(&tmp, "a.db")))
        .await
        .unwrap();
    assert!(created.id.starts_with("db_"));

    let stored = store.list().unwrap();
    assert_eq!(stored, vec![created.clone()]);
    assert_eq!(service.resolve("alpha").unwrap().id, created.id);
    assert_eq!(service.resolve(&created.id).unwrap(), created);
}

#[tokio::test]
async fn failed_connection_is_not_persisted() {
    let tmp = TempDir::new().unwrap();
    let (service, store, registry) = service(&tmp);

    let err = service
        .create(DataSourceDraft::sqlite("ghost", db_path(&tmp, "missing/none.db")))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Registry(_)), "{err}");
    assert!(store.list().unwrap().is_empty());
    assert!(registry.is_empty(), "failed candidate must be evicted");
}

#[tokio::test]
async fn invalid_draft_is_rejected_before_connecting() {
    let tmp = TempDir::new().unwrap();
    let (service, store, registry) = service(&tmp);

    let err = service
        .create(DataSourceDraft::sqlite("  ", db_path(&tmp, "a.db")))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::InvalidConfig(_)));
    assert!(store.list().unwrap().is_empty());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn update_keeps_identity_and_replaces_connector() {
    let tmp = TempDir::new().unwrap();
    touch_db(&tmp.path().join("a.db")).await;
    touch_db(&tmp.path().join("b.db")).await;
    let (service, _, registry) = service(&tmp);

    let created = service
        .create(DataSourceDraft::sqlite("alpha", db_path(&tmp, "a.db")))
        .await
        .unwrap();
    let before = registry.get_or_create(&created).unwrap();

    let updated = service
        .update(&created.id, DataSourceDraft::sqlite("beta", db_path(&tmp, "b.db")))
        .await
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.created_at, created.created_at);
    assert_eq!(updated.settings.name, "beta");

    let after = registry.get_or_create(&updated).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(matches!(
        service.resolve("alpha"),
        Err(SourceError::NotFound(_))
    ));
}

#[tokio::test]
async fn update_with_bad_settings_keeps_old_config() {
    let tmp = TempDir::new().unwrap();
    touch_db(&tmp.path().join("a.db")).await;
    let (service, _, _) = service(&tmp);

    let created = service
        .create(DataSourceDraft::sqlite("alpha", db_path(&tmp, "a.db")))
        .await
        .unwrap();
    assert!(service
        .update(&created.id, DataSourceDraft::sqlite("alpha", db_path(&tmp, "nope/x.db")))
        .await
        .is_err());
    assert_eq!(service.get(&created.id).unwrap(), created);
}

#[tokio::test]
async fn delete_tears_down_and_removes() {
    let tmp = TempDir::new().unwrap();
    touch_db(&tmp.path().join("a.db")).await;
    let (service, store, registry) = service(&tmp);

    let created = service
        .create(DataSourceDraft::sqlite("alpha", db_path(&tmp, "a.db")))
        .await
        .unwrap();
    let report = service.test("alpha").await.unwrap();
    assert!(report.success);
    assert!(registry.get(&created).is_some());

    service.delete(&created.id).await.unwrap();
    assert!(store.list().unwrap().is_empty());
    assert!(registry.get(&created).is_none());
    assert!(matches!(
        service.delete(&created.id).await,
        Err(SourceError::NotFound(_))
    ));
}

#[tokio::test]
async fn duplicate_names_need_an_id() {
    let tmp = TempDir::new().unwrap();
    touch_db(&tmp.path().join("a.db")).await;
    let (service, _, _) = service(&tmp);

    for _ in 0..2 {
        service
            .create(DataSourceDraft::sqlite("same", db_path(&tmp, "a.db")))
            .await
            .unwrap();
    }
    assert!(matches!(
        service.resolve("same"),
        Err(SourceError::Ambiguous(_))
    ));
}

#[tokio::test]
async fn zero_timeout_is_rejected_before_saving() {
    let tmp = TempDir::new().unwrap();
    touch_db(&tmp.path().join("a.db")).await;
    let (service, store, registry) = service(&tmp);

    let mut draft = DataSourceDraft::sqlite("alpha", db_path(&tmp, "a.db"));
    draft.connection_timeout = 0;
    let err = service.create(draft).await.unwrap_err();
    assert!(matches!(err, SourceError::InvalidConfig(_)), "{err}");
    assert!(store.list().unwrap().is_empty());
    assert!(registry.is_empty());
}
