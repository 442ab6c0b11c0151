//! SQLite plugin.
//!
//! Tables and views come from `sqlite_master`; columns from
//! `PRAGMA table_info`. SQLite is dynamically typed, so query rows are
//! decoded per value by storage class:
//!
//! | Storage class | JSON |
//! |---------------|------|
//! | `NULL` | `null` |
//! | `INTEGER` | number |
//! | `REAL` | number (`null` if not finite) |
//! | `TEXT` | string |
//! | `BLOB` | base64 string |

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine as _;
use db_index_core::{ColumnInfo, TableInfo, TableKind};
use serde_json::{Map, Number, Value};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Row, Sqlite, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{DataSourceConfig, EngineType};
use crate::plugin::{
    connect_with_timeout, reuse_or_open, split_table_name, BindValue, DatabasePlugin, HandleState,
    LiveHandle, PluginError, QueryOutput,
};

const LIST_TABLES_SQL: &str = "SELECT name, type FROM sqlite_master \
     WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
     ORDER BY name";

pub struct SqlitePlugin {
    config_id: String,
    path: PathBuf,
    options: SqliteConnectOptions,
    timeout_secs: u64,
    conn: Mutex<Option<SqliteConnection>>,
}

impl SqlitePlugin {
    pub fn new(config: &DataSourceConfig) -> Self {
        let path = PathBuf::from(config.settings.file_path.clone().unwrap_or_default());
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(false);
        Self {
            config_id: config.id.clone(),
            path,
            options,
            timeout_secs: config.settings.connection_timeout,
            conn: Mutex::new(None),
        }
    }

    async fn ensure_connected(
        &self,
        slot: &mut Option<SqliteConnection>,
    ) -> Result<(), PluginError> {
        let open = connect_with_timeout(
            self.timeout_secs,
            SqliteConnection::connect_with(&self.options),
        );
        match reuse_or_open(slot, open).await? {
            HandleState::Reused => {}
            HandleState::Opened => {
                debug!(config_id = %self.config_id, path = %self.path.display(), "sqlite opened")
            }
            HandleState::Reopened => {
                debug!(config_id = %self.config_id, "sqlite handle was stale, reopened")
            }
        }
        Ok(())
    }

    async fn close(&self, slot: &mut Option<SqliteConnection>) {
        if let Some(conn) = slot.take() {
            if let Err(e) = conn.close().await {
                warn!(config_id = %self.config_id, error = %e, "error closing sqlite connection");
            }
            debug!(config_id = %self.config_id, "sqlite closed");
        }
    }
}

#[async_trait]
impl LiveHandle for SqliteConnection {
    async fn is_alive(&mut self) -> bool {
        self.ping().await.is_ok()
    }
}

fn bind_param<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match BindValue::from_json(value) {
        BindValue::Null => query.bind(None::<String>),
        BindValue::Bool(b) => query.bind(b),
        BindValue::Int(i) => query.bind(i),
        BindValue::Float(f) => query.bind(f),
        BindValue::Text(s) => query.bind(s),
    }
}

/// Length / precision parameters of a declared type such as
/// `VARCHAR(255)` or `DECIMAL(10,2)`.
fn type_params(declared: &str) -> (Option<i64>, Option<i64>) {
    let Some((_, rest)) = declared.split_once('(') else {
        return (None, None);
    };
    let inner = rest.split(')').next().unwrap_or_default();
    let mut parts = inner.split(',').map(|p| p.trim().parse::<i64>().ok());
    (parts.next().flatten(), parts.next().flatten())
}

fn column_from_pragma(row: &SqliteRow) -> Result<ColumnInfo, sqlx::Error> {
    let data_type: String = row.try_get("type")?;
    let notnull: i64 = row.try_get("notnull")?;
    let pk: i64 = row.try_get("pk")?;
    let (first, second) = type_params(&data_type);
    let lower = data_type.to_lowercase();
    let is_char = lower.contains("char") || lower.contains("text") || lower.contains("clob");
    let mut col = ColumnInfo::new(row.try_get::<String, _>("name")?, data_type);
    col.nullable = notnull == 0;
    col.default_value = row.try_get("dflt_value")?;
    col.is_primary_key = pk > 0;
    if is_char {
        col.max_length = first;
    } else {
        col.precision = first;
        col.scale = second;
    }
    Ok(col)
}

fn row_to_json(row: &SqliteRow) -> Result<Value, sqlx::Error> {
    let mut map = Map::with_capacity(row.len());
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let storage = if raw.is_null() {
            None
        } else {
            Some(raw.type_info().name().to_string())
        };
        let value = match storage.as_deref() {
            None => Value::Null,
            Some("INTEGER") => Value::from(row.try_get_unchecked::<i64, _>(idx)?),
            Some("REAL") => Number::from_f64(row.try_get_unchecked::<f64, _>(idx)?)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Some("BOOLEAN") => Value::Bool(row.try_get_unchecked::<bool, _>(idx)?),
            Some("BLOB") => {
                let bytes: Vec<u8> = row.try_get_unchecked(idx)?;
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            Some(_) => Value::String(row.try_get_unchecked::<String, _>(idx)?),
        };
        map.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(map))
}

#[async_trait]
impl DatabasePlugin for SqlitePlugin {
    fn engine(&self) -> EngineType {
        EngineType::Sqlite
    }

    fn config_id(&self) -> &str {
        &self.config_id
    }

    async fn connect(&self) -> Result<String, PluginError> {
        let mut slot = self.conn.lock().await;
        self.ensure_connected(&mut slot).await?;
        info!(config_id = %self.config_id, path = %self.path.display(), "sqlite connect");
        Ok(format!("connected to sqlite {}", self.path.display()))
    }

    async fn disconnect(&self) {
        let mut slot = self.conn.lock().await;
        self.close(&mut slot).await;
    }

    async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    async fn list_tables(&self) -> Result<QueryOutput<TableInfo>, PluginError> {
        let mut slot = self.conn.lock().await;
        self.ensure_connected(&mut slot).await?;
        let result: Result<QueryOutput<TableInfo>, PluginError> = match slot.as_mut() {
            Some(conn) => match sqlx::query(LIST_TABLES_SQL).fetch_all(&mut *conn).await {
                Ok(rows) => rows
                    .iter()
                    .map(|row| -> Result<TableInfo, sqlx::Error> {
                        let kind: String = row.try_get("type")?;
                        Ok(TableInfo {
                            name: row.try_get("name")?,
                            schema: None,
                            kind: if kind == "view" {
                                TableKind::View
                            } else {
                                TableKind::Table
                            },
                            comment: None,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(QueryOutput::new)
                    .map_err(|e| PluginError::introspection(e.to_string())),
                Err(e) => Err(PluginError::introspection(e.to_string())),
            },
            None => Err(PluginError::connection("not connected")),
        };
        self.close(&mut slot).await;
        if let Ok(out) = &result {
            debug!(config_id = %self.config_id, count = out.count, "listed tables");
        }
        result
    }

    async fn describe_table(&self, table: &str) -> Result<QueryOutput<ColumnInfo>, PluginError> {
        let sql = match split_table_name(table)? {
            (Some(schema), table) => format!("PRAGMA \"{schema}\".table_info(\"{table}\")"),
            (None, table) => format!("PRAGMA table_info(\"{table}\")"),
        };
        let mut slot = self.conn.lock().await;
        self.ensure_connected(&mut slot).await?;
        let result: Result<QueryOutput<ColumnInfo>, PluginError> = match slot.as_mut() {
            Some(conn) => sqlx::query(&sql)
                .fetch_all(&mut *conn)
                .await
                .and_then(|rows| rows.iter().map(column_from_pragma).collect::<Result<Vec<_>, _>>())
                .map(QueryOutput::new)
                .map_err(|e| PluginError::introspection(e.to_string())),
            None => Err(PluginError::connection("not connected")),
        };
        self.close(&mut slot).await;
        result
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput<Value>, PluginError> {
        let mut slot = self.conn.lock().await;
        self.ensure_connected(&mut slot).await?;
        let conn = slot
            .as_mut()
            .ok_or_else(|| PluginError::connection("not connected"))?;

        let query = params.iter().fold(sqlx::query(sql), |q, p| bind_param(q, p));
        let rows = query
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| PluginError::query(e.to_string()))?;
        let data = rows
            .iter()
            .map(row_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PluginError::query(e.to_string()))?;
        info!(config_id = %self.config_id, rows = data.len(), "sqlite query");
        Ok(QueryOutput::new(data))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryOutput<Value>, PluginError> {
        let mut slot = self.conn.lock().await;
        self.ensure_connected(&mut slot).await?;
        let conn = slot
            .as_mut()
            .ok_or_else(|| PluginError::connection("not connected"))?;

        let query = params.iter().fold(sqlx::query(sql), |q, p| bind_param(q, p));
        let done = query
            .execute(&mut *conn)
            .await
            .map_err(|e| PluginError::query(e.to_string()))?;
        info!(config_id = %self.config_id, affected = done.rows_affected(), "sqlite execute");
        Ok(QueryOutput::affected(done.rows_affected()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_type_parameters() {
        assert_eq!(type_params("VARCHAR(255)"), (Some(255), None));
        assert_eq!(type_params("DECIMAL(10, 2)"), (Some(10), Some(2)));
        assert_eq!(type_params("INTEGER"), (None, None));
        assert_eq!(type_params("weird(x)"), (None, None));
    }

    #[tokio::test]
    async fn missing_file_fails_to_connect() {
        let config = DataSourceConfig::create(crate::models::DataSourceDraft::sqlite(
            "gone",
            "/nonexistent/dir/db.sqlite",
        ));
        let plugin = SqlitePlugin::new(&config);
        let err = plugin.test_connection().await.unwrap_err();
        assert!(err.is_connection(), "{err}");
        assert!(!plugin.is_connected().await);
    }
}
