//! PostgreSQL plugin.
//!
//! Introspection reads `information_schema` under the configured schema
//! (default `public`). Row-returning statements are wrapped as
//!
//! ```sql
//! WITH q AS (<statement>) SELECT row_to_json(q)::text FROM q
//! ```
//!
//! so the server renders each row as JSON text. Parsing that text keeps
//! `bigint` and `numeric` values digit-for-digit, which decoding into Rust
//! integers or floats would not.
//!
//! Only statements Postgres accepts inside `WITH` are wrapped: `SELECT`,
//! `WITH`, `VALUES`, `TABLE`, and `INSERT` / `UPDATE` / `DELETE` with
//! `RETURNING`. Anything else (`SHOW`, `EXPLAIN`, ...) runs as written and
//! its columns are decoded by type.

use async_trait::async_trait;
use db_index_core::{ColumnInfo, TableInfo, TableKind};
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{Column, Connection, Postgres, Row, TypeInfo};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{DataSourceConfig, EngineType, SslMode};
use crate::plugin::{
    connect_with_timeout, reuse_or_open, split_table_name, BindValue, DatabasePlugin, HandleState,
    LiveHandle, PluginError, QueryOutput,
};

const LIST_TABLES_SQL: &str = r#"
SELECT t.table_name::text AS table_name,
       t.table_type::text AS table_type,
       obj_description(c.oid, 'pg_class') AS comment
FROM information_schema.tables t
LEFT JOIN pg_namespace n ON n.nspname = t.table_schema
LEFT JOIN pg_class c ON c.relname = t.table_name AND c.relnamespace = n.oid
WHERE t.table_schema = $1
ORDER BY t.table_name
"#;

const DESCRIBE_TABLE_SQL: &str = r#"
SELECT c.column_name::text AS column_name,
       c.data_type::text AS data_type,
       c.is_nullable::text AS is_nullable,
       c.column_default::text AS column_default,
       c.character_maximum_length::int8 AS max_length,
       c.numeric_precision::int8 AS numeric_precision,
       c.numeric_scale::int8 AS numeric_scale,
       col_description(pc.oid, c.ordinal_position::int) AS comment,
       EXISTS (
           SELECT 1
           FROM information_schema.table_constraints tc
           JOIN information_schema.key_column_usage kcu
             ON kcu.constraint_name = tc.constraint_name
            AND kcu.constraint_schema = tc.constraint_schema
            AND kcu.table_name = tc.table_name
           WHERE tc.constraint_type = 'PRIMARY KEY'
             AND tc.table_schema = c.table_schema
             AND tc.table_name = c.table_name
             AND kcu.column_name = c.column_name
       ) AS is_primary_key
FROM information_schema.columns c
LEFT JOIN pg_namespace n ON n.nspname = c.table_schema
LEFT JOIN pg_class pc ON pc.relname = c.table_name AND pc.relnamespace = n.oid
WHERE c.table_schema = $1 AND c.table_name = $2
ORDER BY c.ordinal_position
"#;

pub struct PostgresPlugin {
    config_id: String,
    schema: String,
    /// `host:port/database`, for messages.
    target: String,
    options: PgConnectOptions,
    timeout_secs: u64,
    conn: Mutex<Option<PgConnection>>,
}

impl PostgresPlugin {
    pub fn new(config: &DataSourceConfig) -> Self {
        let s = &config.settings;
        let mut options = PgConnectOptions::new()
            .host(&s.host)
            .port(s.port)
            .database(&s.database)
            .username(&s.username)
            .ssl_mode(ssl_mode(s.ssl_mode, s.ssl))
            .application_name("dbi");
        if !s.password.is_empty() {
            options = options.password(&s.password);
        }
        Self {
            config_id: config.id.clone(),
            schema: config.schema_name().to_string(),
            target: format!("{}:{}/{}", s.host, s.port, s.database),
            options,
            timeout_secs: s.connection_timeout,
            conn: Mutex::new(None),
        }
    }

    /// Make sure `slot` holds a live connection, replacing a stale one.
    async fn ensure_connected(&self, slot: &mut Option<PgConnection>) -> Result<(), PluginError> {
        let open =
            connect_with_timeout(self.timeout_secs, PgConnection::connect_with(&self.options));
        match reuse_or_open(slot, open).await? {
            HandleState::Reused => {}
            HandleState::Opened => debug!(config_id = %self.config_id, "postgres connected"),
            HandleState::Reopened => {
                debug!(config_id = %self.config_id, "postgres handle was stale, reconnected")
            }
        }
        Ok(())
    }

    async fn close(&self, slot: &mut Option<PgConnection>) {
        if let Some(conn) = slot.take() {
            if let Err(e) = conn.close().await {
                warn!(config_id = %self.config_id, error = %e, "error closing postgres connection");
            }
            debug!(config_id = %self.config_id, "postgres disconnected");
        }
    }
}

#[async_trait]
impl LiveHandle for PgConnection {
    async fn is_alive(&mut self) -> bool {
        self.ping().await.is_ok()
    }
}

fn ssl_mode(mode: Option<SslMode>, ssl: bool) -> PgSslMode {
    match mode {
        Some(SslMode::Disable) => PgSslMode::Disable,
        Some(SslMode::Prefer) => PgSslMode::Prefer,
        Some(SslMode::Require) => PgSslMode::Require,
        Some(SslMode::VerifyCa) => PgSslMode::VerifyCa,
        Some(SslMode::VerifyFull) => PgSslMode::VerifyFull,
        None if ssl => PgSslMode::Require,
        None => PgSslMode::Disable,
    }
}

/// Whether `sql` may be placed inside a `WITH` clause.
fn wraps_as_json_rows(sql: &str) -> bool {
    let upper = sql.trim_start().trim_start_matches('(').to_ascii_uppercase();
    let keyword: String = upper.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    match keyword.as_str() {
        "SELECT" | "WITH" | "VALUES" | "TABLE" => true,
        "INSERT" | "UPDATE" | "DELETE" => upper
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .any(|word| word == "RETURNING"),
        _ => false,
    }
}

/// Wrap a statement so each result row comes back as one JSON text column.
fn wrap_as_json_rows(sql: &str) -> String {
    let body = sql.trim().trim_end_matches(';').trim_end();
    format!("WITH q AS ({body}) SELECT row_to_json(q)::text FROM q")
}

fn json_text_row(row: &PgRow) -> Result<Value, PluginError> {
    let text: String = row.try_get(0).map_err(|e| PluginError::query(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| PluginError::query(e.to_string()))
}

/// Decode an unwrapped row column by column.
fn plain_row(row: &PgRow) -> Result<Value, sqlx::Error> {
    let mut map = Map::with_capacity(row.len());
    for column in row.columns() {
        let idx = column.ordinal();
        let value = match column.type_info().name() {
            "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(Value::Bool),
            "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(Value::from),
            "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(Value::from),
            "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Value::from),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(idx)?
                .and_then(|f| Number::from_f64(f64::from(f)).map(Value::Number)),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(idx)?
                .and_then(|f| Number::from_f64(f).map(Value::Number)),
            "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx)?,
            _ => row.try_get::<Option<String>, _>(idx)?.map(Value::String),
        };
        map.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    Ok(Value::Object(map))
}

fn bind_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match BindValue::from_json(value) {
        BindValue::Null => query.bind(None::<String>),
        BindValue::Bool(b) => query.bind(b),
        BindValue::Int(i) => query.bind(i),
        BindValue::Float(f) => query.bind(f),
        BindValue::Text(s) => query.bind(s),
    }
}

fn table_from_row(row: &PgRow, schema: &str) -> Result<TableInfo, sqlx::Error> {
    let table_type: String = row.try_get("table_type")?;
    Ok(TableInfo {
        name: row.try_get("table_name")?,
        schema: Some(schema.to_string()),
        kind: if table_type == "BASE TABLE" {
            TableKind::Table
        } else {
            TableKind::View
        },
        comment: row.try_get("comment")?,
    })
}

fn column_from_row(row: &PgRow) -> Result<ColumnInfo, sqlx::Error> {
    let is_nullable: String = row.try_get("is_nullable")?;
    Ok(ColumnInfo {
        name: row.try_get("column_name")?,
        data_type: row.try_get("data_type")?,
        nullable: is_nullable == "YES",
        default_value: row.try_get("column_default")?,
        comment: row.try_get("comment")?,
        is_primary_key: row.try_get("is_primary_key")?,
        max_length: row.try_get("max_length")?,
        precision: row.try_get("numeric_precision")?,
        scale: row.try_get("numeric_scale")?,
    })
}

#[async_trait]
impl DatabasePlugin for PostgresPlugin {
    fn engine(&self) -> EngineType {
        EngineType::Postgresql
    }

    fn config_id(&self) -> &str {
        &self.config_id
    }

    async fn connect(&self) -> Result<String, PluginError> {
        let mut slot = self.conn.lock().await;
        self.ensure_connected(&mut slot).await?;
        info!(config_id = %self.config_id, target = %self.target, "postgres connect");
        Ok(format!("connected to postgresql {}", self.target))
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
            Some(conn) => sqlx::query(LIST_TABLES_SQL)
                .bind(self.schema.as_str())
                .fetch_all(&mut *conn)
                .await
                .and_then(|rows| {
                    rows.iter()
                        .map(|r| table_from_row(r, &self.schema))
                        .collect::<Result<Vec<_>, _>>()
                })
                .map(QueryOutput::new)
                .map_err(|e| PluginError::introspection(e.to_string())),
            None => Err(PluginError::connection("not connected")),
        };
        self.close(&mut slot).await;
        if let Ok(out) = &result {
            debug!(config_id = %self.config_id, schema = %self.schema, count = out.count, "listed tables");
        }
        result
    }

    async fn describe_table(&self, table: &str) -> Result<QueryOutput<ColumnInfo>, PluginError> {
        let (schema, table) = split_table_name(table)?;
        let schema = schema.unwrap_or(&self.schema);
        let mut slot = self.conn.lock().await;
        self.ensure_connected(&mut slot).await?;
        let result: Result<QueryOutput<ColumnInfo>, PluginError> = match slot.as_mut() {
            Some(conn) => sqlx::query(DESCRIBE_TABLE_SQL)
                .bind(schema)
                .bind(table)
                .fetch_all(&mut *conn)
                .await
                .and_then(|rows| rows.iter().map(column_from_row).collect::<Result<Vec<_>, _>>())
                .map(QueryOutput::new)
                .map_err(|e| PluginError::introspection(e.to_string())),
            None => Err(PluginError::connection("not connected")),
        };
        self.close(&mut slot).await;
        result
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput<Value>, PluginError> {
        let wrap = wraps_as_json_rows(sql);
        let statement = if wrap {
            wrap_as_json_rows(sql)
        } else {
            sql.to_string()
        };
        let mut slot = self.conn.lock().await;
        self.ensure_connected(&mut slot).await?;
        let conn = slot
            .as_mut()
            .ok_or_else(|| PluginError::connection("not connected"))?;

        let query = params
            .iter()
            .fold(sqlx::query(&statement), |q, p| bind_param(q, p));
        let rows = query
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| PluginError::query(e.to_string()))?;

        let data = rows
            .iter()
            .map(|row| {
                if wrap {
                    json_text_row(row)
                } else {
                    plain_row(row).map_err(|e| PluginError::query(e.to_string()))
                }
            })
            .collect::<Result<Vec<Value>, _>>()?;
        info!(config_id = %self.config_id, rows = data.len(), "postgres query");
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
        info!(config_id = %self.config_id, affected = done.rows_affected(), "postgres execute");
        Ok(QueryOutput::affected(done.rows_affected()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DataSourceDraft;

    fn config(port: u16) -> DataSourceConfig {
        DataSourceConfig::create(DataSourceDraft {
            engine: EngineType::Postgresql,
            host: "127.0.0.1".into(),
            port,
            database: "app".into(),
            username: "app".into(),
            file_path: None,
            connection_timeout: 2,
            ..DataSourceDraft::sqlite("pg", "")
        })
    }

    #[test]
    fn ssl_mode_precedence() {
        assert!(matches!(ssl_mode(None, false), PgSslMode::Disable));
        assert!(matches!(ssl_mode(None, true), PgSslMode::Require));
        assert!(matches!(
            ssl_mode(Some(SslMode::VerifyFull), false),
            PgSslMode::VerifyFull
        ));
        assert!(matches!(
            ssl_mode(Some(SslMode::Disable), true),
            PgSslMode::Disable
        ));
    }

    #[test]
    fn statements_are_wrapped_without_trailing_semicolon() {
        assert_eq!(
            wrap_as_json_rows("  SELECT * FROM \"users\";  "),
            "WITH q AS (SELECT * FROM \"users\") SELECT row_to_json(q)::text FROM q"
        );
    }

    #[test]
    fn only_cte_compatible_statements_are_wrapped() {
        for sql in [
            "SELECT 1",
            "  select * from t",
            "(SELECT 1) UNION (SELECT 2)",
            "WITH x AS (SELECT 1) SELECT * FROM x",
            "VALUES (1), (2)",
            "TABLE users",
            "INSERT INTO t (a) VALUES (1) RETURNING id",
            "update t set a = 1 returning *",
        ] {
            assert!(wraps_as_json_rows(sql), "{sql}");
        }
        for sql in [
            "SHOW search_path",
            "EXPLAIN SELECT 1",
            "INSERT INTO t (a) VALUES (1)",
            "DELETE FROM t WHERE returning_flag",
            "CREATE TABLE t (id int)",
            "",
        ] {
            assert!(!wraps_as_json_rows(sql), "{sql}");
        }
    }

    #[test]
    fn schema_defaults_to_public() {
        let plugin = PostgresPlugin::new(&config(5432));
        assert_eq!(plugin.schema, "public");
        assert_eq!(plugin.engine(), EngineType::Postgresql);
    }

    #[tokio::test]
    async fn failed_connect_leaves_no_handle() {
        // nothing listens on port 1
        let plugin = PostgresPlugin::new(&config(1));
        let err = plugin.connect().await.unwrap_err();
        assert!(err.is_connection(), "{err}");
        assert!(!plugin.is_connected().await);

        let err = plugin.list_tables().await.unwrap_err();
        assert!(err.is_connection());
        assert!(!plugin.is_connected().await);
    }

    #[tokio::test]
    async fn malformed_table_name_fails_before_io() {
        let plugin = PostgresPlugin::new(&config(1));
        assert!(matches!(
            plugin.describe_table("users; drop").await,
            Err(PluginError::InvalidIdentifier(_))
        ));
    }
}
