//! Database plugin contract.
//!
//! A [`DatabasePlugin`] is one live connector for one data-source config.
//! It owns at most one native connection handle, which is `None` whenever
//! the plugin is disconnected, including after a failed [`connect`].
//!
//! # Connection policy
//!
//! | Operation | Connects on demand | Disconnects afterwards |
//! |-----------|--------------------|------------------------|
//! | [`connect`] | yes (pings an existing handle first) | no |
//! | [`test_connection`] | yes | yes |
//! | [`list_tables`] | yes | yes |
//! | [`describe_table`] | yes | yes |
//! | [`query`] / [`execute`] | yes | no |
//!
//! Every operation returns `Result<_, PluginError>`; no engine error escapes
//! as a panic, and a failure never leaves a half-open handle behind.
//!
//! [`connect`]: DatabasePlugin::connect
//! [`test_connection`]: DatabasePlugin::test_connection
//! [`list_tables`]: DatabasePlugin::list_tables
//! [`describe_table`]: DatabasePlugin::describe_table
//! [`query`]: DatabasePlugin::query
//! [`execute`]: DatabasePlugin::execute

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use db_index_core::{ColumnInfo, TableInfo};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::EngineType;

// ═══════════════════════════════════════════════════════════════════════
// Errors and results
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("connection timed out after {0}s")]
    Timeout(u64),

    #[error("query failed: {0}")]
    Query(String),

    #[error("introspection failed: {0}")]
    Introspection(String),

    #[error("invalid identifier: '{0}'")]
    InvalidIdentifier(String),
}

impl PluginError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn introspection(msg: impl Into<String>) -> Self {
        Self::Introspection(msg.into())
    }

    /// Connection-phase failures (as opposed to statement failures).
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Rows plus a count. For `execute`, `data` is empty and `count` is the
/// number of affected rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutput<T> {
    pub data: Vec<T>,
    pub count: u64,
}

impl<T> QueryOutput<T> {
    pub fn new(data: Vec<T>) -> Self {
        let count = data.len() as u64;
        Self { data, count }
    }

    pub fn affected(count: u64) -> Self {
        Self {
            data: Vec::new(),
            count,
        }
    }
}

/// Tagged outcome of a connect or test, as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionReport {
    pub fn from_result(engine: EngineType, result: Result<String, PluginError>) -> Self {
        match result {
            Ok(message) => Self {
                success: true,
                message,
                error: None,
            },
            Err(e) => Self {
                success: false,
                message: format!("{engine} connection test failed"),
                error: Some(e.to_string()),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Plugin trait
// ═══════════════════════════════════════════════════════════════════════

/// Connection lifecycle and introspection for one database engine.
///
/// Implementations guard their handle with an async mutex, so one plugin
/// may be shared (`Arc<dyn DatabasePlugin>`) between concurrent tasks;
/// calls on the same plugin are serialized.
#[async_trait]
pub trait DatabasePlugin: Send + Sync {
    fn engine(&self) -> EngineType;

    /// Id of the data-source config this plugin was built from.
    fn config_id(&self) -> &str;

    /// Open the native connection. An existing handle is pinged and
    /// replaced if it has gone stale. Returns a human-readable message.
    async fn connect(&self) -> Result<String, PluginError>;

    /// Release the native handle. Safe to call when already disconnected.
    async fn disconnect(&self);

    async fn is_connected(&self) -> bool;

    /// Connect, then immediately disconnect.
    async fn test_connection(&self) -> Result<String, PluginError> {
        self.connect().await?;
        self.disconnect().await;
        Ok(format!("{} connection test succeeded", self.engine()))
    }

    /// Tables and views under the configured schema, sorted by name.
    async fn list_tables(&self) -> Result<QueryOutput<TableInfo>, PluginError>;

    /// Columns of `table` in declaration order.
    async fn describe_table(&self, table: &str) -> Result<QueryOutput<ColumnInfo>, PluginError>;

    /// Run a row-returning statement. Each row is a JSON object keyed by
    /// column name.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryOutput<Value>, PluginError>;

    /// Run a statement for its side effects.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryOutput<Value>, PluginError> {
        self.query(sql, params).await
    }

    /// `SELECT * FROM <table>` with the name validated and quoted.
    async fn select_all(&self, table: &str) -> Result<QueryOutput<Value>, PluginError> {
        let sql = format!("SELECT * FROM {}", quote_table(table)?);
        self.query(&sql, &[]).await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Helpers shared by engine implementations
// ═══════════════════════════════════════════════════════════════════════

/// Run a connection future under the configured timeout.
pub async fn connect_with_timeout<F, T>(timeout_secs: u64, fut: F) -> Result<T, PluginError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(Duration::from_secs(timeout_secs), fut).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(PluginError::connection(e.to_string())),
        Err(_) => Err(PluginError::Timeout(timeout_secs)),
    }
}

/// A native connection handle that can tell whether it is still usable.
#[async_trait]
pub trait LiveHandle: Send {
    async fn is_alive(&mut self) -> bool;
}

/// What [`reuse_or_open`] did with a handle slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// The existing handle answered and was kept.
    Reused,
    /// The slot was empty and a handle was opened.
    Opened,
    /// The existing handle was stale; it was dropped and a new one opened.
    Reopened,
}

/// Make `slot` hold a usable handle. A stale handle is dropped before
/// `open` runs, so the slot is `None` whenever opening fails. `open` is
/// only polled when a new handle is needed.
pub async fn reuse_or_open<C, F>(slot: &mut Option<C>, open: F) -> Result<HandleState, PluginError>
where
    C: LiveHandle,
    F: Future<Output = Result<C, PluginError>>,
{
    let state = match slot.as_mut() {
        Some(conn) => {
            if conn.is_alive().await {
                return Ok(HandleState::Reused);
            }
            HandleState::Reopened
        }
        None => HandleState::Opened,
    };
    *slot = None;
    *slot = Some(open.await?);
    Ok(state)
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Split `schema.table` (or a bare `table`) after validating both parts.
pub fn split_table_name(name: &str) -> Result<(Option<&str>, &str), PluginError> {
    let invalid = || PluginError::InvalidIdentifier(name.to_string());
    let (schema, table) = match name.split_once('.') {
        Some((schema, table)) => (Some(schema), table),
        None => (None, name),
    };
    if !is_identifier(table) || schema.is_some_and(|s| !is_identifier(s)) {
        return Err(invalid());
    }
    Ok((schema, table))
}

/// Validated, double-quoted table reference for interpolation into SQL.
pub fn quote_table(name: &str) -> Result<String, PluginError> {
    Ok(match split_table_name(name)? {
        (Some(schema), table) => format!("\"{schema}\".\"{table}\""),
        (None, table) => format!("\"{table}\""),
    })
}

/// A JSON statement parameter narrowed to what drivers can bind.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl BindValue {
    /// Integers wider than 64 bits bind as their exact digit text; arrays
    /// and objects bind as JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => BindValue::Null,
            Value::Bool(b) => BindValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    BindValue::Int(i)
                } else if n.is_f64() {
                    n.as_f64()
                        .map(BindValue::Float)
                        .unwrap_or_else(|| BindValue::Text(n.to_string()))
                } else {
                    BindValue::Text(n.to_string())
                }
            }
            Value::String(s) => BindValue::Text(s.clone()),
            other => BindValue::Text(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quotes_plain_and_qualified_names() {
        assert_eq!(quote_table("users").unwrap(), "\"users\"");
        assert_eq!(quote_table("public.users").unwrap(), "\"public\".\"users\"");
        assert_eq!(quote_table("_t$1").unwrap(), "\"_t$1\"");
    }

    #[test]
    fn rejects_injection_and_malformed_names() {
        for bad in [
            "",
            "users; DROP TABLE x",
            "a.b.c",
            "1abc",
            "users\"",
            ".users",
            "users.",
            "na me",
        ] {
            assert!(
                matches!(quote_table(bad), Err(PluginError::InvalidIdentifier(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn bind_values_from_json() {
        assert_eq!(BindValue::from_json(&json!(null)), BindValue::Null);
        assert_eq!(BindValue::from_json(&json!(true)), BindValue::Bool(true));
        assert_eq!(BindValue::from_json(&json!(-7)), BindValue::Int(-7));
        assert_eq!(BindValue::from_json(&json!(2.5)), BindValue::Float(2.5));
        assert_eq!(BindValue::from_json(&json!("x")), BindValue::Text("x".into()));
        assert_eq!(
            BindValue::from_json(&json!({ "a": 1 })),
            BindValue::Text("{\"a\":1}".into())
        );
        let huge: Value = serde_json::from_str("123456789012345678901234567890").unwrap();
        assert_eq!(
            BindValue::from_json(&huge),
            BindValue::Text("123456789012345678901234567890".into())
        );
        assert_eq!(
            BindValue::from_json(&json!(u64::MAX)),
            BindValue::Text(u64::MAX.to_string())
        );
    }

    #[test]
    fn connection_report_tags_failures() {
        let ok = ConnectionReport::from_result(EngineType::Sqlite, Ok("connected".into()));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = ConnectionReport::from_result(
            EngineType::Postgresql,
            Err(PluginError::connection("refused")),
        );
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("connection failed: refused"));
        assert!(failed.message.contains("postgresql"));
    }

    struct FakeHandle {
        alive: bool,
        generation: u32,
    }

    #[async_trait]
    impl LiveHandle for FakeHandle {
        async fn is_alive(&mut self) -> bool {
            self.alive
        }
    }

    fn opens(generation: u32) -> impl Future<Output = Result<FakeHandle, PluginError>> {
        async move {
            Ok(FakeHandle {
                alive: true,
                generation,
            })
        }
    }

    fn refuses() -> impl Future<Output = Result<FakeHandle, PluginError>> {
        async { Err(PluginError::connection("refused")) }
    }

    #[tokio::test]
    async fn empty_slot_is_opened() {
        let mut slot = None;
        assert_eq!(reuse_or_open(&mut slot, opens(1)).await.unwrap(), HandleState::Opened);
        assert_eq!(slot.map(|h| h.generation), Some(1));
    }

    #[tokio::test]
    async fn live_handle_is_reused_without_opening() {
        let mut slot = Some(FakeHandle {
            alive: true,
            generation: 1,
        });
        assert_eq!(reuse_or_open(&mut slot, refuses()).await.unwrap(), HandleState::Reused);
        assert_eq!(slot.map(|h| h.generation), Some(1));
    }

    #[tokio::test]
    async fn stale_handle_is_replaced() {
        let mut slot = Some(FakeHandle {
            alive: false,
            generation: 1,
        });
        assert_eq!(reuse_or_open(&mut slot, opens(2)).await.unwrap(), HandleState::Reopened);
        let handle = slot.unwrap();
        assert_eq!(handle.generation, 2);
        assert!(handle.alive);
    }

    #[tokio::test]
    async fn failed_reopen_leaves_slot_empty() {
        let mut slot = Some(FakeHandle {
            alive: false,
            generation: 1,
        });
        let err = reuse_or_open(&mut slot, refuses()).await.unwrap_err();
        assert!(err.is_connection());
        assert!(slot.is_none());

        let mut empty: Option<FakeHandle> = None;
        assert!(reuse_or_open(&mut empty, refuses()).await.is_err());
        assert!(empty.is_none());
    }

    #[test]
    fn query_output_counts_rows() {
        let out = QueryOutput::new(vec![json!({}), json!({})]);
        assert_eq!(out.count, 2);
        let exec: QueryOutput<Value> = QueryOutput::affected(5);
        assert!(exec.data.is_empty());
        assert_eq!(exec.count, 5);
    }
}
