//! Table → index ingestion.
//!
//! ```text
//! describe_table ──▶ column hints ─┐
//!                                  ▼
//! SELECT * FROM t ──▶ rows ──▶ DocumentEncoder ──▶ JSONL ──▶ bulk_upsert
//!                                                              │
//!                                              per-document results ◀┘
//! ```
//!
//! One table is imported with a single bulk upsert. The engine's
//! per-document results are returned as-is; nothing is retried and rows are
//! never dropped on the client side. Re-importing a table replaces documents
//! by `id` instead of duplicating them.

use std::path::{Path, PathBuf};

use db_index_core::document::DocumentEncoder;
use db_index_core::index::{DocumentResult, ImportSummary, IndexError, SearchIndex};
use db_index_core::EncodeError;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::plugin::{split_table_name, DatabasePlugin, PluginError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// The source returned something other than a list of row objects.
    #[error("malformed source payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Encode(EncodeError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<EncodeError> for IngestError {
    fn from(err: EncodeError) -> Self {
        match err {
            e @ EncodeError::NotAnObject { .. } => Self::MalformedPayload(e.to_string()),
            e => Self::Encode(e),
        }
    }
}

/// Outcome of one import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub table: String,
    pub index: String,
    /// Rows read from the source.
    pub rows: usize,
    pub imported: usize,
    pub failed: usize,
    /// The engine's per-document results, in input order.
    pub results: Vec<DocumentResult>,
}

impl ImportReport {
    fn new(table: &str, index: &str, rows: usize, results: Vec<DocumentResult>) -> Self {
        let summary = ImportSummary::from_results(&results);
        Self {
            table: table.to_string(),
            index: index.to_string(),
            rows,
            imported: summary.imported,
            failed: summary.failed,
            results,
        }
    }
}

/// Import every row of `table` into the index `index_name`.
///
/// `id_column` names the column copied into each document's `id`.
pub async fn import_table(
    plugin: &dyn DatabasePlugin,
    index: &dyn SearchIndex,
    table: &str,
    index_name: &str,
    id_column: &str,
) -> Result<ImportReport, IngestError> {
    split_table_name(table)?;
    info!(config_id = %plugin.config_id(), %table, index = %index_name, "import started");

    let encoder = match plugin.describe_table(table).await {
        Ok(columns) => DocumentEncoder::new(id_column).with_columns(&columns.data),
        Err(e) => {
            warn!(%table, error = %e, "describe failed, importing without column hints");
            DocumentEncoder::new(id_column)
        }
    };

    let rows = plugin.select_all(table).await?.data;
    if rows.is_empty() {
        info!(%table, index = %index_name, "source table is empty, nothing to import");
        return Ok(ImportReport::new(table, index_name, 0, Vec::new()));
    }

    let jsonl = encoder.encode_jsonl(&rows)?;
    debug!(%table, rows = rows.len(), bytes = jsonl.len(), "encoded documents");

    let results = index.bulk_upsert(index_name, &jsonl).await?;
    let report = ImportReport::new(table, index_name, rows.len(), results);
    if report.failed > 0 {
        warn!(
            %table,
            index = %index_name,
            imported = report.imported,
            failed = report.failed,
            "import finished with failures"
        );
    } else {
        info!(%table, index = %index_name, imported = report.imported, "import finished");
    }
    Ok(report)
}

/// Upload an existing newline-delimited document file with upsert semantics.
pub async fn import_jsonl_file(
    index: &dyn SearchIndex,
    index_name: &str,
    path: &Path,
) -> Result<ImportReport, IngestError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let lines = content.lines().filter(|l| !l.trim().is_empty()).count();
    let label = path.display().to_string();
    if lines == 0 {
        info!(file = %label, "file is empty, nothing to import");
        return Ok(ImportReport::new(&label, index_name, 0, Vec::new()));
    }

    let results = index.bulk_upsert(index_name, &content).await?;
    let report = ImportReport::new(&label, index_name, lines, results);
    info!(
        file = %label,
        index = %index_name,
        imported = report.imported,
        failed = report.failed,
        "file import finished"
    );
    Ok(report)
}
