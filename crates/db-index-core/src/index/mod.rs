//! Search index abstraction.
//!
//! The [`SearchIndex`] trait is the contract between this crate and a
//! search engine holding named indexes (collections) of documents. The
//! ingestion pipeline only needs [`bulk_upsert`](SearchIndex::bulk_upsert);
//! the remaining operations back index management.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`create_index`](SearchIndex::create_index) | Create an index from a wire schema |
//! | [`delete_index`](SearchIndex::delete_index) | Drop an index and its documents |
//! | [`retrieve_index`](SearchIndex::retrieve_index) | Fetch an index schema |
//! | [`list_indexes`](SearchIndex::list_indexes) | Names and document counts |
//! | [`update_index`](SearchIndex::update_index) | Replace a schema (drop and recreate) |
//! | [`truncate`](SearchIndex::truncate) | Delete every document, keep the schema |
//! | [`bulk_upsert`](SearchIndex::bulk_upsert) | Newline-delimited import, upsert by `id` |
//! | [`search`](SearchIndex::search) | Full-text query |
//! | [`health`](SearchIndex::health) | Engine liveness |
//! | [`create_many`](SearchIndex::create_many) / [`delete_many`](SearchIndex::delete_many) | Batch index management, one result per index |
//! | [`stats`](SearchIndex::stats) | Schema plus document count |

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::CollectionSchema;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("search engine unreachable: {0}")]
    Connection(String),

    #[error("index '{0}' not found")]
    NotFound(String),

    #[error("index '{0}' already exists")]
    AlreadyExists(String),

    #[error("search engine rejected the request ({status}): {message}")]
    Request { status: u16, message: String },

    #[error("unexpected search engine response: {0}")]
    Parse(String),
}

impl IndexError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn request(status: u16, msg: impl Into<String>) -> Self {
        Self::Request {
            status,
            message: msg.into(),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}

/// Outcome of one line of a bulk import, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The offending input line, echoed back on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl DocumentResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            document: None,
            id: None,
        }
    }

    pub fn failed(error: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            document: Some(document.into()),
            id: None,
        }
    }
}

/// Success/failure counts over a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub failed: usize,
}

impl ImportSummary {
    pub fn from_results(results: &[DocumentResult]) -> Self {
        let imported = results.iter().filter(|r| r.success).count();
        Self {
            imported,
            failed: results.len() - imported,
        }
    }
}

/// Index name and size, as listed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub name: String,
    #[serde(default)]
    pub num_documents: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchQuery {
    pub q: String,
    pub query_by: Vec<String>,
    pub filter_by: Option<String>,
    pub sort_by: Option<String>,
    /// 1-based.
    pub page: u32,
    pub per_page: u32,
}

impl SearchQuery {
    pub fn new(q: impl Into<String>, query_by: Vec<String>) -> Self {
        Self {
            q: q.into(),
            query_by,
            filter_by: None,
            sort_by: None,
            page: 1,
            per_page: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_match: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub found: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub search_time_ms: u64,
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

/// Outcome for one index in a batch create or delete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResult {
    fn from_result<T>(name: &str, result: Result<T, IndexError>) -> Self {
        Self {
            name: name.to_string(),
            success: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub collection: CollectionSchema,
    pub total_documents: u64,
    pub search_time_ms: u64,
}

/// A search engine holding named indexes of JSON documents.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// command in the process.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create an index. Fails with [`IndexError::AlreadyExists`] if the name
    /// is taken.
    async fn create_index(&self, schema: &CollectionSchema) -> Result<CollectionSchema, IndexError>;

    async fn delete_index(&self, name: &str) -> Result<(), IndexError>;

    /// Fails with [`IndexError::NotFound`] if absent.
    async fn retrieve_index(&self, name: &str) -> Result<CollectionSchema, IndexError>;

    async fn list_indexes(&self) -> Result<Vec<IndexSummary>, IndexError>;

    /// Replace the schema of an existing index. Documents are dropped.
    async fn update_index(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<CollectionSchema, IndexError> {
        self.retrieve_index(name).await?;
        self.delete_index(name).await?;
        let mut schema = schema.clone();
        schema.name = name.to_string();
        self.create_index(&schema).await
    }

    /// Remove every document, keeping the schema. Returns the number removed.
    async fn truncate(&self, name: &str) -> Result<u64, IndexError>;

    /// Import newline-delimited documents with upsert-by-`id` semantics.
    /// Returns one result per non-empty input line, in order.
    async fn bulk_upsert(&self, name: &str, jsonl: &str) -> Result<Vec<DocumentResult>, IndexError>;

    async fn search(&self, name: &str, query: &SearchQuery) -> Result<SearchResponse, IndexError>;

    async fn health(&self) -> Result<bool, IndexError>;

    /// Create each index in turn. A failure is recorded and the rest still
    /// run.
    async fn create_many(&self, schemas: &[CollectionSchema]) -> Vec<BatchResult> {
        let mut results = Vec::with_capacity(schemas.len());
        for schema in schemas {
            let created = self.create_index(schema).await;
            results.push(BatchResult::from_result(&schema.name, created));
        }
        results
    }

    /// Delete each index in turn. A failure is recorded and the rest still
    /// run.
    async fn delete_many(&self, names: &[String]) -> Vec<BatchResult> {
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let deleted = self.delete_index(name).await;
            results.push(BatchResult::from_result(name, deleted));
        }
        results
    }

    /// Schema and document count, counted by a match-all search that
    /// returns no hits.
    async fn stats(&self, name: &str) -> Result<IndexStats, IndexError> {
        let collection = self.retrieve_index(name).await?;
        let query = SearchQuery {
            per_page: 0,
            ..SearchQuery::new("*", Vec::new())
        };
        let found = self.search(name, &query).await?;
        Ok(IndexStats {
            collection,
            total_documents: found.found,
            search_time_ms: found.search_time_ms,
        })
    }
}
