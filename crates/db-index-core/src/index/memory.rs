//! In-memory [`SearchIndex`] for tests and dry runs.
//!
//! Documents are kept per index in a `BTreeMap` keyed by `id`, so import
//! order does not affect iteration order and an upsert of an existing id
//! replaces the stored document. Search is a case-insensitive substring
//! match over the `query_by` fields; `q = "*"` matches everything.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::schema::CollectionSchema;

use super::{
    DocumentResult, IndexError, IndexSummary, SearchHit, SearchIndex, SearchQuery, SearchResponse,
};

struct StoredIndex {
    schema: CollectionSchema,
    docs: BTreeMap<String, Map<String, Value>>,
    next_id: u64,
}

/// Search engine that lives in process memory.
pub struct InMemoryIndex {
    indexes: RwLock<BTreeMap<String, StoredIndex>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Stored document by id, if any.
    pub fn document(&self, index: &str, id: &str) -> Option<Map<String, Value>> {
        self.indexes.read().get(index)?.docs.get(id).cloned()
    }

    pub fn document_count(&self, index: &str) -> Option<usize> {
        self.indexes.read().get(index).map(|i| i.docs.len())
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Schema fields every document must carry: non-optional, not generated
/// by an embedding model, not a wildcard pattern.
fn required_fields(schema: &CollectionSchema) -> impl Iterator<Item = &str> {
    schema
        .fields
        .iter()
        .filter(|f| !f.optional && f.embed.is_none() && !f.name.contains('*'))
        .map(|f| f.name.as_str())
}

fn upsert_line(index: &mut StoredIndex, line: &str) -> DocumentResult {
    let mut doc = match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => map,
        _ => return DocumentResult::failed("Bad JSON: not a properly formed document.", line),
    };
    if let Some(missing) = required_fields(&index.schema).find(|f| !doc.contains_key(*f)) {
        return DocumentResult::failed(
            format!("Field `{missing}` has been declared in the schema, but is not found in the document."),
            line,
        );
    }
    let id = match doc.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(_) => return DocumentResult::failed("Document's `id` field should be a string.", line),
        None => {
            let id = loop {
                index.next_id += 1;
                let candidate = index.next_id.to_string();
                if !index.docs.contains_key(&candidate) {
                    break candidate;
                }
            };
            doc.insert("id".into(), Value::String(id.clone()));
            id
        }
    };
    index.docs.insert(id, doc);
    DocumentResult::ok()
}

fn field_matches(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Number(n) => n.to_string().contains(needle),
        Value::Array(items) => items.iter().any(|v| field_matches(v, needle)),
        _ => false,
    }
}

/// `field:=value` or `field:value` equality filter.
fn parse_filter(filter: &str) -> Result<(&str, &str), IndexError> {
    let (field, value) = filter
        .split_once(':')
        .ok_or_else(|| IndexError::request(400, format!("Could not parse the filter query: {filter}")))?;
    let value = value.strip_prefix('=').unwrap_or(value);
    Ok((field.trim(), value.trim()))
}

fn filter_matches(doc: &Map<String, Value>, field: &str, expected: &str) -> bool {
    match doc.get(field) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Bool(b)) => b.to_string() == expected,
        Some(Value::Number(n)) => n.to_string() == expected,
        _ => false,
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn create_index(&self, schema: &CollectionSchema) -> Result<CollectionSchema, IndexError> {
        let mut indexes = self.indexes.write();
        if indexes.contains_key(&schema.name) {
            return Err(IndexError::AlreadyExists(schema.name.clone()));
        }
        indexes.insert(
            schema.name.clone(),
            StoredIndex {
                schema: schema.clone(),
                docs: BTreeMap::new(),
                next_id: 0,
            },
        );
        Ok(schema.clone())
    }

    async fn delete_index(&self, name: &str) -> Result<(), IndexError> {
        self.indexes
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| IndexError::NotFound(name.to_string()))
    }

    async fn retrieve_index(&self, name: &str) -> Result<CollectionSchema, IndexError> {
        self.indexes
            .read()
            .get(name)
            .map(|i| i.schema.clone())
            .ok_or_else(|| IndexError::NotFound(name.to_string()))
    }

    async fn list_indexes(&self) -> Result<Vec<IndexSummary>, IndexError> {
        Ok(self
            .indexes
            .read()
            .iter()
            .map(|(name, i)| IndexSummary {
                name: name.clone(),
                num_documents: i.docs.len() as u64,
            })
            .collect())
    }

    async fn truncate(&self, name: &str) -> Result<u64, IndexError> {
        let mut indexes = self.indexes.write();
        let index = indexes
            .get_mut(name)
            .ok_or_else(|| IndexError::NotFound(name.to_string()))?;
        let removed = index.docs.len() as u64;
        index.docs.clear();
        Ok(removed)
    }

    async fn bulk_upsert(&self, name: &str, jsonl: &str) -> Result<Vec<DocumentResult>, IndexError> {
        let mut indexes = self.indexes.write();
        let index = indexes
            .get_mut(name)
            .ok_or_else(|| IndexError::NotFound(name.to_string()))?;
        Ok(jsonl
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| upsert_line(index, line))
            .collect())
    }

    async fn search(&self, name: &str, query: &SearchQuery) -> Result<SearchResponse, IndexError> {
        let filter = query.filter_by.as_deref().map(parse_filter).transpose()?;
        let indexes = self.indexes.read();
        let index = indexes
            .get(name)
            .ok_or_else(|| IndexError::NotFound(name.to_string()))?;

        let needle = query.q.trim().to_lowercase();
        let matches: Vec<&Map<String, Value>> = index
            .docs
            .values()
            .filter(|doc| {
                needle == "*"
                    || query
                        .query_by
                        .iter()
                        .filter_map(|f| doc.get(f))
                        .any(|v| field_matches(v, &needle))
            })
            .filter(|doc| filter.map_or(true, |(f, v)| filter_matches(doc, f, v)))
            .collect();

        let page = query.page.max(1);
        let per_page = query.per_page as usize;
        let skip = (page as usize - 1) * per_page;
        Ok(SearchResponse {
            found: matches.len() as u64,
            page,
            search_time_ms: 0,
            hits: matches
                .into_iter()
                .skip(skip)
                .take(per_page)
                .map(|doc| SearchHit {
                    document: doc.clone(),
                    text_match: None,
                })
                .collect(),
        })
    }

    async fn health(&self) -> Result<bool, IndexError> {
        Ok(true)
    }
}
