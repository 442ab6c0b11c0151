//! HTTP client for a Typesense cluster.
//!
//! Implements [`SearchIndex`] over the Typesense REST API:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `create_index` | `POST /collections` |
//! | `delete_index` | `DELETE /collections/{name}` |
//! | `retrieve_index` | `GET /collections/{name}` |
//! | `list_indexes` | `GET /collections` |
//! | `truncate` | `DELETE /collections/{name}/documents?truncate=true` |
//! | `bulk_upsert` | `POST /collections/{name}/documents/import?action=upsert` |
//! | `search` | `GET /collections/{name}/documents/search` |
//! | `health` | `GET /health` |
//!
//! Nodes are tried in configured order. A request moves on to the next node
//! only when the current one cannot be reached; any HTTP response is final.
//!
//! Response bodies are read as text and parsed with `serde_json`, so large
//! integers inside documents keep their exact digits.

use std::time::Duration;

use async_trait::async_trait;
use db_index_core::index::{
    DocumentResult, IndexError, IndexSummary, SearchIndex, SearchQuery, SearchResponse,
};
use db_index_core::schema::CollectionSchema;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;

const API_KEY_HEADER: &str = "X-TYPESENSE-API-KEY";

enum Body {
    Json(String),
    Text(String),
}

/// Error message body returned by Typesense on non-2xx responses.
#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct Truncated {
    #[serde(default)]
    num_deleted: u64,
}

#[derive(Deserialize)]
struct Health {
    #[serde(default)]
    ok: bool,
}

pub struct TypesenseClient {
    http: reqwest::Client,
    nodes: Vec<Url>,
    api_key: String,
}

impl TypesenseClient {
    pub fn new(config: &SearchConfig) -> anyhow::Result<Self> {
        let nodes = config
            .nodes
            .iter()
            .map(|n| {
                let base = n.base_url();
                Url::parse(&base)
                    .map_err(|e| anyhow::anyhow!("invalid search node '{}': {}", base, e))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        if nodes.is_empty() {
            anyhow::bail!("search.nodes must contain at least one node");
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connection_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            nodes,
            api_key: config.api_key.clone(),
        })
    }

    fn url(base: &Url, segments: &[&str]) -> Result<Url, IndexError> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::connection(format!("node url cannot be a base: {base}")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request, failing over across nodes. Returns the final status
    /// and body text.
    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<Body>,
    ) -> Result<(StatusCode, String), IndexError> {
        let mut last_error = String::from("no search nodes configured");

        for base in &self.nodes {
            let url = Self::url(base, segments)?;
            let mut req = self
                .http
                .request(method.clone(), url.clone())
                .header(API_KEY_HEADER, &self.api_key);
            if !query.is_empty() {
                req = req.query(query);
            }
            req = match &body {
                Some(Body::Json(s)) => req
                    .header("Content-Type", "application/json")
                    .body(s.clone()),
                Some(Body::Text(s)) => req.header("Content-Type", "text/plain").body(s.clone()),
                None => req,
            };

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp
                        .text()
                        .await
                        .map_err(|e| IndexError::connection(e.to_string()))?;
                    debug!(%method, %url, status = status.as_u16(), "search request");
                    return Ok((status, text));
                }
                Err(e) => {
                    warn!(node = %base, error = %e, "search node unreachable, trying next");
                    last_error = e.to_string();
                }
            }
        }

        Err(IndexError::Connection(last_error))
    }

    /// Send and map non-2xx statuses onto [`IndexError`]. `name` is the
    /// index the request concerns, for 404/409 errors.
    async fn call(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<Body>,
        name: &str,
    ) -> Result<String, IndexError> {
        let (status, text) = self.send(method, segments, query, body).await?;
        match status {
            s if s.is_success() => Ok(text),
            StatusCode::NOT_FOUND => Err(IndexError::NotFound(name.to_string())),
            StatusCode::CONFLICT => Err(IndexError::AlreadyExists(name.to_string())),
            s => Err(IndexError::request(s.as_u16(), error_message(&text))),
        }
    }
}

fn error_message(text: &str) -> String {
    serde_json::from_str::<ErrorBody>(text)
        .map(|b| b.message)
        .unwrap_or_else(|_| text.trim().to_string())
}

fn parse<T: DeserializeOwned>(text: &str) -> Result<T, IndexError> {
    serde_json::from_str(text).map_err(|e| IndexError::parse(e.to_string()))
}

/// Parse the import endpoint's newline-delimited result lines.
fn parse_import_results(text: &str) -> Result<Vec<DocumentResult>, IndexError> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse::<DocumentResult>)
        .collect()
}

fn search_params(query: &SearchQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("q", query.q.clone()),
        ("page", query.page.to_string()),
        ("per_page", query.per_page.to_string()),
    ];
    if !query.query_by.is_empty() {
        params.push(("query_by", query.query_by.join(",")));
    }
    if let Some(filter) = &query.filter_by {
        params.push(("filter_by", filter.clone()));
    }
    if let Some(sort) = &query.sort_by {
        params.push(("sort_by", sort.clone()));
    }
    params
}

#[async_trait]
impl SearchIndex for TypesenseClient {
    async fn create_index(&self, schema: &CollectionSchema) -> Result<CollectionSchema, IndexError> {
        let body = serde_json::to_string(schema).map_err(|e| IndexError::parse(e.to_string()))?;
        let text = self
            .call(Method::POST, &["collections"], &[], Some(Body::Json(body)), &schema.name)
            .await?;
        info!(index = %schema.name, fields = schema.fields.len(), "created index");
        parse(&text)
    }

    async fn delete_index(&self, name: &str) -> Result<(), IndexError> {
        self.call(Method::DELETE, &["collections", name], &[], None, name)
            .await?;
        info!(index = %name, "deleted index");
        Ok(())
    }

    async fn retrieve_index(&self, name: &str) -> Result<CollectionSchema, IndexError> {
        let text = self
            .call(Method::GET, &["collections", name], &[], None, name)
            .await?;
        parse(&text)
    }

    async fn list_indexes(&self) -> Result<Vec<IndexSummary>, IndexError> {
        let text = self
            .call(Method::GET, &["collections"], &[], None, "")
            .await?;
        parse(&text)
    }

    async fn truncate(&self, name: &str) -> Result<u64, IndexError> {
        let text = self
            .call(
                Method::DELETE,
                &["collections", name, "documents"],
                &[("truncate", "true".to_string())],
                None,
                name,
            )
            .await?;
        let removed = parse::<Truncated>(&text)?.num_deleted;
        info!(index = %name, removed, "truncated index");
        Ok(removed)
    }

    async fn bulk_upsert(&self, name: &str, jsonl: &str) -> Result<Vec<DocumentResult>, IndexError> {
        if jsonl.trim().is_empty() {
            return Ok(Vec::new());
        }
        let text = self
            .call(
                Method::POST,
                &["collections", name, "documents", "import"],
                &[("action", "upsert".to_string())],
                Some(Body::Text(jsonl.to_string())),
                name,
            )
            .await?;
        let results = parse_import_results(&text)?;
        debug!(index = %name, lines = results.len(), "bulk import answered");
        Ok(results)
    }

    async fn search(&self, name: &str, query: &SearchQuery) -> Result<SearchResponse, IndexError> {
        let text = self
            .call(
                Method::GET,
                &["collections", name, "documents", "search"],
                &search_params(query),
                None,
                name,
            )
            .await?;
        parse(&text)
    }

    async fn health(&self) -> Result<bool, IndexError> {
        let text = self.call(Method::GET, &["health"], &[], None, "").await?;
        Ok(parse::<Health>(&text)?.ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchNode;

    fn config(nodes: Vec<SearchNode>) -> SearchConfig {
        SearchConfig {
            api_key: "xyz".into(),
            connection_timeout_secs: 1,
            nodes,
        }
    }

    fn node(host: &str, port: u16) -> SearchNode {
        SearchNode {
            host: host.into(),
            port,
            protocol: "http".into(),
        }
    }

    #[test]
    fn urls_escape_index_names() {
        let base = Url::parse("http://localhost:8108").unwrap();
        let url = TypesenseClient::url(&base, &["collections", "my index", "documents"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8108/collections/my%20index/documents"
        );
    }

    #[test]
    fn import_lines_parse_in_order() {
        let text = "{\"success\":true}\n{\"success\":false,\"error\":\"Bad JSON.\",\"document\":\"{x\"}\n";
        let results = parse_import_results(text).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[1].error.as_deref(), Some("Bad JSON."));
    }

    #[test]
    fn error_message_prefers_engine_message() {
        assert_eq!(
            error_message(r#"{"message":"Not Found"}"#),
            "Not Found".to_string()
        );
        assert_eq!(error_message("  plain  "), "plain".to_string());
    }

    #[test]
    fn search_params_skip_unset_options() {
        let mut q = SearchQuery::new("rust", vec!["title".into(), "body".into()]);
        let params = search_params(&q);
        assert!(params.contains(&("query_by", "title,body".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "filter_by"));

        q.filter_by = Some("lang:=en".into());
        assert!(search_params(&q).contains(&("filter_by", "lang:=en".to_string())));

        let count_only = SearchQuery {
            per_page: 0,
            ..SearchQuery::new("*", Vec::new())
        };
        let params = search_params(&count_only);
        assert!(!params.iter().any(|(k, _)| *k == "query_by"));
        assert!(params.contains(&("per_page", "0".to_string())));
    }

    #[test]
    fn search_response_keeps_large_integers() {
        let text = r#"{"found":1,"page":1,"search_time_ms":3,"hits":[{"document":{"id":"1","n":123456789012345678901234567890},"text_match":578730123365187705}]}"#;
        let resp: SearchResponse = parse(text).unwrap();
        assert_eq!(
            resp.hits[0].document["n"].to_string(),
            "123456789012345678901234567890"
        );
        assert_eq!(resp.search_time_ms, 3);
    }

    #[test]
    fn new_requires_nodes() {
        assert!(TypesenseClient::new(&config(vec![])).is_err());
        assert!(TypesenseClient::new(&config(vec![node("localhost", 8108)])).is_ok());
    }

    #[tokio::test]
    async fn unreachable_nodes_report_connection_error() {
        let client =
            TypesenseClient::new(&config(vec![node("127.0.0.1", 1), node("127.0.0.1", 2)]))
                .unwrap();
        let err = client.health().await.unwrap_err();
        assert!(matches!(err, IndexError::Connection(_)), "{err}");
    }
}
