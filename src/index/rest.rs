//! REST client for an embedding-capable search-index service.
//!
//! The service owns embedding computation: callers send raw text and the
//! backend ranks stored documents against it. Missing partitions read as
//! empty and deletes of missing documents succeed, which keeps the produced
//! interface idempotent where the consistency layer requires it.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::IndexConfig;
use crate::error::{Error, Result};

use super::{IndexDoc, IndexFilter, IndexHit, SearchIndex};

/// Search index backed by a remote vector-search service.
pub struct RestSearchIndex {
    config: IndexConfig,
    http: Client,
    /// Partitions this client has already created, so repeat writes skip
    /// the creation round trip. Invalidated when a partition is dropped.
    ensured: RwLock<HashSet<String>>,
}

impl RestSearchIndex {
    pub fn new(config: IndexConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http,
            ensured: RwLock::new(HashSet::new()),
        })
    }

    fn partition_url(&self, partition: &str) -> String {
        format!(
            "{}/partitions/{}",
            self.config.base_url.trim_end_matches('/'),
            partition
        )
    }

    fn document_url(&self, partition: &str, id: &str) -> String {
        format!("{}/documents/{}", self.partition_url(partition), id)
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<(StatusCode, String)> {
        let response = self
            .with_auth(builder)
            .send()
            .await
            .map_err(|e| Error::search_index_with_source("HTTP request failed", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::search_index_with_source("failed to read response", e))?;
        Ok((status, body))
    }
}

// Wire types for the index service API.
#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    text: &'a str,
    limit: usize,
    filter: &'a IndexFilter,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    hits: Vec<IndexHit>,
}

#[derive(Debug, Serialize)]
struct FetchRequest<'a> {
    filter: &'a IndexFilter,
    limit: usize,
    offset: usize,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    documents: Vec<IndexDoc>,
}

#[derive(Debug, Deserialize)]
struct IndexErrorBody {
    error: String,
}

fn service_error(status: StatusCode, body: &str) -> Error {
    if let Ok(parsed) = serde_json::from_str::<IndexErrorBody>(body) {
        return Error::search_index(format!("index service error ({}): {}", status, parsed.error));
    }
    Error::search_index(format!("index service error ({}): {}", status, body))
}

#[async_trait]
impl SearchIndex for RestSearchIndex {
    async fn ensure_partition(&self, partition: &str) -> Result<()> {
        if self.ensured.read().await.contains(partition) {
            return Ok(());
        }

        let url = self.partition_url(partition);
        let (status, body) = self.send(self.http.put(&url)).await?;

        if !status.is_success() {
            return Err(service_error(status, &body));
        }

        self.ensured.write().await.insert(partition.to_string());
        Ok(())
    }

    async fn upsert(&self, partition: &str, doc: &IndexDoc) -> Result<()> {
        let url = format!("{}/documents", self.partition_url(partition));
        let (status, body) = self.send(self.http.post(&url).json(doc)).await?;

        if !status.is_success() {
            return Err(service_error(status, &body));
        }
        Ok(())
    }

    async fn query(
        &self,
        partition: &str,
        text: &str,
        limit: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<IndexHit>> {
        let url = format!("{}/query", self.partition_url(partition));
        let request = QueryRequest {
            text,
            limit,
            filter,
        };
        let (status, body) = self.send(self.http.post(&url).json(&request)).await?;

        // A partition that was never written reads as empty.
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(service_error(status, &body));
        }

        let parsed: QueryResponse = serde_json::from_str(&body)
            .map_err(|e| Error::search_index(format!("failed to parse query response: {}", e)))?;
        Ok(parsed.hits)
    }

    async fn fetch(
        &self,
        partition: &str,
        filter: &IndexFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<IndexDoc>> {
        let url = format!("{}/fetch", self.partition_url(partition));
        let request = FetchRequest {
            filter,
            limit,
            offset,
        };
        let (status, body) = self.send(self.http.post(&url).json(&request)).await?;

        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(service_error(status, &body));
        }

        let parsed: FetchResponse = serde_json::from_str(&body)
            .map_err(|e| Error::search_index(format!("failed to parse fetch response: {}", e)))?;
        Ok(parsed.documents)
    }

    async fn get(&self, partition: &str, id: &str) -> Result<Option<IndexDoc>> {
        let url = self.document_url(partition, id);
        let (status, body) = self.send(self.http.get(&url)).await?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(service_error(status, &body));
        }

        let doc: IndexDoc = serde_json::from_str(&body)
            .map_err(|e| Error::search_index(format!("failed to parse document: {}", e)))?;
        Ok(Some(doc))
    }

    async fn remove(&self, partition: &str, id: &str) -> Result<()> {
        let url = self.document_url(partition, id);
        let (status, body) = self.send(self.http.delete(&url)).await?;

        // Absent documents (or partitions) delete as success.
        if status == StatusCode::NOT_FOUND || status.is_success() {
            return Ok(());
        }
        Err(service_error(status, &body))
    }

    async fn drop_partition(&self, partition: &str) -> Result<()> {
        self.ensured.write().await.remove(partition);

        let url = self.partition_url(partition);
        let (status, body) = self.send(self.http.delete(&url)).await?;

        if status == StatusCode::NOT_FOUND || status.is_success() {
            return Ok(());
        }
        Err(service_error(status, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_strip_trailing_slash() {
        let index = RestSearchIndex::new(IndexConfig {
            base_url: "http://idx.local/".to_string(),
            api_key: None,
            timeout_ms: 1_000,
        })
        .unwrap();

        assert_eq!(index.partition_url("t1__p1"), "http://idx.local/partitions/t1__p1");
        assert_eq!(
            index.document_url("t1__p1", "abc"),
            "http://idx.local/partitions/t1__p1/documents/abc"
        );
    }

    #[test]
    fn test_query_request_wire_shape() {
        let filter = IndexFilter::for_user("u1").with_session("s1");
        let request = QueryRequest {
            text: "birthday",
            limit: 5,
            filter: &filter,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["text"], "birthday");
        assert_eq!(value["limit"], 5);
        assert_eq!(value["filter"]["user_id"], "u1");
        assert_eq!(value["filter"]["session_id"], "s1");
        assert!(value["filter"].get("memory_type").is_none());
    }

    #[test]
    fn test_query_response_parsing() {
        let body = r#"{"hits": [
            {"id": "f1", "distance": 0.25, "content": "birthday is 1990-03-15"},
            {"id": "f2", "distance": 1.5, "content": "likes quiet places"}
        ]}"#;

        let parsed: QueryResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.hits.len(), 2);
        assert_eq!(parsed.hits[0].id, "f1");
        assert_eq!(parsed.hits[0].distance, 0.25);
        assert_eq!(parsed.hits[0].content, "birthday is 1990-03-15");
    }

    #[test]
    fn test_error_body_parsing() {
        let err = service_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error": "shard offline"}"#,
        );
        assert!(err.to_string().contains("shard offline"));
    }
}
