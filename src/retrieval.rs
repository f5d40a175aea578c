//! Fan-out similarity search across named collections.
//!
//! Every collection is queried concurrently, each under its own timeout. A
//! collection that errors or times out is logged and skipped; retrieval only
//! fails when none of them answered. Surviving hits are merged, sorted by
//! score (descending) and cut to `top_k`. The sort is stable, so equal scores
//! keep collection order first and backend rank second.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::classify_reqwest;
use crate::error::{BackendError, RetrievalError};
use crate::types::{ItemProjection, RetrievedItem};

/// One nearest-neighbour hit as returned by the vector backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub id: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RawHit>, BackendError>;
}

// ============ HTTP backend ============

#[derive(Debug, Serialize)]
struct PointSearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Debug, Deserialize)]
struct PointSearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

/// Qdrant-style `POST {endpoint}/collections/{name}/points/search`.
pub struct HttpVectorBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl HttpVectorBackend {
    pub fn new(client: reqwest::Client, endpoint: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl VectorBackend for HttpVectorBackend {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RawHit>, BackendError> {
        let url = format!("{}/collections/{}/points/search", self.endpoint, collection);
        let mut request = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&PointSearchRequest {
                vector,
                limit,
                with_payload: true,
            });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_reqwest(e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let parsed: PointSearchResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|p| RawHit {
                id: match p.id {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
                score: p.score,
                payload: p.payload.unwrap_or_default(),
            })
            .collect())
    }
}

// ============ Payload adapters ============

/// Maps a raw payload onto [`ItemProjection`] using field-name precedence:
/// the first present, non-empty field in each list wins.
#[derive(Debug, Clone)]
pub struct CollectionAdapter {
    pub title_fields: Vec<String>,
    pub body_fields: Vec<String>,
    pub slug_fields: Vec<String>,
    pub video_fields: Vec<String>,
    pub image_fields: Vec<String>,
}

fn names(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

impl Default for CollectionAdapter {
    fn default() -> Self {
        Self {
            title_fields: names(&["title", "name", "question"]),
            body_fields: names(&["body", "content", "description", "answer", "text"]),
            slug_fields: names(&["slug"]),
            video_fields: names(&["video_id", "youtube_id", "video_url"]),
            image_fields: names(&["image_url", "thumbnail_url", "image"]),
        }
    }
}

impl CollectionAdapter {
    pub fn project(&self, payload: &Map<String, Value>) -> ItemProjection {
        ItemProjection {
            title: first_text(payload, &self.title_fields).unwrap_or_default(),
            body: first_text(payload, &self.body_fields).unwrap_or_default(),
            slug: first_text(payload, &self.slug_fields),
            video_ref: first_text(payload, &self.video_fields),
            image_ref: first_text(payload, &self.image_fields),
        }
    }
}

fn first_text(payload: &Map<String, Value>, fields: &[String]) -> Option<String> {
    fields.iter().find_map(|field| match payload.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// ============ Aggregator ============

pub struct RetrievalAggregator {
    backend: Arc<dyn VectorBackend>,
    adapters: HashMap<String, CollectionAdapter>,
    default_adapter: CollectionAdapter,
    per_collection_timeout: Duration,
}

impl RetrievalAggregator {
    pub fn new(backend: Arc<dyn VectorBackend>, per_collection_timeout: Duration) -> Self {
        Self {
            backend,
            adapters: HashMap::new(),
            default_adapter: CollectionAdapter::default(),
            per_collection_timeout,
        }
    }

    /// Override payload projection for one collection.
    pub fn with_adapter(mut self, collection: &str, adapter: CollectionAdapter) -> Self {
        self.adapters.insert(collection.to_string(), adapter);
        self
    }

    fn adapter_for(&self, collection: &str) -> &CollectionAdapter {
        self.adapters.get(collection).unwrap_or(&self.default_adapter)
    }

    async fn search_one(&self, collection: &str, vector: &[f32], limit: usize) -> Result<Vec<RawHit>, BackendError> {
        tokio::time::timeout(self.per_collection_timeout, self.backend.search(collection, vector, limit))
            .await
            .map_err(|_| BackendError::Timeout(self.per_collection_timeout))?
    }

    /// Query every collection and return at most `top_k` items, best first.
    pub async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        collections: &[String],
    ) -> Result<Vec<RetrievedItem>, RetrievalError> {
        if collections.is_empty() {
            return Err(RetrievalError::NoCollections);
        }

        let outcomes = join_all(
            collections
                .iter()
                .map(|collection| self.search_one(collection, vector, top_k)),
        )
        .await;

        let mut items = Vec::new();
        let mut failed = Vec::new();
        for (collection, outcome) in collections.iter().zip(outcomes) {
            match outcome {
                Ok(hits) => {
                    log::debug!("collection {collection} returned {} hits", hits.len());
                    let adapter = self.adapter_for(collection);
                    items.extend(hits.into_iter().map(|hit| RetrievedItem {
                        payload: adapter.project(&hit.payload),
                        id: hit.id,
                        origin_collection: collection.clone(),
                        relevance_score: clamp_score(hit.score),
                    }));
                }
                Err(e) => {
                    log::warn!("collection {collection} failed, skipping: {:#}", e);
                    failed.push(collection.clone());
                }
            }
        }

        if failed.len() == collections.len() {
            return Err(RetrievalError::AllCollectionsFailed(failed));
        }

        items.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        items.truncate(top_k);
        Ok(items)
    }
}

fn clamp_score(score: f32) -> f32 {
    if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) }
}
