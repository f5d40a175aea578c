//! Text to vector conversion.
//!
//! [`EmbeddingClient`] puts a content-addressed cache in front of an
//! [`EmbeddingBackend`]. Vectors are keyed by model and the SHA-256 of the
//! text, so identical text embedded by any request is served from the cache
//! until its TTL runs out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{KeyValueStore, content_hash};
use crate::error::{BackendError, CacheError, EmbeddingError};
use crate::types::EmbeddingVector;

/// A remote text embedding model.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, BackendError>;

    fn model_name(&self) -> &str;
}

// ============ OpenAI-compatible HTTP backend ============

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Calls `POST {endpoint}/embeddings` with bearer auth.
pub struct HttpEmbeddingBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl HttpEmbeddingBackend {
    pub fn new(client: reqwest::Client, endpoint: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, BackendError> {
        let url = format!("{}/embeddings", self.endpoint);
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_reqwest(e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        // Some compatible servers return data out of order; honour `index`.
        if parsed.data.iter().all(|d| d.index.is_some()) {
            parsed.data.sort_by_key(|d| d.index);
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Map a reqwest failure onto the transport taxonomy.
pub(crate) fn classify_reqwest(e: reqwest::Error, timeout: Duration) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(timeout)
    } else {
        BackendError::Network(e)
    }
}

// ============ Cached client ============

pub struct EmbeddingClient {
    backend: Arc<dyn EmbeddingBackend>,
    cache: Arc<dyn KeyValueStore>,
    ttl: Duration,
    cache_timeout: Duration,
}

impl EmbeddingClient {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        cache: Arc<dyn KeyValueStore>,
        ttl: Duration,
        cache_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            cache,
            ttl,
            cache_timeout,
        }
    }

    fn cache_key(&self, text: &str) -> String {
        format!("emb:{}:{}", self.backend.model_name(), content_hash(text))
    }

    /// Embed a single text, consulting the cache first.
    pub async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            got: 0,
        })
    }

    /// Embed many texts. Only the uncached subset is sent to the backend, in
    /// one call; results come back in input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        let mut slots: Vec<Option<EmbeddingVector>> = Vec::with_capacity(texts.len());
        let mut missing: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let cached = self.cache_get(&self.cache_key(text)).await;
            if cached.is_none() {
                missing.push(i);
            }
            slots.push(cached);
        }

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            log::debug!(
                "embedding {} of {} texts with {}",
                batch.len(),
                texts.len(),
                self.backend.model_name()
            );

            let fresh = self.backend.embed_batch(&batch).await?;
            if fresh.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    got: fresh.len(),
                });
            }
            if fresh.iter().any(|v| v.is_empty()) {
                return Err(EmbeddingError::EmptyVector);
            }
            check_dimensions(slots.iter().flatten().chain(fresh.iter()))?;

            for (i, vector) in missing.into_iter().zip(fresh) {
                self.cache_put(&self.cache_key(&texts[i]), &vector).await;
                slots[i] = Some(vector);
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    async fn cache_get(&self, key: &str) -> Option<EmbeddingVector> {
        match self.try_cache_get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                log::warn!("embedding cache lookup failed, treating as miss: {:#}", e);
                None
            }
        }
    }

    async fn cache_put(&self, key: &str, vector: &EmbeddingVector) {
        if let Err(e) = self.try_cache_put(key, vector).await {
            log::warn!("embedding cache write dropped: {:#}", e);
        }
    }

    async fn try_cache_get(&self, key: &str) -> Result<Option<EmbeddingVector>, CacheError> {
        let raw = tokio::time::timeout(self.cache_timeout, self.cache.get(key))
            .await
            .map_err(|_| CacheError::Timeout)??;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn try_cache_put(&self, key: &str, vector: &EmbeddingVector) -> Result<(), CacheError> {
        let raw = serde_json::to_string(vector)?;
        tokio::time::timeout(self.cache_timeout, self.cache.set_ex(key, &raw, self.ttl))
            .await
            .map_err(|_| CacheError::Timeout)?
    }
}

/// Every vector in one response must share a single dimension.
fn check_dimensions<'a>(vectors: impl IntoIterator<Item = &'a EmbeddingVector>) -> Result<(), EmbeddingError> {
    let mut vectors = vectors.into_iter();
    let Some(first) = vectors.next() else {
        return Ok(());
    };
    match vectors.find(|v| v.len() != first.len()) {
        Some(other) => Err(EmbeddingError::DimensionMismatch {
            expected: first.len(),
            got: other.len(),
        }),
        None => Ok(()),
    }
}
