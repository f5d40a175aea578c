//! Query pipeline orchestration.
//!
//! ```text
//! normalize ─▶ cache ──hit──▶ return (cached = true)
//!                 │ miss
//!                 ▼
//!              embed ─▶ retrieve (fan-out) ─▶ ┬─ synthesize ─┬─▶ project ─▶ cache put ─▶ log ─▶ return
//!                                             └─ related ────┘
//! ```
//!
//! Only validation, embedding and total retrieval failure abort a search.
//! Everything after retrieval degrades instead of failing.

use chrono::Utc;
use nanoid::nanoid;
use std::time::Instant;
use tracing::Instrument;

use crate::clients::ClientBundle;
use crate::config::Config;
use crate::error::QuerySearchError;
use crate::media::{project_media, project_sources};
use crate::normalizer::normalize;
use crate::query_log::hash_origin;
use crate::types::{NormalizedQuery, QueryLogRecord, SearchRequest, SearchResponse};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub collections: Vec<String>,
    pub top_k: usize,
    pub model_id: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub related_query_count: usize,
    pub origin_hash_salt: String,
    pub log_timeout: std::time::Duration,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        PipelineSettings {
            collections: config.collections.clone(),
            top_k: config.top_k,
            model_id: config.generation_model.clone(),
            temperature: config.generation_temperature,
            max_tokens: config.generation_max_tokens,
            related_query_count: config.related_query_count,
            origin_hash_salt: config.origin_hash_salt.clone(),
            log_timeout: config.sink_timeout,
        }
    }
}

pub struct SearchPipeline {
    clients: ClientBundle,
    settings: PipelineSettings,
}

impl SearchPipeline {
    pub fn new(clients: ClientBundle, settings: PipelineSettings) -> Self {
        Self { clients, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Answer one search request.
    ///
    /// Fails only on [`QuerySearchError`]: invalid input, an embedding
    /// failure, or every collection failing. Cache hits return immediately
    /// and write no audit record; every other call that passes validation
    /// writes exactly one.
    pub async fn search_query(&self, request: SearchRequest) -> Result<SearchResponse, QuerySearchError> {
        let request_id = nanoid!(12);
        let span = tracing::info_span!("search_query", request_id = %request_id);
        self.run(request, request_id).instrument(span).await
    }

    async fn run(&self, request: SearchRequest, request_id: String) -> Result<SearchResponse, QuerySearchError> {
        let started = Instant::now();

        let normalized = normalize(&request.query).inspect_err(|e| {
            log::info!("rejected query: {e}");
        })?;

        if !request.bypass_cache {
            if let Some(hit) = self.clients.result_cache.get(&normalized).await {
                log::info!("cache hit for {:?}", normalized.as_str());
                return Ok(SearchResponse {
                    cached: true,
                    latency_ms: started.elapsed().as_millis() as u64,
                    ..hit
                });
            }
        }

        let outcome = self.execute(&request, &normalized, started).await;

        if let Ok(response) = &outcome {
            if !request.bypass_cache {
                self.clients.result_cache.put(&normalized, response).await;
            }
        }

        let record = self.log_record(&request, &normalized, request_id, &outcome, started);
        self.write_log(&record).await;

        match &outcome {
            Ok(response) => log::info!(
                "answered in {}ms with {} sources (degraded: {})",
                response.latency_ms,
                response.sources.len(),
                response.answer.degraded
            ),
            Err(e) => log::error!("search failed: {:#}", e),
        }

        outcome
    }

    async fn execute(
        &self,
        request: &SearchRequest,
        normalized: &NormalizedQuery,
        started: Instant,
    ) -> Result<SearchResponse, QuerySearchError> {
        let settings = &self.settings;

        let vector = self.clients.embedder.embed(normalized.as_str()).await?;

        let items = self
            .clients
            .retriever
            .search(&vector, settings.top_k, &settings.collections)
            .await?;
        log::debug!("retrieved {} items", items.len());

        let synthesizer = &self.clients.synthesizer;
        let (answer, related_queries) = tokio::join!(
            synthesizer.synthesize(
                &request.query,
                &items,
                &settings.model_id,
                settings.temperature,
                settings.max_tokens,
            ),
            synthesizer.related_queries(
                &request.query,
                &items,
                &settings.model_id,
                settings.related_query_count,
            ),
        );

        Ok(SearchResponse {
            answer,
            sources: project_sources(&items),
            media: project_media(&items),
            related_queries,
            latency_ms: started.elapsed().as_millis() as u64,
            cached: false,
        })
    }

    fn log_record(
        &self,
        request: &SearchRequest,
        normalized: &NormalizedQuery,
        request_id: String,
        outcome: &Result<SearchResponse, QuerySearchError>,
        started: Instant,
    ) -> QueryLogRecord {
        QueryLogRecord {
            request_id,
            original_query: request.query.clone(),
            normalized_query: Some(normalized.as_str().to_string()),
            requester_id: request.requester_id.clone(),
            hashed_origin: request
                .origin_address
                .as_deref()
                .map(|addr| hash_origin(addr, &self.settings.origin_hash_salt)),
            latency_ms: started.elapsed().as_millis() as u64,
            cached: false,
            succeeded: outcome.is_ok(),
            degraded: outcome.as_ref().is_ok_and(|r| r.answer.degraded),
            error_detail: outcome.as_ref().err().map(|e| format!("{e:#}")),
            timestamp: Utc::now(),
        }
    }

    /// Best-effort: failures and timeouts are logged and dropped.
    async fn write_log(&self, record: &QueryLogRecord) {
        match tokio::time::timeout(self.settings.log_timeout, self.clients.query_log.append(record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("query log record dropped: {:#}", e),
            Err(_) => log::warn!("query log record dropped: sink timed out"),
        }
    }
}
