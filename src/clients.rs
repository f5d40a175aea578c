use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{KeyValueStore, MemoryStore, MongoStore, ResultCache};
use crate::config::{CacheBackendKind, Config};
use crate::db::Database;
use crate::embedding::{EmbeddingBackend, EmbeddingClient, HttpEmbeddingBackend};
use crate::query_log::{LogOnlySink, MongoQueryLogSink, MongoUsageSink, QueryLogSink, UsageSink};
use crate::retrieval::{HttpVectorBackend, RetrievalAggregator, VectorBackend};
use crate::synthesizer::{AnswerSynthesizer, GenerationBackend, HttpGenerationBackend};

/// Every external collaborator the pipeline talks to, built once at startup
/// and handed to [`crate::pipeline::SearchPipeline`].
pub struct ClientBundle {
    pub result_cache: ResultCache,
    pub embedder: EmbeddingClient,
    pub retriever: RetrievalAggregator,
    pub synthesizer: AnswerSynthesizer,
    pub query_log: Arc<dyn QueryLogSink>,
}

/// Raw backends and stores from which a [`ClientBundle`] is assembled.
/// Tests substitute fakes here.
pub struct Backends {
    pub embedding: Arc<dyn EmbeddingBackend>,
    pub vector: Arc<dyn VectorBackend>,
    pub generation: Arc<dyn GenerationBackend>,
    pub store: Arc<dyn KeyValueStore>,
    pub query_log: Arc<dyn QueryLogSink>,
    pub usage: Arc<dyn UsageSink>,
}

impl ClientBundle {
    pub fn assemble(backends: Backends, config: &Config) -> Self {
        ClientBundle {
            result_cache: ResultCache::new(
                backends.store.clone(),
                config.result_cache_ttl,
                config.sink_timeout,
            ),
            embedder: EmbeddingClient::new(
                backends.embedding,
                backends.store,
                config.embedding_cache_ttl,
                config.sink_timeout,
            ),
            retriever: RetrievalAggregator::new(backends.vector, config.retrieval_timeout),
            synthesizer: AnswerSynthesizer::new(backends.generation, backends.usage, config.sink_timeout),
            query_log: backends.query_log,
        }
    }

    /// Connect the production HTTP backends and, when configured, MongoDB.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.http_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let db = match &config.mongo_uri {
            Some(uri) => {
                let db = Database::new(uri, &config.mongo_db_name).await?;
                db.ensure_indexes().await?;
                Some(db)
            }
            None => {
                log::warn!("MONGO_URI not set; query logs and usage records go to the application log");
                None
            }
        };

        let store: Arc<dyn KeyValueStore> = match (config.cache_backend, &db) {
            (CacheBackendKind::Mongo, Some(db)) => Arc::new(MongoStore::new(db.clone())),
            _ => Arc::new(MemoryStore::new()),
        };

        let (query_log, usage): (Arc<dyn QueryLogSink>, Arc<dyn UsageSink>) = match &db {
            Some(db) => (
                Arc::new(MongoQueryLogSink::new(db)),
                Arc::new(MongoUsageSink::new(db)),
            ),
            None => (Arc::new(LogOnlySink), Arc::new(LogOnlySink)),
        };

        let backends = Backends {
            embedding: Arc::new(HttpEmbeddingBackend::new(
                http.clone(),
                &config.embedding_api_url,
                &config.embedding_api_key,
                &config.embedding_model,
                config.http_timeout,
            )),
            vector: Arc::new(HttpVectorBackend::new(
                http.clone(),
                &config.vector_api_url,
                &config.vector_api_key,
                config.retrieval_timeout,
            )),
            generation: Arc::new(HttpGenerationBackend::new(
                http,
                &config.generation_api_url,
                &config.generation_api_key,
                config.http_timeout,
            )),
            store,
            query_log,
            usage,
        };

        Ok(Self::assemble(backends, config))
    }
}
