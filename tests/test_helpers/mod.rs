#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kata::cache::{KeyValueStore, MemoryStore};
use kata::clients::{Backends, ClientBundle};
use kata::config::Config;
use kata::embedding::EmbeddingBackend;
use kata::error::{BackendError, CacheError, GenerationError, LogError};
use kata::pipeline::{PipelineSettings, SearchPipeline};
use kata::query_log::{QueryLogSink, UsageSink};
use kata::retrieval::{RawHit, VectorBackend};
use kata::synthesizer::{ChatCompletion, ChatRequest, GenerationBackend, Role};
use kata::types::{EmbeddingVector, QueryLogRecord, TokenUsage, UsageRecord};

pub fn payload(v: Value) -> Map<String, Value> {
    v.as_object().cloned().expect("payload must be a JSON object")
}

pub fn hit(id: &str, score: f32, payload_json: Value) -> RawHit {
    RawHit {
        id: id.to_string(),
        score,
        payload: payload(payload_json),
    }
}

// ============ Embedding ============

#[derive(Default)]
pub struct FakeEmbedding {
    pub calls: AtomicUsize,
    pub batches: Mutex<Vec<Vec<String>>>,
    pub fail: bool,
}

impl FakeEmbedding {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(text: &str) -> EmbeddingVector {
        vec![text.len() as f32, text.chars().filter(|c| *c == ' ').count() as f32, 1.0]
    }
}

#[async_trait]
impl EmbeddingBackend for FakeEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().unwrap().push(texts.to_vec());
        if self.fail {
            return Err(BackendError::Status {
                status: 503,
                body: "embedding model overloaded".into(),
            });
        }
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }

    fn model_name(&self) -> &str {
        "fake-embed"
    }
}

// ============ Vector ============

#[derive(Default)]
pub struct FakeVector {
    pub hits: HashMap<String, Vec<RawHit>>,
    pub failing: HashSet<String>,
    pub slow: HashSet<String>,
    pub calls: AtomicUsize,
}

impl FakeVector {
    pub fn with_hits(mut self, collection: &str, hits: Vec<RawHit>) -> Self {
        self.hits.insert(collection.to_string(), hits);
        self
    }

    pub fn failing_on(mut self, collection: &str) -> Self {
        self.failing.insert(collection.to_string());
        self
    }

    pub fn slow_on(mut self, collection: &str) -> Self {
        self.slow.insert(collection.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorBackend for FakeVector {
    async fn search(&self, collection: &str, _vector: &[f32], limit: usize) -> Result<Vec<RawHit>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.slow.contains(collection) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.failing.contains(collection) {
            return Err(BackendError::Status {
                status: 500,
                body: format!("collection {collection} is unavailable"),
            });
        }
        let mut hits = self.hits.get(collection).cloned().unwrap_or_default();
        hits.truncate(limit);
        Ok(hits)
    }
}

// ============ Generation ============

pub struct FakeGeneration {
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<ChatRequest>>,
    pub answer: String,
    pub related: String,
    pub fail_answer: bool,
    pub fail_related: bool,
}

impl Default for FakeGeneration {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            answer: "Start in a natural stance and practise kihon daily [1].".into(),
            related: "1. Kihon drills for beginners\n2. How to tie a karate belt\n3. First kata".into(),
            fail_answer: false,
            fail_related: false,
        }
    }
}

impl FakeGeneration {
    pub fn failing() -> Self {
        Self {
            fail_answer: true,
            fail_related: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for FakeGeneration {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        // The answer call carries a system persona; the related-query call does not.
        let is_answer = request.messages.first().is_some_and(|m| m.role == Role::System);
        let fail = if is_answer { self.fail_answer } else { self.fail_related };
        if fail {
            return Err(BackendError::Timeout(Duration::from_secs(15)).into());
        }

        Ok(ChatCompletion {
            text: if is_answer {
                self.answer.clone()
            } else {
                self.related.clone()
            },
            usage: TokenUsage {
                input_tokens: 900,
                output_tokens: 60,
            },
        })
    }
}

// ============ Stores and sinks ============

/// Memory store that counts operations and can be switched off.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub broken: bool,
}

impl CountingStore {
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Default::default()
        }
    }

    pub fn ops(&self) -> usize {
        self.gets.load(Ordering::SeqCst) + self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(CacheError::Unavailable("connection reset".into()));
        }
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(CacheError::Unavailable("connection reset".into()));
        }
        self.inner.set_ex(key, value, ttl).await
    }
}

#[derive(Default)]
pub struct RecordingLog {
    pub records: Mutex<Vec<QueryLogRecord>>,
    pub broken: bool,
}

impl RecordingLog {
    pub fn records(&self) -> Vec<QueryLogRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryLogSink for RecordingLog {
    async fn append(&self, record: &QueryLogRecord) -> Result<(), LogError> {
        if self.broken {
            return Err(LogError::Unavailable("document store offline".into()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingUsage {
    pub records: Mutex<Vec<UsageRecord>>,
    pub broken: bool,
}

#[async_trait]
impl UsageSink for RecordingUsage {
    async fn record(&self, usage: &UsageRecord) -> Result<(), LogError> {
        if self.broken {
            return Err(LogError::Unavailable("document store offline".into()));
        }
        self.records.lock().unwrap().push(usage.clone());
        Ok(())
    }
}

// ============ Harness ============

pub struct Harness {
    pub embedding: Arc<FakeEmbedding>,
    pub vector: Arc<FakeVector>,
    pub generation: Arc<FakeGeneration>,
    pub store: Arc<CountingStore>,
    pub log: Arc<RecordingLog>,
    pub usage: Arc<RecordingUsage>,
}

impl Harness {
    pub fn new(vector: FakeVector) -> Self {
        Self {
            embedding: Arc::new(FakeEmbedding::default()),
            vector: Arc::new(vector),
            generation: Arc::new(FakeGeneration::default()),
            store: Arc::new(CountingStore::default()),
            log: Arc::new(RecordingLog::default()),
            usage: Arc::new(RecordingUsage::default()),
        }
    }

    pub fn config(collections: &str) -> Config {
        let collections = collections.to_string();
        Config::from_lookup(move |key| match key {
            "SEARCH_COLLECTIONS" => Some(collections.clone()),
            "RETRIEVAL_TIMEOUT_SECS" => Some("1".into()),
            _ => None,
        })
        .expect("test config must be valid")
    }

    pub fn pipeline(&self, collections: &str) -> SearchPipeline {
        let config = Self::config(collections);
        let backends = Backends {
            embedding: self.embedding.clone(),
            vector: self.vector.clone(),
            generation: self.generation.clone(),
            store: self.store.clone(),
            query_log: self.log.clone(),
            usage: self.usage.clone(),
        };
        SearchPipeline::new(ClientBundle::assemble(backends, &config), PipelineSettings::from(&config))
    }

    /// Calls made to the embedding, vector and generation backends.
    pub fn backend_calls(&self) -> usize {
        self.embedding.calls() + self.vector.calls() + self.generation.calls()
    }
}

/// Two-collection corpus for "karate basics": one video with an id, one
/// article with an image.
pub fn karate_corpus() -> FakeVector {
    FakeVector::default()
        .with_hits(
            "videos",
            vec![hit(
                "vid-1",
                0.91,
                json!({
                    "title": "Karate Basics: Stances",
                    "description": "Walk through the three foundation stances.",
                    "video_id": "v1",
                }),
            )],
        )
        .with_hits(
            "articles",
            vec![hit(
                "art-7",
                0.84,
                json!({
                    "title": "Your First Month of Training",
                    "slug": "first-month",
                    "content": "Expect lots of kihon and a little kata.",
                    "image_url": "https://cdn.example/first-month.jpg",
                }),
            )],
        )
}
