use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed-dimension query/content embedding.
pub type EmbeddingVector = Vec<f32>;

/// One inbound search call. Transient.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub requester_id: Option<String>,
    /// Raw network address of the caller; hashed before it is persisted.
    pub origin_address: Option<String>,
    pub bypass_cache: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Lowercased, trimmed query text, 1..=500 characters.
///
/// Only [`crate::normalizer::normalize`] constructs this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedQuery(pub(crate) String);

impl NormalizedQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NormalizedQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed projection of a heterogeneous collection payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemProjection {
    pub title: String,
    pub body: String,
    pub slug: Option<String>,
    pub video_ref: Option<String>,
    pub image_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub id: String,
    pub origin_collection: String,
    pub payload: ItemProjection,
    /// Clamped to `[0, 1]`.
    pub relevance_score: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedAnswer {
    pub text: String,
    pub model_id: String,
    pub token_usage: TokenUsage,
    pub latency_ms: u64,
    /// Set when the answer was built extractively because generation failed.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
    pub source_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRef {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    pub alt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaRefs {
    pub videos: Vec<VideoRef>,
    pub images: Vec<ImageRef>,
}

/// Fully assembled pipeline output. Never mutated after assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub answer: SynthesizedAnswer,
    pub sources: Vec<SourceRef>,
    pub media: MediaRefs,
    pub related_queries: Vec<String>,
    pub latency_ms: u64,
    pub cached: bool,
}

/// Audit record, written once per non-cache-hit invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogRecord {
    pub request_id: String,
    pub original_query: String,
    pub normalized_query: Option<String>,
    pub requester_id: Option<String>,
    pub hashed_origin: Option<String>,
    pub latency_ms: u64,
    pub cached: bool,
    pub succeeded: bool,
    pub degraded: bool,
    pub error_detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsagePurpose {
    Answer,
    RelatedQueries,
}

/// Cost accounting for a single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub model_id: String,
    pub purpose: UsagePurpose,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}
