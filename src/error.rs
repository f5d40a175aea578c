use std::time::Duration;

use thiserror::Error;

/// Transport-level failure of any outbound collaborator call.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed backend response: {0}")]
    Decode(String),
}

/// Raised by the normalizer before any billable call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("query must not be empty")]
    Empty,

    #[error("query is {0} characters long; the maximum is {max}", max = crate::normalizer::MAX_QUERY_CHARS)]
    TooLong(usize),
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding backend failed: {0}")]
    Backend(#[from] BackendError),

    #[error("embedding backend returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("embedding backend returned an empty vector")]
    EmptyVector,

    #[error("embedding backend returned a {got}-dimensional vector; expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("no collections configured for retrieval")]
    NoCollections,

    #[error("all {} collections failed: {}", .0.len(), .0.join(", "))]
    AllCollectionsFailed(Vec<String>),
}

/// Never escapes the synthesizer; it selects the extractive fallback.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("generation backend failed: {0}")]
    Backend(#[from] BackendError),

    #[error("generation backend returned no choices")]
    NoChoices,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache value could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache operation timed out")]
    Timeout,
}

impl From<mongodb::error::Error> for CacheError {
    fn from(e: mongodb::error::Error) -> Self {
        CacheError::Unavailable(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum LogError {
    #[error("log sink unavailable: {0}")]
    Unavailable(String),

    #[error("log write timed out")]
    Timeout,
}

impl From<mongodb::error::Error> for LogError {
    fn from(e: mongodb::error::Error) -> Self {
        LogError::Unavailable(e.to_string())
    }
}

/// The only errors that abort a search.
#[derive(Error, Debug)]
pub enum QuerySearchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}
