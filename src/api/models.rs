use serde::{Deserialize, Serialize};

use crate::error::QuerySearchError;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub bypass_cache: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

impl From<&QuerySearchError> for ErrorBody {
    fn from(e: &QuerySearchError) -> Self {
        let code = match e {
            QuerySearchError::Validation(_) => "bad_request",
            QuerySearchError::Embedding(_) => "embedding_unavailable",
            QuerySearchError::Retrieval(_) => "retrieval_unavailable",
        };
        ErrorBody::new(code, e.to_string())
    }
}
