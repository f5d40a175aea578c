use mongodb::bson::{DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

use crate::types::{QueryLogRecord, UsagePurpose, UsageRecord};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QueryLogDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub request_id: String,
    pub original_query: String,
    pub normalized_query: Option<String>,
    pub requester_id: Option<String>,
    pub hashed_origin: Option<String>,
    pub latency_ms: i64,
    pub cached: bool,
    pub succeeded: bool,
    pub degraded: bool,
    pub error_detail: Option<String>,
    pub created_at: DateTime,
}

impl From<&QueryLogRecord> for QueryLogDoc {
    fn from(record: &QueryLogRecord) -> Self {
        QueryLogDoc {
            id: ObjectId::new(),
            request_id: record.request_id.clone(),
            original_query: record.original_query.clone(),
            normalized_query: record.normalized_query.clone(),
            requester_id: record.requester_id.clone(),
            hashed_origin: record.hashed_origin.clone(),
            latency_ms: record.latency_ms as i64,
            cached: record.cached,
            succeeded: record.succeeded,
            degraded: record.degraded,
            error_detail: record.error_detail.clone(),
            created_at: DateTime::from_millis(record.timestamp.timestamp_millis()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UsageDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub model_id: String,
    pub purpose: UsagePurpose,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub latency_ms: i64,
    pub created_at: DateTime,
}

impl From<&UsageRecord> for UsageDoc {
    fn from(record: &UsageRecord) -> Self {
        UsageDoc {
            id: ObjectId::new(),
            model_id: record.model_id.clone(),
            purpose: record.purpose,
            input_tokens: record.input_tokens as i64,
            output_tokens: record.output_tokens as i64,
            cost_usd: record.cost_usd,
            latency_ms: record.latency_ms as i64,
            created_at: DateTime::from_millis(record.timestamp.timestamp_millis()),
        }
    }
}

/// Key/value cache entry. `_id` is the cache key; a TTL index on `expires_at`
/// lets MongoDB reap stale entries.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheDoc {
    #[serde(rename = "_id")]
    pub key: String,
    pub value: String,
    pub expires_at: DateTime,
}

impl CacheDoc {
    pub fn new(key: String, value: String, ttl: std::time::Duration) -> CacheDoc {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = DateTime::from_millis(DateTime::now().timestamp_millis().saturating_add(ttl_millis));
        CacheDoc {
            key,
            value,
            expires_at,
        }
    }
}
