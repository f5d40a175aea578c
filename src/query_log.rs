use async_trait::async_trait;

use crate::cache::content_hash;
use crate::data_models::{QueryLogDoc, UsageDoc};
use crate::db::{Database, Repository};
use crate::error::LogError;
use crate::types::{QueryLogRecord, UsageRecord};

/// Append-only audit trail of pipeline invocations.
#[async_trait]
pub trait QueryLogSink: Send + Sync {
    async fn append(&self, record: &QueryLogRecord) -> Result<(), LogError>;
}

/// Append-only store of generation cost records.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, usage: &UsageRecord) -> Result<(), LogError>;
}

/// Salted SHA-256 of a network address. The raw address is never persisted.
pub fn hash_origin(address: &str, salt: &str) -> String {
    content_hash(&format!("{salt}:{}", address.trim()))
}

pub struct MongoQueryLogSink {
    repo: Repository<QueryLogDoc>,
}

impl MongoQueryLogSink {
    pub fn new(db: &Database) -> Self {
        Self {
            repo: Repository::new(db.query_logs()),
        }
    }
}

#[async_trait]
impl QueryLogSink for MongoQueryLogSink {
    async fn append(&self, record: &QueryLogRecord) -> Result<(), LogError> {
        self.repo.insert(&QueryLogDoc::from(record)).await?;
        Ok(())
    }
}

pub struct MongoUsageSink {
    repo: Repository<UsageDoc>,
}

impl MongoUsageSink {
    pub fn new(db: &Database) -> Self {
        Self {
            repo: Repository::new(db.usage_records()),
        }
    }
}

#[async_trait]
impl UsageSink for MongoUsageSink {
    async fn record(&self, usage: &UsageRecord) -> Result<(), LogError> {
        self.repo.insert(&UsageDoc::from(usage)).await?;
        Ok(())
    }
}

/// Writes records to the application log only. Used when no MongoDB is
/// configured.
#[derive(Debug, Default)]
pub struct LogOnlySink;

#[async_trait]
impl QueryLogSink for LogOnlySink {
    async fn append(&self, record: &QueryLogRecord) -> Result<(), LogError> {
        log::info!(
            "query request_id={} succeeded={} degraded={} cached={} latency_ms={} query={:?}{}",
            record.request_id,
            record.succeeded,
            record.degraded,
            record.cached,
            record.latency_ms,
            record.normalized_query.as_deref().unwrap_or(&record.original_query),
            record
                .error_detail
                .as_deref()
                .map(|e| format!(" error={e:?}"))
                .unwrap_or_default()
        );
        Ok(())
    }
}

#[async_trait]
impl UsageSink for LogOnlySink {
    async fn record(&self, usage: &UsageRecord) -> Result<(), LogError> {
        log::info!(
            "usage model={} purpose={:?} input_tokens={} output_tokens={} cost_usd={:.6}",
            usage.model_id,
            usage.purpose,
            usage.input_tokens,
            usage.output_tokens,
            usage.cost_usd
        );
        Ok(())
    }
}
