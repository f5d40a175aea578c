use async_trait::async_trait;
use dashmap::DashMap;
use mongodb::bson::{DateTime, doc};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::data_models::CacheDoc;
use crate::db::Database;
use crate::error::CacheError;
use crate::types::{NormalizedQuery, SearchResponse};

/// String key/value store with per-entry expiry.
///
/// Values are written whole and never patched, so concurrent writers of the
/// same key simply race to an identical overwrite.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// Hex SHA-256 of `text`, used to content-address cache keys.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============ In-memory store ============

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Process-local store backed by a concurrent map.
///
/// A stale entry is dropped when its key is read. Writes also sweep the whole
/// map once per sweep interval, so keys that are never read again do not
/// accumulate. An expiry of `None` means the TTL overflowed the clock and the
/// entry never expires.
pub struct MemoryStore {
    entries: DashMap<String, (String, Option<Instant>)>,
    sweep_interval: Duration,
    last_sweep: Mutex<Instant>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            sweep_interval,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Drop every expired entry if the sweep interval has elapsed. Skipped
    /// when another writer is already sweeping.
    fn maybe_sweep(&self, now: Instant) {
        let Ok(mut last_sweep) = self.last_sweep.try_lock() else {
            return;
        };
        if now.duration_since(*last_sweep) < self.sweep_interval {
            return;
        }
        *last_sweep = now;
        drop(last_sweep);

        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| is_live(*expires_at, now));
        let swept = before.saturating_sub(self.entries.len());
        if swept > 0 {
            log::debug!("swept {swept} expired cache entries");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            let (value, expires_at) = entry.value();
            if is_live(*expires_at, now) {
                return Ok(Some(value.clone()));
            }
        }
        // Either missing or stale; remove_if keeps a fresher concurrent write.
        self.entries
            .remove_if(key, |_, (_, expires_at)| !is_live(*expires_at, now));
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        self.entries
            .insert(key.to_string(), (value.to_string(), now.checked_add(ttl)));
        self.maybe_sweep(now);
        Ok(())
    }
}

fn is_live(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.is_none_or(|at| at > now)
}

// ============ MongoDB store ============

/// Store backed by a MongoDB collection with a TTL index on `expires_at`.
///
/// The TTL monitor only runs about once a minute, so reads also filter on
/// `expires_at` to keep expiry exact.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl KeyValueStore for MongoStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let filter = doc! {
            "_id": key,
            "expires_at": { "$gt": DateTime::now() },
        };
        let found = self.db.response_cache().find_one(filter).await?;
        Ok(found.map(|d| d.value))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheDoc::new(key.to_string(), value.to_string(), ttl);
        self.db
            .response_cache()
            .replace_one(doc! { "_id": key }, &entry)
            .upsert(true)
            .await?;
        Ok(())
    }
}

// ============ Result cache ============

/// Short-lived cache of fully assembled responses, keyed by the normalized
/// query.
///
/// Best-effort: backend failures and timeouts are logged and reported as a
/// miss (`get`) or silently dropped (`put`).
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    op_timeout: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration, op_timeout: Duration) -> Self {
        Self {
            store,
            ttl,
            op_timeout,
        }
    }

    pub fn key_for(query: &NormalizedQuery) -> String {
        format!("search:v1:{}", content_hash(query.as_str()))
    }

    pub async fn get(&self, query: &NormalizedQuery) -> Option<SearchResponse> {
        match self.try_get(query).await {
            Ok(hit) => hit,
            Err(e) => {
                log::warn!("result cache lookup failed, treating as miss: {:#}", e);
                None
            }
        }
    }

    pub async fn put(&self, query: &NormalizedQuery, response: &SearchResponse) {
        if let Err(e) = self.try_put(query, response).await {
            log::warn!("result cache write dropped: {:#}", e);
        }
    }

    async fn try_get(&self, query: &NormalizedQuery) -> Result<Option<SearchResponse>, CacheError> {
        let key = Self::key_for(query);
        let raw = tokio::time::timeout(self.op_timeout, self.store.get(&key))
            .await
            .map_err(|_| CacheError::Timeout)??;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn try_put(&self, query: &NormalizedQuery, response: &SearchResponse) -> Result<(), CacheError> {
        let key = Self::key_for(query);
        let raw = serde_json::to_string(response)?;
        tokio::time::timeout(self.op_timeout, self.store.set_ex(&key, &raw, self.ttl))
            .await
            .map_err(|_| CacheError::Timeout)?
    }
}
