use anyhow::{Context, Result, bail};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    Mongo,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub log_level: tracing::Level,

    pub mongo_uri: Option<String>,
    pub mongo_db_name: String,
    pub cache_backend: CacheBackendKind,

    pub embedding_api_url: String,
    pub embedding_api_key: String,
    pub embedding_model: String,

    pub vector_api_url: String,
    pub vector_api_key: String,

    pub generation_api_url: String,
    pub generation_api_key: String,
    pub generation_model: String,
    pub generation_temperature: f32,
    pub generation_max_tokens: u32,

    pub collections: Vec<String>,
    pub top_k: usize,
    pub related_query_count: usize,

    pub result_cache_ttl: Duration,
    pub embedding_cache_ttl: Duration,
    pub http_timeout: Duration,
    pub retrieval_timeout: Duration,
    pub sink_timeout: Duration,

    pub origin_hash_salt: String,
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get_or = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let cache_backend = match get_or("CACHE_BACKEND", "memory").to_lowercase().as_str() {
            "memory" => CacheBackendKind::Memory,
            "mongo" | "mongodb" => CacheBackendKind::Mongo,
            other => bail!("Unknown CACHE_BACKEND '{other}'. Must be memory or mongo."),
        };

        let collections: Vec<String> = get_or("SEARCH_COLLECTIONS", "techniques,videos,articles,faqs")
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let config = Config {
            bind_addr: get_or("BIND_ADDR", "0.0.0.0:8080"),
            log_level: parse(&lookup, "LOG_LEVEL", tracing::Level::INFO)?,
            mongo_uri: lookup("MONGO_URI").filter(|v| !v.trim().is_empty()),
            mongo_db_name: get_or("MONGO_DB_NAME", "kata"),
            cache_backend,
            embedding_api_url: get_or("EMBEDDING_API_URL", "https://api.openai.com/v1"),
            embedding_api_key: get_or("EMBEDDING_API_KEY", ""),
            embedding_model: get_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            vector_api_url: get_or("VECTOR_API_URL", "http://localhost:6333"),
            vector_api_key: get_or("VECTOR_API_KEY", ""),
            generation_api_url: get_or("GENERATION_API_URL", "https://api.openai.com/v1"),
            generation_api_key: get_or("GENERATION_API_KEY", ""),
            generation_model: get_or("GENERATION_MODEL", "gpt-4o-mini"),
            generation_temperature: parse(&lookup, "GENERATION_TEMPERATURE", 0.3)?,
            generation_max_tokens: parse(&lookup, "GENERATION_MAX_TOKENS", 800)?,
            collections,
            top_k: parse(&lookup, "SEARCH_TOP_K", 10)?,
            related_query_count: parse(&lookup, "RELATED_QUERY_COUNT", 4)?,
            result_cache_ttl: secs(&lookup, "RESULT_CACHE_TTL_SECS", 300)?,
            embedding_cache_ttl: secs(&lookup, "EMBEDDING_CACHE_TTL_SECS", 86_400)?,
            http_timeout: secs(&lookup, "HTTP_TIMEOUT_SECS", 15)?,
            retrieval_timeout: secs(&lookup, "RETRIEVAL_TIMEOUT_SECS", 5)?,
            sink_timeout: secs(&lookup, "SINK_TIMEOUT_SECS", 2)?,
            origin_hash_salt: get_or("ORIGIN_HASH_SALT", ""),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.collections.is_empty() {
            bail!("SEARCH_COLLECTIONS must name at least one collection");
        }
        if self.top_k == 0 {
            bail!("SEARCH_TOP_K must be >= 1");
        }
        if !(0.0..=2.0).contains(&self.generation_temperature) {
            bail!("GENERATION_TEMPERATURE must be in [0.0, 2.0]");
        }
        if self.cache_backend == CacheBackendKind::Mongo && self.mongo_uri.is_none() {
            bail!("CACHE_BACKEND=mongo requires MONGO_URI");
        }
        Ok(())
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: '{raw}'")),
        None => Ok(default),
    }
}

fn secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse(lookup, key, default).map(Duration::from_secs)
}
