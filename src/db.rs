use anyhow::{Context, Result};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{
    Client, Collection, Database as MongoDatabase, IndexModel,
    bson::{Document, doc},
};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

use crate::data_models::{CacheDoc, QueryLogDoc, UsageDoc};

/// Collection names as constants for consistency
pub mod collections {
    pub const QUERY_LOGS: &str = "query_logs";
    pub const USAGE_RECORDS: &str = "usage_records";
    pub const RESPONSE_CACHE: &str = "response_cache";
}

/// Database wrapper providing connection management and collection access
#[derive(Debug, Clone)]
pub struct Database {
    client: Client,
    db: MongoDatabase,
}

impl Database {
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        let client_options = ClientOptions::parse(uri)
            .await
            .context("Failed to parse MongoDB connection string")?;

        let client =
            Client::with_options(client_options).context("Failed to create MongoDB client")?;

        // Ping the database to verify connection
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .context("Failed to connect to MongoDB")?;

        log::info!("Connected to MongoDB database: {}", db_name);

        let db = client.database(db_name);

        Ok(Self { client, db })
    }

    /// Get a typed collection by name
    pub fn collection<T>(&self, name: &str) -> Collection<T>
    where
        T: Send + Sync,
    {
        self.db.collection(name)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn query_logs(&self) -> Collection<QueryLogDoc> {
        self.collection(collections::QUERY_LOGS)
    }

    pub fn usage_records(&self) -> Collection<UsageDoc> {
        self.collection(collections::USAGE_RECORDS)
    }

    pub fn response_cache(&self) -> Collection<CacheDoc> {
        self.collection(collections::RESPONSE_CACHE)
    }

    /// Create the indexes the pipeline relies on. Idempotent.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let ttl = IndexModel::builder()
            .keys(doc! { "expires_at": 1 })
            .options(
                IndexOptions::builder()
                    .expire_after(Some(Duration::ZERO))
                    .build(),
            )
            .build();
        self.response_cache()
            .create_index(ttl)
            .await
            .context("Failed to create cache TTL index")?;

        let by_time = IndexModel::builder()
            .keys(doc! { "created_at": -1 })
            .build();
        self.query_logs()
            .create_index(by_time)
            .await
            .context("Failed to create query log index")?;

        Ok(())
    }
}

/// Typed collection handle with the handful of operations the sinks need.
pub struct Repository<T>
where
    T: Send + Sync,
{
    collection: Collection<T>,
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    pub fn new(collection: Collection<T>) -> Self {
        Self { collection }
    }

    /// Append a single document
    pub async fn insert(&self, doc: &T) -> mongodb::error::Result<()> {
        self.collection.insert_one(doc).await?;
        Ok(())
    }

    /// Find all documents matching a filter
    pub async fn find(&self, filter: Document) -> mongodb::error::Result<Vec<T>> {
        use futures::TryStreamExt;

        self.collection.find(filter).await?.try_collect().await
    }

    /// Count documents matching a filter
    pub async fn count(&self, filter: Document) -> mongodb::error::Result<u64> {
        self.collection.count_documents(filter).await
    }
}

// =============================================================================
// Test utilities
// =============================================================================
