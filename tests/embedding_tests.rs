use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use kata::cache::MemoryStore;
use kata::embedding::{EmbeddingBackend, EmbeddingClient};
use kata::error::{BackendError, EmbeddingError};
use kata::types::EmbeddingVector;

mod test_helpers;
use test_helpers::*;

fn client(backend: Arc<FakeEmbedding>, ttl: Duration) -> EmbeddingClient {
    EmbeddingClient::new(backend, Arc::new(MemoryStore::new()), ttl, Duration::from_secs(1))
}

#[tokio::test]
async fn test_embed_twice_calls_backend_once() {
    let backend = Arc::new(FakeEmbedding::default());
    let client = client(backend.clone(), Duration::from_secs(86_400));

    let first = client.embed("karate basics").await.unwrap();
    let second = client.embed("karate basics").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first, FakeEmbedding::vector_for("karate basics"));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_expired_vector_is_refetched() {
    let backend = Arc::new(FakeEmbedding::default());
    let client = client(backend.clone(), Duration::from_millis(30));

    client.embed("kata").await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    client.embed("kata").await.unwrap();

    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_batch_sends_only_uncached_subset_and_keeps_order() {
    let backend = Arc::new(FakeEmbedding::default());
    let client = client(backend.clone(), Duration::from_secs(86_400));

    client.embed("b").await.unwrap();

    let texts: Vec<String> = ["a", "b", "c d"].iter().map(|s| s.to_string()).collect();
    let vectors = client.embed_batch(&texts).await.unwrap();

    assert_eq!(
        vectors,
        texts.iter().map(|t| FakeEmbedding::vector_for(t)).collect::<Vec<_>>()
    );
    assert_eq!(backend.calls(), 2);
    let batches = backend.batches.lock().unwrap().clone();
    assert_eq!(batches[1], vec!["a".to_string(), "c d".to_string()]);

    // Everything is cached now.
    client.embed_batch(&texts).await.unwrap();
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_backend_failure_is_an_embedding_error() {
    let backend = Arc::new(FakeEmbedding::failing());
    let client = client(backend, Duration::from_secs(60));

    let err = client.embed("karate basics").await.unwrap_err();
    assert!(matches!(err, EmbeddingError::Backend(_)));
}

#[tokio::test]
async fn test_broken_cache_falls_through_to_backend() {
    let backend = Arc::new(FakeEmbedding::default());
    let client = EmbeddingClient::new(
        backend.clone(),
        Arc::new(CountingStore::broken()),
        Duration::from_secs(60),
        Duration::from_secs(1),
    );

    client.embed("karate basics").await.unwrap();
    client.embed("karate basics").await.unwrap();
    assert_eq!(backend.calls(), 2);
}

/// Answers with a vector of `dims[i]` floats for the i-th text of a batch.
struct FixedDimsEmbedding {
    dims: Vec<usize>,
}

#[async_trait]
impl EmbeddingBackend for FixedDimsEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, BackendError> {
        Ok(texts
            .iter()
            .zip(self.dims.iter().cycle())
            .map(|(_, &dim)| vec![0.5; dim])
            .collect())
    }

    fn model_name(&self) -> &str {
        "fake-embed"
    }
}

#[tokio::test]
async fn test_ragged_batch_is_rejected_and_not_cached() {
    let store = Arc::new(MemoryStore::new());
    let client = EmbeddingClient::new(
        Arc::new(FixedDimsEmbedding { dims: vec![3, 4] }),
        store.clone(),
        Duration::from_secs(60),
        Duration::from_secs(1),
    );

    let texts = vec!["a".to_string(), "b".to_string()];
    let err = client.embed_batch(&texts).await.unwrap_err();

    assert!(matches!(err, EmbeddingError::DimensionMismatch { expected: 3, got: 4 }));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_fresh_vectors_must_match_cached_dimension() {
    let store = Arc::new(MemoryStore::new());
    let cached = EmbeddingClient::new(
        Arc::new(FakeEmbedding::default()),
        store.clone(),
        Duration::from_secs(60),
        Duration::from_secs(1),
    );
    cached.embed("a").await.unwrap();

    let wider = EmbeddingClient::new(
        Arc::new(FixedDimsEmbedding { dims: vec![4] }),
        store.clone(),
        Duration::from_secs(60),
        Duration::from_secs(1),
    );
    let texts = vec!["a".to_string(), "b".to_string()];
    let err = wider.embed_batch(&texts).await.unwrap_err();

    assert!(matches!(err, EmbeddingError::DimensionMismatch { expected: 3, got: 4 }));
}
