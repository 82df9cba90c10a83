//! In-process vector store for offline use and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{VectorStore, check_width, rank};
use crate::error::VectorStoreError;
use crate::models::{Document, Metric, ScoredDocument, VectorCollection};

type Namespaces = Arc<RwLock<HashMap<String, HashMap<String, Document>>>>;

/// Keeps every namespace of one index in a map guarded by an async lock.
/// Each store reads and writes only its collection's namespace.
#[derive(Debug)]
pub struct MemoryStore {
    collection: VectorCollection,
    namespaces: Namespaces,
}

impl MemoryStore {
    pub fn new(collection: VectorCollection) -> Self {
        Self {
            collection,
            namespaces: Namespaces::default(),
        }
    }

    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.collection.metric {
            Metric::Cosine => cosine_similarity(a, b),
            Metric::DotProduct => dot(a, b),
            // Negated so that larger is still better
            Metric::Euclidean => -a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn collection(&self) -> &VectorCollection {
        &self.collection
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        Ok(true)
    }

    async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(self.collection.namespace.clone())
            .or_default();
        Ok(())
    }

    async fn upsert(&self, documents: &[Document]) -> Result<usize, VectorStoreError> {
        for doc in documents {
            check_width(&self.collection, &doc.embedding, "document embedding")?;
        }

        let mut namespaces = self.namespaces.write().await;
        let namespace = namespaces
            .entry(self.collection.namespace.clone())
            .or_default();
        for doc in documents {
            namespace.insert(doc.id.clone(), doc.clone());
        }
        Ok(documents.len())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>, VectorStoreError> {
        check_width(&self.collection, embedding, "query embedding")?;

        let namespaces = self.namespaces.read().await;
        let Some(namespace) = namespaces.get(&self.collection.namespace) else {
            return Ok(Vec::new());
        };

        let scored = namespace
            .values()
            .map(|doc| {
                let score = self.score(&doc.embedding, embedding);
                let mut document = doc.clone();
                document.embedding.clear();
                ScoredDocument::new(document, score)
            })
            .collect();
        Ok(rank(scored, top_k))
    }

    async fn count(&self) -> Result<u64, VectorStoreError> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(&self.collection.namespace)
            .map_or(0, |ns| ns.len() as u64))
    }

    async fn delete_all(&self) -> Result<(), VectorStoreError> {
        let mut namespaces = self.namespaces.write().await;
        namespaces.remove(&self.collection.namespace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(metric: Metric) -> MemoryStore {
        MemoryStore::new(VectorCollection::new("test", "default", 2, metric))
    }

    fn doc(content: &str, embedding: Vec<f32>) -> Document {
        let mut doc = Document::new(content, Default::default());
        doc.embedding = embedding;
        doc
    }

    #[tokio::test]
    async fn test_query_ranks_by_cosine() {
        let store = store(Metric::Cosine);
        store
            .upsert(&[
                doc("east", vec![1.0, 0.0]),
                doc("north", vec![0.0, 1.0]),
                doc("north-east", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = store.query(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document.content, "east");
        assert_eq!(results[1].document.content, "north-east");
        assert!(results[0].document.embedding.is_empty());
    }

    #[tokio::test]
    async fn test_euclidean_prefers_nearest() {
        let store = store(Metric::Euclidean);
        store
            .upsert(&[doc("near", vec![1.0, 1.0]), doc("far", vec![10.0, 10.0])])
            .await
            .unwrap();
        let results = store.query(&[0.0, 0.0], 1).await.unwrap();
        assert_eq!(results[0].document.content, "near");
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let store = store(Metric::Cosine);
        let a = doc("same", vec![1.0, 0.0]);
        store.upsert(&[a.clone()]).await.unwrap();
        store.upsert(&[a]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    /// Two stores over the same index storage, bound to different namespaces.
    fn sharing_storage() -> (MemoryStore, MemoryStore) {
        let a = MemoryStore::new(VectorCollection::new("idx", "a", 2, Metric::Cosine));
        let b = MemoryStore {
            collection: VectorCollection::new("idx", "b", 2, Metric::Cosine),
            namespaces: Arc::clone(&a.namespaces),
        };
        (a, b)
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let (a, b) = sharing_storage();
        a.upsert(&[doc("in a", vec![1.0, 0.0])]).await.unwrap();
        b.upsert(&[doc("in b", vec![1.0, 0.0]), doc("also b", vec![0.9, 0.1])])
            .await
            .unwrap();

        assert_eq!(a.count().await.unwrap(), 1);
        assert_eq!(b.count().await.unwrap(), 2);

        let results = a.query(&[1.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.content, "in a");
        assert!(
            b.query(&[1.0, 0.0], 10)
                .await
                .unwrap()
                .iter()
                .all(|r| r.document.content != "in a")
        );

        a.delete_all().await.unwrap();
        assert_eq!(a.count().await.unwrap(), 0);
        assert!(a.query(&[1.0, 0.0], 3).await.unwrap().is_empty());
        assert_eq!(b.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_wrong_width_is_rejected() {
        let store = store(Metric::Cosine);
        let err = store
            .upsert(&[doc("wide", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expects 2"));
        assert!(store.query(&[1.0], 1).await.is_err());
    }
}
