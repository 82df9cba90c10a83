//! Qdrant vector store backend.
//!
//! One Qdrant collection per index; the namespace is a payload field that
//! every read, count and delete filters on.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointStruct, SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use tracing::info;
use uuid::Uuid;

use super::{CONTENT_FIELD, NAMESPACE_FIELD, VectorStore, check_width, rank};
use crate::error::VectorStoreError;
use crate::models::{Document, MetaValue, Metadata, Metric, ScoredDocument, VectorCollection};

/// Payload field keeping the document id when it is not a UUID.
const DOCUMENT_ID_FIELD: &str = "document_id";

pub struct QdrantStore {
    client: Qdrant,
    collection: VectorCollection,
}

impl QdrantStore {
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection: VectorCollection,
        timeout: Duration,
    ) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(url).timeout(timeout);

        if let Some(api_key) = api_key {
            builder = builder.api_key(api_key);
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self { client, collection })
    }

    fn namespace_filter(&self) -> Filter {
        Filter::must([Condition::matches(
            NAMESPACE_FIELD,
            self.collection.namespace.clone(),
        )])
    }
}

fn distance(metric: Metric) -> Distance {
    match metric {
        Metric::Cosine => Distance::Cosine,
        Metric::DotProduct => Distance::Dot,
        Metric::Euclidean => Distance::Euclid,
    }
}

/// Qdrant only accepts UUIDs or integers as point ids.
fn point_id(document_id: &str) -> String {
    match Uuid::parse_str(document_id) {
        Ok(uuid) => uuid.to_string(),
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_OID, document_id.as_bytes()).to_string(),
    }
}

fn to_payload(document: &Document, namespace: &str) -> HashMap<String, Value> {
    let mut payload: HashMap<String, Value> = document
        .meta
        .iter()
        .map(|(key, value)| {
            let value: Value = match value {
                MetaValue::Bool(b) => (*b).into(),
                MetaValue::Int(i) => (*i).into(),
                MetaValue::Float(f) => (*f).into(),
                MetaValue::Text(s) => s.clone().into(),
            };
            (key.clone(), value)
        })
        .collect();
    payload.insert(CONTENT_FIELD.to_string(), document.content.clone().into());
    payload.insert(NAMESPACE_FIELD.to_string(), namespace.to_string().into());
    payload.insert(DOCUMENT_ID_FIELD.to_string(), document.id.clone().into());
    payload
}

fn from_payload(payload: HashMap<String, Value>, score: f32) -> ScoredDocument {
    let mut id = String::new();
    let mut content = String::new();
    let mut meta = Metadata::new();

    for (key, value) in payload {
        let Some(kind) = value.kind else { continue };
        let meta_value = match kind {
            Kind::StringValue(s) if key == CONTENT_FIELD => {
                content = s;
                continue;
            }
            Kind::StringValue(s) if key == DOCUMENT_ID_FIELD => {
                id = s;
                continue;
            }
            Kind::StringValue(s) => MetaValue::Text(s),
            Kind::IntegerValue(i) => MetaValue::Int(i),
            Kind::DoubleValue(f) => MetaValue::Float(f),
            Kind::BoolValue(b) => MetaValue::Bool(b),
            _ => continue,
        };
        if key != NAMESPACE_FIELD {
            meta.insert(key, meta_value);
        }
    }

    let document = Document {
        id,
        content,
        meta,
        embedding: Vec::new(),
    };
    ScoredDocument::new(document, score)
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    fn collection(&self) -> &VectorCollection {
        &self.collection
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        let name = &self.collection.index_name;
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;
        if exists {
            return Ok(());
        }

        let create = CreateCollectionBuilder::new(name).vectors_config(VectorParamsBuilder::new(
            self.collection.dimension as u64,
            distance(self.collection.metric),
        ));

        self.client
            .create_collection(create)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        info!(
            collection = %name,
            dimension = self.collection.dimension,
            metric = %self.collection.metric,
            "created qdrant collection"
        );
        Ok(())
    }

    async fn upsert(&self, documents: &[Document]) -> Result<usize, VectorStoreError> {
        if documents.is_empty() {
            return Ok(0);
        }

        let mut points = Vec::with_capacity(documents.len());
        for doc in documents {
            check_width(&self.collection, &doc.embedding, "document embedding")?;
            points.push(PointStruct::new(
                point_id(&doc.id),
                doc.embedding.clone(),
                to_payload(doc, &self.collection.namespace),
            ));
        }

        let upsert = UpsertPointsBuilder::new(&self.collection.index_name, points).wait(true);
        self.client
            .upsert_points(upsert)
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        Ok(documents.len())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>, VectorStoreError> {
        check_width(&self.collection, embedding, "query embedding")?;

        let search = SearchPointsBuilder::new(
            &self.collection.index_name,
            embedding.to_vec(),
            top_k as u64,
        )
        .filter(self.namespace_filter())
        .with_payload(true);

        let response = self
            .client
            .search_points(search)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        let documents = response
            .result
            .into_iter()
            .map(|point| from_payload(point.payload, point.score))
            .collect();
        Ok(rank(documents, top_k))
    }

    async fn count(&self) -> Result<u64, VectorStoreError> {
        let count = CountPointsBuilder::new(&self.collection.index_name)
            .filter(self.namespace_filter())
            .exact(true);
        let response = self
            .client
            .count(count)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;
        Ok(response.result.map_or(0, |r| r.count))
    }

    async fn delete_all(&self) -> Result<(), VectorStoreError> {
        let delete = DeletePointsBuilder::new(&self.collection.index_name)
            .points(self.namespace_filter())
            .wait(true);

        self.client
            .delete_points(delete)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        Ok(())
    }
}
