//! Pinecone vector store over its REST API.

use std::time::Duration;

use tokio::time::Instant;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{CONTENT_FIELD, VectorStore, check_width, rank};
use crate::error::VectorStoreError;
use crate::models::{Document, MetaValue, Metadata, ScoredDocument, VectorCollection};

const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: String,
    #[serde(default)]
    status: Option<IndexStatus>,
}

#[derive(Debug, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Serialize)]
struct PineconeVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct IndexStats {
    #[serde(default)]
    namespaces: std::collections::HashMap<String, NamespaceStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    #[serde(default)]
    vector_count: u64,
}

/// Serverless Pinecone index, addressed by name. The data-plane host is
/// looked up on first use and cached for the life of the store.
pub struct PineconeStore {
    client: Client,
    api_key: String,
    collection: VectorCollection,
    cloud: String,
    region: String,
    control_url: String,
    ready_poll_interval: Duration,
    ready_timeout: Duration,
    host: OnceCell<String>,
}

impl PineconeStore {
    pub fn new(
        api_key: String,
        collection: VectorCollection,
        cloud: &str,
        region: &str,
        timeout: Duration,
    ) -> Result<Self, VectorStoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VectorStoreError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            collection,
            cloud: cloud.to_string(),
            region: region.to_string(),
            control_url: CONTROL_PLANE_URL.to_string(),
            ready_poll_interval: READY_POLL_INTERVAL,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            host: OnceCell::new(),
        })
    }

    /// Point the store at a different control plane, e.g. a local emulator.
    pub fn with_control_url(mut self, url: impl Into<String>) -> Self {
        self.control_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Bound the wait for a newly created index to report ready.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self.ready_poll_interval = READY_POLL_INTERVAL
            .min(timeout / 10)
            .max(Duration::from_millis(10));
        self
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn describe_index(&self) -> Result<Option<IndexDescription>, VectorStoreError> {
        let url = format!("{}/indexes/{}", self.control_url, self.collection.index_name);
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(connection_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))
    }

    async fn create_index(&self) -> Result<(), VectorStoreError> {
        let url = format!("{}/indexes", self.control_url);
        let body = json!({
            "name": self.collection.index_name,
            "dimension": self.collection.dimension,
            "metric": self.collection.metric.to_string(),
            "spec": { "serverless": { "cloud": self.cloud, "region": self.region } },
        });

        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(connection_error)?;

        // Another writer may have created it first
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        check_status(response).await?;
        info!(
            index = %self.collection.index_name,
            dimension = self.collection.dimension,
            metric = %self.collection.metric,
            "created pinecone index"
        );
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<String, VectorStoreError> {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if let Some(index) = self.describe_index().await?
                && index.status.as_ref().is_none_or(|s| s.ready)
                && !index.host.is_empty()
            {
                return Ok(index.host);
            }
            if Instant::now() + self.ready_poll_interval > deadline {
                return Err(VectorStoreError::CollectionError(format!(
                    "index {} did not become ready within {}s",
                    self.collection.index_name,
                    self.ready_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.ready_poll_interval).await;
        }
    }

    /// Base URL of the index's data plane.
    async fn data_url(&self) -> Result<&str, VectorStoreError> {
        let host = self
            .host
            .get_or_try_init(|| async {
                match self.describe_index().await? {
                    Some(index) => Ok(index.host),
                    None => Err(VectorStoreError::CollectionError(format!(
                        "index {} does not exist",
                        self.collection.index_name
                    ))),
                }
            })
            .await?;
        Ok(host.as_str())
    }

    async fn post_data<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, VectorStoreError> {
        let host = self.data_url().await?;
        let url = if host.starts_with("http") {
            format!("{}{}", host.trim_end_matches('/'), path)
        } else {
            format!("https://{}{}", host, path)
        };

        let response = self
            .request(reqwest::Method::POST, &url)
            .json(body)
            .send()
            .await
            .map_err(connection_error)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| VectorStoreError::ClientError(format!("invalid response: {}", e)))
    }
}

fn connection_error(e: reqwest::Error) -> VectorStoreError {
    VectorStoreError::ConnectionError(e.to_string())
}

async fn check_status(response: Response) -> Result<Response, VectorStoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(VectorStoreError::Unauthorized(message));
    }
    Err(VectorStoreError::ServerError {
        status: status.as_u16(),
        message,
    })
}

fn to_metadata(document: &Document) -> Map<String, Value> {
    let mut metadata: Map<String, Value> = document
        .meta
        .iter()
        .map(|(key, value)| {
            let value = match value {
                MetaValue::Bool(b) => Value::from(*b),
                MetaValue::Int(i) => Value::from(*i),
                MetaValue::Float(f) => Value::from(*f),
                MetaValue::Text(s) => Value::from(s.as_str()),
            };
            (key.clone(), value)
        })
        .collect();
    metadata.insert(CONTENT_FIELD.to_string(), Value::from(document.content.as_str()));
    metadata
}

fn from_match(m: QueryMatch) -> ScoredDocument {
    let mut content = String::new();
    let mut meta = Metadata::new();

    for (key, value) in m.metadata.unwrap_or_default() {
        if key == CONTENT_FIELD {
            if let Value::String(s) = value {
                content = s;
            }
            continue;
        }
        let value = match value {
            Value::Bool(b) => MetaValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetaValue::Int(i),
                None => MetaValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => MetaValue::Text(s),
            other => MetaValue::Text(other.to_string()),
        };
        meta.insert(key, value);
    }

    let document = Document {
        id: m.id,
        content,
        meta,
        embedding: Vec::new(),
    };
    ScoredDocument::new(document, m.score)
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn backend(&self) -> &'static str {
        "pinecone"
    }

    fn collection(&self) -> &VectorCollection {
        &self.collection
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        Ok(self.describe_index().await?.is_some())
    }

    fn provisioning_timeout(&self) -> Duration {
        self.ready_timeout
    }

    async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        if self.host.get().is_some() {
            return Ok(());
        }
        if self.describe_index().await?.is_none() {
            self.create_index().await?;
        }
        let host = self.wait_until_ready().await?;
        let _ = self.host.set(host);
        Ok(())
    }

    async fn upsert(&self, documents: &[Document]) -> Result<usize, VectorStoreError> {
        if documents.is_empty() {
            return Ok(0);
        }

        let mut vectors = Vec::with_capacity(documents.len());
        for doc in documents {
            check_width(&self.collection, &doc.embedding, "document embedding")?;
            vectors.push(PineconeVector {
                id: &doc.id,
                values: &doc.embedding,
                metadata: to_metadata(doc),
            });
        }

        let body = json!({
            "vectors": vectors,
            "namespace": self.collection.namespace,
        });
        let response: UpsertResponse = self
            .post_data("/vectors/upsert", &body)
            .await
            .map_err(|e| match e {
                VectorStoreError::ClientError(msg) => VectorStoreError::UpsertError(msg),
                other => other,
            })?;

        debug!(count = response.upserted_count, "pinecone upsert");
        Ok(response.upserted_count)
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>, VectorStoreError> {
        check_width(&self.collection, embedding, "query embedding")?;

        let body = json!({
            "namespace": self.collection.namespace,
            "vector": embedding,
            "topK": top_k,
            "includeMetadata": true,
            "includeValues": false,
        });
        let response: QueryResponse = self
            .post_data("/query", &body)
            .await
            .map_err(|e| match e {
                VectorStoreError::ClientError(msg) => VectorStoreError::SearchError(msg),
                other => other,
            })?;

        let documents = response.matches.into_iter().map(from_match).collect();
        Ok(rank(documents, top_k))
    }

    async fn count(&self) -> Result<u64, VectorStoreError> {
        let stats: IndexStats = self.post_data("/describe_index_stats", &json!({})).await?;
        Ok(stats
            .namespaces
            .get(&self.collection.namespace)
            .map_or(0, |ns| ns.vector_count))
    }

    async fn delete_all(&self) -> Result<(), VectorStoreError> {
        let body = json!({ "deleteAll": true, "namespace": self.collection.namespace });
        self.post_data::<Value>("/vectors/delete", &body)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;
        Ok(())
    }
}
