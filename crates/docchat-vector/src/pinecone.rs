//! Pinecone implementation for vector storage
//!
//! The control plane resolves an index name to its data-plane host once;
//! subsequent upserts and queries go straight to that host.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use docchat_core::{
    DocChatError, IndexHandle, IndexProvider, IndexRecord, PineconeConfig, QueryMatch, Result,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const API_VERSION: &str = "2024-07";

/// Pinecone control plane client
pub struct PineconeClient {
    client: Client,
    api_key: String,
    controller_url: String,
    indexes: RwLock<HashMap<String, Arc<PineconeIndex>>>,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: String,
}

impl PineconeClient {
    /// Create a new Pinecone client
    pub fn new(api_key: impl Into<String>, controller_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            controller_url: controller_url.into().trim_end_matches('/').to_string(),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Create from config
    pub fn from_config(config: &PineconeConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| DocChatError::Config("Pinecone API key required".to_string()))?;

        Ok(Self::new(api_key.clone(), config.controller_url.clone()))
    }

    async fn describe_index(&self, name: &str) -> Result<IndexDescription> {
        let response = self
            .client
            .get(format!("{}/indexes/{name}", self.controller_url))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| DocChatError::RemoteCall(format!("Index lookup failed: {e}")))?;

        match response.status() {
            status if status.is_success() => response.json().await.map_err(|e| {
                DocChatError::RemoteCall(format!("Failed to parse index description: {e}"))
            }),
            StatusCode::NOT_FOUND => Err(DocChatError::IndexNotFound(name.to_string())),
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(DocChatError::RemoteCall(format!(
                    "Index lookup for {name} failed ({status}): {error_text}"
                )))
            }
        }
    }
}

#[async_trait]
impl IndexProvider for PineconeClient {
    async fn resolve(&self, name: &str) -> Result<Arc<dyn IndexHandle>> {
        if let Some(index) = self.indexes.read().await.get(name) {
            return Ok(index.clone());
        }

        let description = self.describe_index(name).await.map_err(|e| {
            tracing::error!(index = name, error = %e, "Failed to resolve index");
            e
        })?;

        let index = Arc::new(PineconeIndex {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            name: name.to_string(),
            base_url: data_plane_url(&description.host),
        });
        tracing::debug!(index = name, host = %index.base_url, "Resolved index");

        self.indexes
            .write()
            .await
            .insert(name.to_string(), index.clone());

        Ok(index)
    }
}

/// Hosts come back without a scheme
fn data_plane_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// A resolved Pinecone index
pub struct PineconeIndex {
    client: Client,
    api_key: String,
    name: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [IndexRecord],
    namespace: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_values: bool,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[async_trait]
impl IndexHandle for PineconeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, records: Vec<IndexRecord>, namespace: &str) -> Result<()> {
        let request = UpsertRequest {
            vectors: &records,
            namespace,
        };

        let response = self
            .client
            .post(format!("{}/vectors/upsert", self.base_url))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| DocChatError::RemoteCall(format!("Failed to upsert vector: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DocChatError::RemoteCall(format!(
                "Upsert into {} failed ({status}): {error_text}",
                self.name
            )));
        }

        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<QueryMatch>> {
        let request = QueryRequest {
            vector,
            top_k,
            include_values: false,
            include_metadata: true,
            namespace,
        };

        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| DocChatError::RemoteCall(format!("Vector search failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DocChatError::RemoteCall(format!(
                "Query on {} failed ({status}): {error_text}",
                self.name
            )));
        }

        let result: QueryResponse = response
            .json()
            .await
            .map_err(|e| DocChatError::RemoteCall(format!("Failed to parse query response: {e}")))?;

        Ok(result.matches)
    }
}
