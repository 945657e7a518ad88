//! Vector index client
//!
//! Combines an embedding client with an index provider: text goes in,
//! vectors are computed here, and only texts or cached answers come out.
//!
//! Author: hephaex@gmail.com

use docchat_core::{
    CacheLookup, DocChatError, EmbeddingClient, IndexHandle, IndexProvider, IndexRecord,
    RagConfig, Result,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Search and cache operations over named vector indexes
pub struct VectorIndexClient {
    embedder: Arc<dyn EmbeddingClient>,
    provider: Arc<dyn IndexProvider>,
    cache_index: String,
    cache_threshold: f32,
}

impl VectorIndexClient {
    /// Create a new client; the cache index and threshold come from `rag`
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        provider: Arc<dyn IndexProvider>,
        rag: &RagConfig,
    ) -> Self {
        Self {
            embedder,
            provider,
            cache_index: rag.cache_index.clone(),
            cache_threshold: rag.cache_score_threshold,
        }
    }

    /// Resolve an index by name
    pub async fn resolve_index(&self, name: &str) -> Result<Arc<dyn IndexHandle>> {
        self.provider.resolve(name).await
    }

    /// Embed `text` and write it as a new record.
    ///
    /// Returns `Ok(false)` when the index is unknown or embedding failed;
    /// write failures are returned as errors.
    pub async fn upsert(
        &self,
        index_name: &str,
        text: &str,
        namespace: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<bool> {
        let index = match self.resolve_index(index_name).await {
            Ok(index) => index,
            Err(DocChatError::IndexNotFound(name)) => {
                tracing::error!(index = %name, "Index not found");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let embedding = match self.embedder.embed(text).await {
            Ok(embedding) if !embedding.is_empty() => embedding,
            Ok(_) => {
                tracing::error!("Embedding provider returned an empty vector");
                return Ok(false);
            }
            Err(e) => {
                tracing::error!(error = %e, "Error getting embedding");
                return Ok(false);
            }
        };

        let mut metadata = metadata.unwrap_or_default();
        metadata
            .entry("text")
            .or_insert_with(|| Value::String(text.to_string()));

        let record = IndexRecord::new(embedding, metadata);
        let id = record.id.clone();
        index.upsert(vec![record], namespace).await?;

        tracing::info!(index = index_name, namespace, id = %id, "Document upserted");
        Ok(true)
    }

    /// Embed several documents in one call and write them together.
    ///
    /// Unlike [`upsert`](Self::upsert) every failure is returned as an error.
    pub async fn upsert_batch(
        &self,
        index_name: &str,
        documents: Vec<(String, Map<String, Value>)>,
        namespace: &str,
    ) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }

        let index = self.resolve_index(index_name).await?;
        let texts: Vec<String> = documents.iter().map(|(text, _)| text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        if embeddings.len() != documents.len() {
            return Err(DocChatError::Embedding(format!(
                "Expected {} embeddings, got {}",
                documents.len(),
                embeddings.len()
            )));
        }

        let records: Vec<IndexRecord> = documents
            .into_iter()
            .zip(embeddings)
            .map(|((text, mut metadata), embedding)| {
                metadata.entry("text").or_insert(Value::String(text));
                IndexRecord::new(embedding, metadata)
            })
            .collect();

        let count = records.len();
        index.upsert(records, namespace).await?;

        tracing::info!(index = index_name, namespace, count, "Documents upserted");
        Ok(count)
    }

    /// Texts of the matches scoring strictly above `score_threshold`, in
    /// provider order. `None` searches the default namespace.
    pub async fn search(
        &self,
        index_name: &str,
        query: &str,
        top_k: usize,
        score_threshold: f32,
        namespace: Option<&str>,
    ) -> Result<Vec<String>> {
        let index = self.resolve_index(index_name).await?;
        let embedding = self.embedder.embed(query).await?;

        let matches = index.query(&embedding, top_k, namespace).await?;
        tracing::debug!(
            index = index_name,
            namespace = namespace.unwrap_or_default(),
            matches = matches.len(),
            "Index queried"
        );

        let relevant: Vec<String> = matches
            .iter()
            .filter(|m| m.score > score_threshold)
            .filter_map(|m| match m.metadata_str("text") {
                Some(text) => Some(text.to_string()),
                None => {
                    tracing::warn!(id = %m.id, "Match has no text metadata");
                    None
                }
            })
            .collect();

        tracing::info!(
            index = index_name,
            relevant = relevant.len(),
            threshold = score_threshold,
            "Search completed"
        );
        Ok(relevant)
    }

    /// Look up a previously answered equivalent question
    pub async fn check_cache(&self, message: &str) -> Result<CacheLookup> {
        let index = self.resolve_index(&self.cache_index).await?;
        let embedding = self.embedder.embed(message).await?;

        let matches = index.query(&embedding, 1, None).await?;

        let cached = matches
            .first()
            .filter(|m| m.score > self.cache_threshold)
            .and_then(|m| m.metadata_str("response"));

        match cached {
            Some(response) => {
                tracing::info!("Response found in cache");
                Ok(CacheLookup::hit(response))
            }
            None => {
                tracing::info!("No response found in cache");
                Ok(CacheLookup::miss())
            }
        }
    }
}
