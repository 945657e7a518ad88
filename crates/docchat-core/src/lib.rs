//! DocChat Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout DocChat:
//! - Common error types
//! - Index records, query matches and response envelopes
//! - Provider traits for embedding, vector index and LLM services
//! - Configuration management

pub mod config;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{
    AppConfig, ConfigError, EmbeddingConfig, GeminiConfig, LoggingConfig, PineconeConfig,
    RagConfig, ServerConfig,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Envelope text returned when no document clears the relevance threshold
pub const NO_DOCUMENTS_FOUND: &str = "No documents found";

/// Envelope text returned when document retrieval or prompt assembly failed
pub const FETCH_ERROR: &str = "Error fetching documents";

/// Cache lookup text returned on a miss
pub const CACHE_MISS_RESPONSE: &str = "No response found";

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for DocChat operations
#[derive(Error, Debug)]
pub enum DocChatError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Remote call failed: {0}")]
    RemoteCall(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DocChatError>;

/// Prompt template rendering failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Prompt {0} not found")]
    NotFound(String),

    #[error("Prompt {0} is not a string")]
    NotAString(String),

    #[error("Key '{0}' not found in substitutions")]
    MissingKey(String),

    #[error("Prompt {name} is malformed at byte {position}")]
    Malformed { name: String, position: usize },
}

// ============================================================================
// Vector Index Models
// ============================================================================

/// A record written to a vector index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Record identifier (UUID v4)
    pub id: String,

    /// Embedding vector
    pub values: Vec<f32>,

    /// Arbitrary JSON metadata stored alongside the vector
    pub metadata: Map<String, Value>,
}

impl IndexRecord {
    /// Create a record with a freshly generated identifier
    pub fn new(values: Vec<f32>, metadata: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            values,
            metadata,
        }
    }
}

/// A single nearest-neighbour match returned by an index query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,

    /// Similarity score (higher is closer)
    pub score: f32,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl QueryMatch {
    /// Read a string metadata field
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Result of a semantic cache lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLookup {
    pub hit: bool,
    pub response: String,
}

impl CacheLookup {
    pub fn hit(response: impl Into<String>) -> Self {
        Self {
            hit: true,
            response: response.into(),
        }
    }

    pub fn miss() -> Self {
        Self {
            hit: false,
            response: CACHE_MISS_RESPONSE.to_string(),
        }
    }
}

// ============================================================================
// Response Envelope
// ============================================================================

/// Kind of payload carried by a [`ResponseEnvelope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Final answer served from the semantic cache
    Response,
    /// Filled template ready for generation
    Prompt,
    /// Retrieval or templating failed
    Error,
}

/// Orchestrator output for one incoming message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub result: bool,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EnvelopeKind>,

    pub response: String,
}

impl ResponseEnvelope {
    /// Cached answer
    pub fn cached(answer: impl Into<String>) -> Self {
        Self {
            result: true,
            kind: Some(EnvelopeKind::Response),
            response: answer.into(),
        }
    }

    /// Rendered prompt for the generative model
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            result: true,
            kind: Some(EnvelopeKind::Prompt),
            response: prompt.into(),
        }
    }

    pub fn no_documents() -> Self {
        Self {
            result: false,
            kind: None,
            response: NO_DOCUMENTS_FOUND.to_string(),
        }
    }

    pub fn fetch_error() -> Self {
        Self {
            result: false,
            kind: Some(EnvelopeKind::Error),
            response: FETCH_ERROR.to_string(),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for embedding generation
#[async_trait::async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;
}

/// Resolves index names to data-plane handles
#[async_trait::async_trait]
pub trait IndexProvider: Send + Sync {
    /// Fails with [`DocChatError::IndexNotFound`] when the name is unknown
    async fn resolve(&self, name: &str) -> Result<Arc<dyn IndexHandle>>;
}

/// Data-plane operations on a single resolved index
#[async_trait::async_trait]
pub trait IndexHandle: Send + Sync {
    /// Index name as configured
    fn name(&self) -> &str;

    /// Write records into a namespace ("" is the default namespace)
    async fn upsert(&self, records: Vec<IndexRecord>, namespace: &str) -> Result<()>;

    /// Top-K similarity query, matches in provider order
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<QueryMatch>>;
}

/// Trait for LLM clients
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a response
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate a streaming response
    async fn generate_stream(
        &self,
        prompt: &str,
    ) -> Result<futures::stream::BoxStream<'static, Result<String>>>;
}

// ============================================================================
// Tests
// ============================================================================
