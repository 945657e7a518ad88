//! DocChat RAG - Retrieval-Augmented Generation Orchestrator
//!
//! For each chat message the orchestrator:
//! 1. Asks the semantic cache for a previously answered equivalent question
//! 2. On a miss, retrieves relevant personal documents
//! 3. Fills the response template with the message and the documents
//!
//! The resulting [`ResponseEnvelope`] tells the caller whether to send a
//! cached answer or to stream a generation for the rendered prompt.
//!
//! Author: hephaex@gmail.com

use docchat_core::{RagConfig, ResponseEnvelope, Result};
use docchat_vector::VectorIndexClient;
use std::sync::Arc;

pub mod llm;
pub mod prompts;

pub use llm::GeminiClient;
pub use prompts::{PromptLibrary, PromptVars};

// ============================================================================
// Response Orchestrator
// ============================================================================

/// Cache-then-retrieve orchestrator
pub struct ResponseOrchestrator {
    /// Cache and document index access
    index: Arc<VectorIndexClient>,

    /// Prompt templates
    prompts: Arc<PromptLibrary>,

    /// Configuration
    config: RagConfig,
}

impl ResponseOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        index: Arc<VectorIndexClient>,
        prompts: Arc<PromptLibrary>,
        config: RagConfig,
    ) -> Self {
        Self {
            index,
            prompts,
            config,
        }
    }

    /// Build the envelope for one incoming message
    pub async fn get_response(&self, message: &str) -> ResponseEnvelope {
        match self.index.check_cache(message).await {
            Ok(lookup) if lookup.hit => return ResponseEnvelope::cached(lookup.response),
            Ok(_) => {}
            Err(e) => {
                // Cache is advisory: fall through to retrieval
                tracing::warn!(error = %e, "Cache check failed, treating as miss");
            }
        }

        match self.build_prompt(message).await {
            Ok(Some(prompt)) => {
                tracing::debug!(prompt_len = prompt.len(), "Prompt rendered");
                ResponseEnvelope::prompt(prompt)
            }
            Ok(None) => {
                tracing::info!("No relevant documents");
                ResponseEnvelope::no_documents()
            }
            Err(e) => {
                tracing::error!(error = %e, "Error fetching documents");
                ResponseEnvelope::fetch_error()
            }
        }
    }

    /// Retrieve documents and render the template; `None` if nothing matched
    async fn build_prompt(&self, message: &str) -> Result<Option<String>> {
        let docs = self
            .index
            .search(
                &self.config.doc_index,
                message,
                self.config.top_k,
                self.config.doc_score_threshold,
                self.config.doc_namespace.as_deref(),
            )
            .await?;

        if docs.is_empty() {
            return Ok(None);
        }

        let vars = PromptVars::new()
            .set("incoming_msg", message)
            .set("docs", docs.join("\n"));

        let prompt = self.prompts.render(&self.config.template_name, &vars)?;
        Ok(Some(prompt))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_core::testing::{scored, FakeEmbedding, InMemoryIndex, InMemoryIndexProvider};
    use docchat_core::{EmbeddingClient, EnvelopeKind};
    use serde_json::json;

    const TEMPLATES: &str = r#"
master_response:
  prompt: "Q: {incoming_msg}\nDOCS:\n{docs}"
needs_more:
  prompt: "{incoming_msg} {docs} {persona}"
"#;

    fn config() -> RagConfig {
        RagConfig {
            cache_index: "chat-cache".to_string(),
            doc_index: "docs".to_string(),
            ..Default::default()
        }
    }

    fn orchestrator_with(
        embedder: Arc<dyn EmbeddingClient>,
        provider: InMemoryIndexProvider,
        config: RagConfig,
    ) -> ResponseOrchestrator {
        let index = VectorIndexClient::new(embedder, Arc::new(provider), &config);
        let prompts = PromptLibrary::from_yaml_str(TEMPLATES).unwrap();
        ResponseOrchestrator::new(Arc::new(index), Arc::new(prompts), config)
    }

    fn orchestrator(cache: Arc<InMemoryIndex>, docs: Arc<InMemoryIndex>) -> ResponseOrchestrator {
        orchestrator_with(
            Arc::new(FakeEmbedding::new(8)),
            InMemoryIndexProvider::new().with_index(cache).with_index(docs),
            config(),
        )
    }

    #[tokio::test]
    async fn test_cache_hit_returns_cached_answer_without_search() {
        let embedder = Arc::new(FakeEmbedding::new(8));
        let cache = Arc::new(InMemoryIndex::new("chat-cache").with_matches(vec![scored(
            0.75,
            json!({"text": "What is the refund policy?", "response": "30 days"}),
        )]));
        let docs = Arc::new(
            InMemoryIndex::new("docs").with_matches(vec![scored(0.9, json!({"text": "doc"}))]),
        );

        let provider = InMemoryIndexProvider::new()
            .with_index(cache)
            .with_index(docs.clone());

        let envelope = orchestrator_with(embedder.clone(), provider, config())
            .get_response("What is the refund policy?")
            .await;

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"result": true, "type": "response", "response": "30 days"})
        );
        assert_eq!(docs.query_count(), 0);
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_documents_found() {
        let cache = Arc::new(InMemoryIndex::new("chat-cache"));
        let docs = Arc::new(
            InMemoryIndex::new("docs").with_matches(vec![scored(0.2, json!({"text": "weak"}))]),
        );

        let envelope = orchestrator(cache, docs).get_response("anything").await;

        assert!(!envelope.result);
        assert_eq!(envelope.response, "No documents found");
        assert_eq!(envelope.kind, None);
    }

    #[tokio::test]
    async fn test_prompt_includes_message_and_relevant_docs_only() {
        let cache = Arc::new(
            InMemoryIndex::new("chat-cache")
                .with_matches(vec![scored(0.3, json!({"response": "unrelated"}))]),
        );
        let docs = Arc::new(InMemoryIndex::new("docs").with_matches(vec![
            scored(0.4, json!({"text": "Refunds are accepted for 30 days."})),
            scored(0.1, json!({"text": "The office closes at 5pm."})),
        ]));

        let envelope = orchestrator(cache, docs)
            .get_response("What is the refund policy?")
            .await;

        assert!(envelope.result);
        assert_eq!(envelope.kind, Some(EnvelopeKind::Prompt));
        assert_eq!(
            envelope.response,
            "Q: What is the refund policy?\nDOCS:\nRefunds are accepted for 30 days."
        );
        assert!(!envelope.response.contains("office"));
    }

    #[tokio::test]
    async fn test_multiple_docs_joined_with_newlines() {
        let cache = Arc::new(InMemoryIndex::new("chat-cache"));
        let docs = Arc::new(InMemoryIndex::new("docs").with_matches(vec![
            scored(0.9, json!({"text": "first"})),
            scored(0.5, json!({"text": "second"})),
        ]));

        let envelope = orchestrator(cache, docs).get_response("q").await;
        assert!(envelope.response.ends_with("DOCS:\nfirst\nsecond"));
    }

    #[tokio::test]
    async fn test_doc_index_resolution_failure_is_error_envelope() {
        let cache = Arc::new(InMemoryIndex::new("chat-cache"));
        let provider = InMemoryIndexProvider::new().with_index(cache);

        let envelope = orchestrator_with(Arc::new(FakeEmbedding::new(8)), provider, config())
            .get_response("q")
            .await;

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"result": false, "type": "error", "response": "Error fetching documents"})
        );
    }

    #[tokio::test]
    async fn test_doc_query_failure_is_error_envelope() {
        let cache = Arc::new(InMemoryIndex::new("chat-cache"));
        let docs = Arc::new(InMemoryIndex::new("docs").with_query_error("timeout"));

        let envelope = orchestrator(cache, docs).get_response("q").await;
        assert_eq!(envelope, ResponseEnvelope::fetch_error());
    }

    #[tokio::test]
    async fn test_cache_failure_falls_through_to_search() {
        let cache = Arc::new(InMemoryIndex::new("chat-cache").with_query_error("unavailable"));
        let docs = Arc::new(
            InMemoryIndex::new("docs").with_matches(vec![scored(0.5, json!({"text": "doc"}))]),
        );

        let envelope = orchestrator(cache, docs.clone()).get_response("q").await;

        assert_eq!(envelope.kind, Some(EnvelopeKind::Prompt));
        assert_eq!(docs.query_count(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_error_envelope() {
        let cache = Arc::new(InMemoryIndex::new("chat-cache"));
        let docs = Arc::new(InMemoryIndex::new("docs"));
        let provider = InMemoryIndexProvider::new().with_index(cache).with_index(docs);

        let embedder = Arc::new(FakeEmbedding::failing("quota"));
        let envelope = orchestrator_with(embedder, provider, config())
            .get_response("q")
            .await;

        assert_eq!(envelope, ResponseEnvelope::fetch_error());
    }

    #[tokio::test]
    async fn test_template_failure_is_error_envelope() {
        let cache = Arc::new(InMemoryIndex::new("chat-cache"));
        let docs = Arc::new(
            InMemoryIndex::new("docs").with_matches(vec![scored(0.5, json!({"text": "doc"}))]),
        );
        let provider = InMemoryIndexProvider::new().with_index(cache).with_index(docs);
        let config = RagConfig {
            template_name: "needs_more".to_string(),
            ..config()
        };

        let envelope = orchestrator_with(Arc::new(FakeEmbedding::new(8)), provider, config)
            .get_response("q")
            .await;

        assert_eq!(envelope, ResponseEnvelope::fetch_error());
    }

    #[tokio::test]
    async fn test_documents_searched_in_configured_namespace() {
        let cache = Arc::new(InMemoryIndex::new("chat-cache"));
        let docs = Arc::new(
            InMemoryIndex::new("docs")
                .in_namespace("notes")
                .with_matches(vec![scored(0.5, json!({"text": "ingested note"}))]),
        );
        let provider = InMemoryIndexProvider::new().with_index(cache).with_index(docs);
        let config = RagConfig {
            doc_namespace: Some("notes".to_string()),
            ..config()
        };

        let envelope = orchestrator_with(Arc::new(FakeEmbedding::new(8)), provider, config)
            .get_response("q")
            .await;

        assert_eq!(envelope.kind, Some(EnvelopeKind::Prompt));
        assert!(envelope.response.contains("ingested note"));
    }

    #[tokio::test]
    async fn test_default_namespace_misses_namespaced_documents() {
        let cache = Arc::new(InMemoryIndex::new("chat-cache"));
        let docs = Arc::new(
            InMemoryIndex::new("docs")
                .in_namespace("notes")
                .with_matches(vec![scored(0.5, json!({"text": "ingested note"}))]),
        );

        let envelope = orchestrator(cache, docs).get_response("q").await;
        assert_eq!(envelope, ResponseEnvelope::no_documents());
    }

    #[tokio::test]
    async fn test_top_k_is_forwarded() {
        let cache = Arc::new(InMemoryIndex::new("chat-cache"));
        let docs = Arc::new(InMemoryIndex::new("docs").with_matches(
            (0..8)
                .map(|i| scored(0.9, json!({"text": format!("doc {i}")})))
                .collect(),
        ));

        let envelope = orchestrator(cache, docs).get_response("q").await;
        assert_eq!(envelope.response.matches("doc ").count(), 5);
    }
}
