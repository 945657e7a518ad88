//! Application state management
//!
//! Author: hephaex@gmail.com

use docchat_core::{AppConfig, LlmClient, Result};
use docchat_rag::{GeminiClient, PromptLibrary, ResponseOrchestrator};
use docchat_vector::{OpenAiEmbedding, PineconeClient, VectorIndexClient};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Chat messages received
    pub message_count: AtomicU64,
    /// Open websocket connections
    pub active_connections: AtomicU64,
    /// Cache and retrieval pipeline
    pub orchestrator: Arc<ResponseOrchestrator>,
    /// Generative client used for prompt envelopes
    pub llm: Arc<dyn LlmClient>,
}

impl AppState {
    /// Create state from already built components
    pub fn new(
        config: AppConfig,
        orchestrator: Arc<ResponseOrchestrator>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            message_count: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            orchestrator,
            llm,
        }
    }

    /// Build every remote client from a validated config
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let embedder = Arc::new(OpenAiEmbedding::from_config(&config.embedding)?);
        let pinecone = Arc::new(PineconeClient::from_config(&config.pinecone)?);
        let llm = Arc::new(GeminiClient::from_config(&config.gemini)?);
        let prompts = Arc::new(PromptLibrary::load(&config.rag.prompt_library_path)?);

        let index = Arc::new(VectorIndexClient::new(embedder, pinecone, &config.rag));
        let orchestrator = Arc::new(ResponseOrchestrator::new(
            index,
            prompts,
            config.rag.clone(),
        ));

        Ok(Self::new(config, orchestrator, llm))
    }

    /// Increment message counter
    pub fn increment_messages(&self) -> u64 {
        self.message_count.fetch_add(1, Ordering::SeqCst)
    }

    /// Get total message count
    pub fn get_message_count(&self) -> u64 {
        self.message_count.load(Ordering::SeqCst)
    }

    /// Get open connection count
    pub fn get_active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Register an open connection; the count drops with the guard
    pub fn connection_opened(&self) -> ConnectionGuard<'_> {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard { state: self }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Decrements the active connection count when dropped
pub struct ConnectionGuard<'a> {
    state: &'a AppState,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::SeqCst);
    }
}
