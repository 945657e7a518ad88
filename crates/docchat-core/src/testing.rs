//! In-memory provider implementations for tests
//!
//! Enabled with the `test-utils` feature.

use crate::{
    DocChatError, EmbeddingClient, IndexHandle, IndexProvider, IndexRecord, LlmClient,
    QueryMatch, Result,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Build a query match from a score and a JSON metadata object
pub fn scored(score: f32, metadata: Value) -> QueryMatch {
    QueryMatch {
        id: uuid::Uuid::new_v4().to_string(),
        score,
        metadata: metadata.as_object().cloned().unwrap_or_default(),
    }
}

/// Embedding client returning a constant vector
pub struct FakeEmbedding {
    dimension: usize,
    error: Option<String>,
    calls: AtomicUsize,
}

impl FakeEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            error: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call fails with an embedding error
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            dimension: 0,
            error: Some(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EmbeddingClient for FakeEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(message) => Err(DocChatError::Embedding(message.clone())),
            None => Ok(vec![0.1; self.dimension]),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Index answering every query with a fixed match list
pub struct InMemoryIndex {
    name: String,
    matches: Vec<QueryMatch>,
    namespace: String,
    query_error: Option<String>,
    upsert_error: Option<String>,
    queries: AtomicUsize,
    upserts: Mutex<Vec<(String, IndexRecord)>>,
}

impl InMemoryIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matches: Vec::new(),
            namespace: String::new(),
            query_error: None,
            upsert_error: None,
            queries: AtomicUsize::new(0),
            upserts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_matches(mut self, matches: Vec<QueryMatch>) -> Self {
        self.matches = matches;
        self
    }

    /// Namespace holding the fixed matches; other namespaces are empty
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_query_error(mut self, message: impl Into<String>) -> Self {
        self.query_error = Some(message.into());
        self
    }

    pub fn with_upsert_error(mut self, message: impl Into<String>) -> Self {
        self.upsert_error = Some(message.into());
        self
    }

    /// Number of queries issued against this index
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Records written so far, with their namespace
    pub fn upserted(&self) -> Vec<(String, IndexRecord)> {
        self.upserts
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl IndexHandle for InMemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, records: Vec<IndexRecord>, namespace: &str) -> Result<()> {
        if let Some(message) = &self.upsert_error {
            return Err(DocChatError::RemoteCall(message.clone()));
        }
        if let Ok(mut stored) = self.upserts.lock() {
            stored.extend(records.into_iter().map(|r| (namespace.to_string(), r)));
        }
        Ok(())
    }

    async fn query(
        &self,
        _vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<QueryMatch>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.query_error {
            return Err(DocChatError::RemoteCall(message.clone()));
        }
        if namespace.unwrap_or_default() != self.namespace {
            return Ok(Vec::new());
        }
        Ok(self.matches.iter().take(top_k).cloned().collect())
    }
}

/// Provider resolving names to registered [`InMemoryIndex`] instances
#[derive(Default)]
pub struct InMemoryIndexProvider {
    indexes: HashMap<String, Arc<InMemoryIndex>>,
}

impl InMemoryIndexProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, index: Arc<InMemoryIndex>) -> Self {
        self.indexes.insert(index.name.clone(), index);
        self
    }
}

#[async_trait::async_trait]
impl IndexProvider for InMemoryIndexProvider {
    async fn resolve(&self, name: &str) -> Result<Arc<dyn IndexHandle>> {
        self.indexes
            .get(name)
            .cloned()
            .map(|index| index as Arc<dyn IndexHandle>)
            .ok_or_else(|| DocChatError::IndexNotFound(name.to_string()))
    }
}

/// LLM client replaying a fixed chunk sequence
pub struct ScriptedLlm {
    chunks: Vec<String>,
    fail_after: Option<usize>,
    fail_at_start: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            fail_after: None,
            fail_at_start: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Emit an error item after `n` chunks
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// `generate_stream` fails before producing a stream
    pub fn failing_at_start(mut self) -> Self {
        self.fail_at_start = true;
        self
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn record(&self, prompt: &str) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.record(prompt);
        Ok(self.chunks.concat())
    }

    async fn generate_stream(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        self.record(prompt);
        if self.fail_at_start {
            return Err(DocChatError::RemoteCall("generation unavailable".into()));
        }

        let mut items: Vec<Result<String>> = Vec::new();
        for (i, chunk) in self.chunks.iter().enumerate() {
            if self.fail_after == Some(i) {
                items.push(Err(DocChatError::RemoteCall("stream interrupted".into())));
                return Ok(stream::iter(items).boxed());
            }
            items.push(Ok(chunk.clone()));
        }
        if self.fail_after.is_some_and(|n| n >= self.chunks.len()) {
            items.push(Err(DocChatError::RemoteCall("stream interrupted".into())));
        }

        Ok(stream::iter(items).boxed())
    }
}

/// Metadata object helper
pub fn metadata(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
