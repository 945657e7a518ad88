//! DocChat Configuration Management
//!
//! Handles configuration from environment variables and TOML files with
//! sensible defaults for development. Every component receives its section
//! explicitly; nothing reads the environment after startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Embedding provider
    pub embedding: EmbeddingConfig,

    /// Vector database
    pub pinecone: PineconeConfig,

    /// Generative model provider
    pub gemini: GeminiConfig,

    /// RAG pipeline configuration
    pub rag: RagConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Apply every recognised variable returned by `lookup`.
    ///
    /// Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Server
        if let Some(host) = get("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("API_PORT") {
            self.server.port = parse_value("API_PORT", port)?;
        }
        if let Some(origins) = get("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Embedding
        if let Some(key) = get("OPENAI_API_KEY") {
            self.embedding.api_key = Some(key);
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.embedding.model = model;
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.embedding.base_url = url;
        }
        if let Some(dimension) = get("EMBEDDING_DIMENSION") {
            self.embedding.dimension = parse_value("EMBEDDING_DIMENSION", dimension)?;
        }

        // Pinecone
        if let Some(key) = get("PINECONE_API_KEY") {
            self.pinecone.api_key = Some(key);
        }
        if let Some(url) = get("PINECONE_CONTROLLER_URL") {
            self.pinecone.controller_url = url;
        }

        // Gemini
        if let Some(key) = get("GOOGLE_GENAI_API_KEY") {
            self.gemini.api_key = Some(key);
        }
        if let Some(model) = get("GOOGLE_GENAI_MODEL") {
            self.gemini.model = model;
        }
        if let Some(url) = get("GEMINI_BASE_URL") {
            self.gemini.base_url = url;
        }

        // RAG
        if let Some(index) = get("CHAT_CACHE_INDEX") {
            self.rag.cache_index = index;
        }
        if let Some(index) = get("PERSONAL_DOC_INDEX") {
            self.rag.doc_index = index;
        }
        if let Some(namespace) = get("DOC_NAMESPACE") {
            self.rag.doc_namespace = Some(namespace);
        }
        if let Some(path) = get("PROMPT_LIBRARY_PATH") {
            self.rag.prompt_library_path = PathBuf::from(path);
        }

        // Logging
        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = get("LOG_JSON") {
            self.logging.json_format = parse_value("LOG_JSON", json)?;
        }

        Ok(())
    }

    /// Check that every required value is present.
    ///
    /// All missing keys are reported together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();

        if is_blank(self.embedding.api_key.as_deref()) {
            missing.push("OPENAI_API_KEY".to_string());
        }
        if self.embedding.model.trim().is_empty() {
            missing.push("OPENAI_MODEL".to_string());
        }
        if is_blank(self.pinecone.api_key.as_deref()) {
            missing.push("PINECONE_API_KEY".to_string());
        }
        if is_blank(self.gemini.api_key.as_deref()) {
            missing.push("GOOGLE_GENAI_API_KEY".to_string());
        }
        if self.gemini.model.trim().is_empty() {
            missing.push("GOOGLE_GENAI_MODEL".to_string());
        }
        if self.rag.cache_index.trim().is_empty() {
            missing.push("CHAT_CACHE_INDEX".to_string());
        }
        if self.rag.doc_index.trim().is_empty() {
            missing.push("PERSONAL_DOC_INDEX".to_string());
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingRequired(missing))
        }
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn parse_value<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Embedding provider configuration (OpenAI-compatible API)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI API key
    pub api_key: Option<String>,

    /// Embedding model name
    pub model: String,

    /// API base URL
    pub base_url: String,

    /// Requested vector dimension (must match both indexes)
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            dimension: 1536,
        }
    }
}

/// Pinecone configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PineconeConfig {
    /// Pinecone API key
    pub api_key: Option<String>,

    /// Control plane URL used to resolve index hosts
    pub controller_url: String,
}

impl Default for PineconeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            controller_url: "https://api.pinecone.io".to_string(),
        }
    }
}

/// Gemini configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Google generative AI API key
    pub api_key: Option<String>,

    /// Model name to use
    pub model: String,

    /// API base URL
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

/// RAG pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Index holding previously answered questions
    pub cache_index: String,

    /// Index holding personal documents
    pub doc_index: String,

    /// Namespace searched in the document index (default namespace if unset)
    pub doc_namespace: Option<String>,

    /// Number of documents requested per search
    pub top_k: usize,

    /// Documents must score strictly above this
    pub doc_score_threshold: f32,

    /// Cache entries must score strictly above this
    pub cache_score_threshold: f32,

    /// Template rendered on a cache miss
    pub template_name: String,

    /// YAML prompt library
    pub prompt_library_path: PathBuf,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            cache_index: String::new(),
            doc_index: String::new(),
            doc_namespace: None,
            top_k: 5,
            doc_score_threshold: 0.22,
            cache_score_threshold: 0.6,
            template_name: "master_response".to_string(),
            prompt_library_path: PathBuf::from("prompts/response_master.yml"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {}", .0.join(", "))]
    MissingRequired(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn complete_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("OPENAI_API_KEY", "sk-test"),
            ("PINECONE_API_KEY", "pc-test"),
            ("GOOGLE_GENAI_API_KEY", "g-test"),
            ("CHAT_CACHE_INDEX", "chat-cache"),
            ("PERSONAL_DOC_INDEX", "personal-docs"),
        ]
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.embedding.dimension, 1536);
        assert_eq!(config.rag.top_k, 5);
        assert_eq!(config.rag.doc_score_threshold, 0.22);
        assert_eq!(config.rag.cache_score_threshold, 0.6);
        assert_eq!(config.server.cors_origins, vec!["http://localhost:3000"]);
    }

    #[test]
    fn test_validate_aggregates_missing_keys() {
        let err = AppConfig::default().validate().unwrap_err();

        match err {
            ConfigError::MissingRequired(keys) => {
                assert_eq!(
                    keys,
                    vec![
                        "OPENAI_API_KEY",
                        "PINECONE_API_KEY",
                        "GOOGLE_GENAI_API_KEY",
                        "CHAT_CACHE_INDEX",
                        "PERSONAL_DOC_INDEX",
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_apply_env_populates_required_values() {
        let mut config = AppConfig::default();
        config
            .apply_env(lookup(&complete_env()))
            .expect("env should apply");

        assert!(config.validate().is_ok());
        assert_eq!(config.rag.cache_index, "chat-cache");
        assert_eq!(config.rag.doc_index, "personal-docs");
    }

    #[test]
    fn test_apply_env_ignores_blank_values() {
        let mut config = AppConfig::default();
        config
            .apply_env(lookup(&[("OPENAI_MODEL", "  "), ("API_HOST", "")]))
            .unwrap();

        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_invalid_port_is_reported() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(lookup(&[("API_PORT", "eighty")]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "API_PORT"));
    }

    #[test]
    fn test_cors_origins_split() {
        let mut config = AppConfig::default();
        config
            .apply_env(lookup(&[(
                "CORS_ORIGINS",
                "http://a.test, http://b.test,,",
            )]))
            .unwrap();

        assert_eq!(config.server.cors_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn test_doc_namespace_from_env() {
        let mut config = AppConfig::default();
        assert_eq!(config.rag.doc_namespace, None);

        config
            .apply_env(lookup(&[("DOC_NAMESPACE", "notes")]))
            .unwrap();
        assert_eq!(config.rag.doc_namespace.as_deref(), Some("notes"));
    }

    #[test]
    fn test_from_file_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docchat.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9000

[rag]
cache_index = "cache"
doc_index = "docs"
top_k = 3
"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.rag.top_k, 3);
        assert_eq!(config.rag.template_name, "master_response");
    }

    #[test]
    fn test_from_file_missing() {
        let err = AppConfig::from_file("/nonexistent/docchat.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }
}
