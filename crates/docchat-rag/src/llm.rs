//! LLM Client implementations
//!
//! Google Gemini client with support for both synchronous and streaming
//! responses. Streaming uses server-sent events (`alt=sse`).
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use bytes::Buf;
use docchat_core::{DocChatError, GeminiConfig, LlmClient, Result};
use futures::stream::{BoxStream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

/// Gemini API client
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: model.into(),
        }
    }

    /// Create from config
    pub fn from_config(config: &GeminiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| DocChatError::Config("Gemini API key required".to_string()))?;

        Ok(Self::new(api_key.clone(), config.model.clone())
            .with_base_url(config.base_url.clone()))
    }

    /// Set custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn post(
        &self,
        method: &str,
        query: &[(&str, &str)],
        prompt: &str,
    ) -> Result<reqwest::Response> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(format!("{}/models/{}:{method}", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .query(query)
            .json(&request)
            .send()
            .await
            .map_err(|e| DocChatError::RemoteCall(format!("Gemini request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DocChatError::RemoteCall(format!(
                "Gemini error ({status}): {error_text}"
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self.post("generateContent", &[], prompt).await?;

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| DocChatError::RemoteCall(format!("Failed to parse response: {e}")))?;

        if let Some(error) = result.error {
            return Err(DocChatError::RemoteCall(error.message));
        }

        let text = result.text();
        if text.is_empty() {
            return Err(DocChatError::RemoteCall("No response generated".to_string()));
        }
        Ok(text)
    }

    async fn generate_stream(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        let response = self
            .post("streamGenerateContent", &[("alt", "sse")], prompt)
            .await?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        Ok(sse_text_stream(body))
    }
}

/// Turn an SSE byte stream into generated text chunks.
///
/// Lines are reassembled across network chunks before parsing.
fn sse_text_stream<S, B>(body: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::io::Result<B>> + Send + 'static,
    B: Buf + Send + 'static,
{
    let lines = FramedRead::new(StreamReader::new(body), LinesCodec::new());

    lines
        .filter_map(|line| async move {
            match line {
                Ok(line) => parse_event(&line),
                Err(e) => Some(Err(DocChatError::RemoteCall(format!("Stream error: {e}")))),
            }
        })
        .boxed()
}

/// Parse a single SSE line; `None` for anything that carries no text
fn parse_event(line: &str) -> Option<Result<String>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<GenerateResponse>(data) {
        Ok(event) => {
            if let Some(error) = event.error {
                return Some(Err(DocChatError::RemoteCall(error.message)));
            }
            let text = event.text();
            (!text.is_empty()).then_some(Ok(text))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unparseable stream event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event(text: &str) -> String {
        format!(
            "data: {}\r\n\r\n",
            json!({"candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]})
        )
    }

    #[test]
    fn test_client_creation() {
        let client = GeminiClient::new("test-key", "gemini-1.5-flash");
        assert_eq!(client.model, "gemini-1.5-flash");
    }

    #[test]
    fn test_from_config_requires_key() {
        assert!(matches!(
            GeminiClient::from_config(&GeminiConfig::default()),
            Err(DocChatError::Config(_))
        ));
    }

    #[test]
    fn test_parse_event_variants() {
        assert_eq!(parse_event(&event("Hi")).unwrap().unwrap(), "Hi");
        assert!(parse_event("").is_none());
        assert!(parse_event(": keep-alive").is_none());
        assert!(parse_event("data: not json").is_none());
        assert!(parse_event(r#"data: {"candidates": [{"finishReason": "STOP"}]}"#).is_none());
        assert!(parse_event(r#"data: {"error": {"message": "quota"}}"#)
            .unwrap()
            .is_err());
    }

    #[tokio::test]
    async fn test_stream_reassembles_split_lines() {
        let payload = format!("{}{}", event("Hello, "), event("world"));
        let (a, b) = payload.split_at(payload.len() / 3);
        let (b, c) = b.split_at(b.len() / 2);
        let body = stream::iter(
            [a, b, c]
                .into_iter()
                .map(|part| Ok(bytes::Bytes::from(part.to_string())))
                .collect::<Vec<std::io::Result<_>>>(),
        );

        let chunks: Vec<String> = sse_text_stream(body)
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["Hello, ", "world"]);
    }

    #[tokio::test]
    async fn test_generate_stream_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_partial_json(json!({
                "contents": [{"parts": [{"text": "Say hi"}]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                format!("{}{}{}", event("one "), event("two "), event("three")),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let client = GeminiClient::new("g-key", "gemini-test").with_base_url(server.uri());
        let stream = client.generate_stream("Say hi").await.unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(chunks, vec!["one ", "two ", "three"]);
    }

    #[tokio::test]
    async fn test_generate_stream_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:streamGenerateContent"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = GeminiClient::new("g-key", "gemini-test").with_base_url(server.uri());
        let err = client.generate_stream("hi").await.err().unwrap();
        assert!(matches!(err, DocChatError::RemoteCall(ref m) if m.contains("slow down")));
    }

    #[tokio::test]
    async fn test_generate_joins_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "30 "}, {"text": "days"}]}}]
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new("g-key", "gemini-test").with_base_url(server.uri());
        assert_eq!(client.generate("refund?").await.unwrap(), "30 days");
    }
}
