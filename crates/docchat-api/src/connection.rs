//! Chat session loop
//!
//! One session per websocket connection. Messages are handled strictly in
//! order: the next frame is not read until the previous answer, including
//! every streamed chunk, has been sent.
//!
//! Author: hephaex@gmail.com

use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use docchat_core::{DocChatError, EnvelopeKind, ResponseEnvelope, Result};
use futures::StreamExt;
use serde::Deserialize;

/// Reply when the pipeline produced no usable answer
pub const NO_RESPONSE_REPLY: &str = "No response found";

/// Reply when generation failed or the envelope was unexpected
pub const ERROR_REPLY: &str = "error";

/// Reply to frames that are not `{"message": "..."}`
pub const INVALID_MESSAGE_REPLY: &str = "Invalid message";

/// Inbound frame, reduced to what the session cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Ping, pong and binary frames
    Ignored,
}

/// Bidirectional text transport
#[async_trait]
pub trait ChatChannel: Send {
    /// Next frame; `None` once the peer closed or the transport failed
    async fn next_frame(&mut self) -> Option<Inbound>;

    /// Send one text frame
    async fn send_text(&mut self, text: String) -> Result<()>;
}

#[async_trait]
impl ChatChannel for WebSocket {
    async fn next_frame(&mut self) -> Option<Inbound> {
        match self.recv().await? {
            Ok(Message::Text(text)) => Some(Inbound::Text(text)),
            Ok(Message::Close(_)) => None,
            Ok(_) => Some(Inbound::Ignored),
            Err(e) => {
                tracing::debug!(error = %e, "Websocket receive failed");
                None
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        self.send(Message::Text(text))
            .await
            .map_err(|e| DocChatError::Other(anyhow::Error::new(e)))
    }
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    message: String,
}

/// Serve one connection until the peer goes away
pub async fn run_session<C: ChatChannel>(channel: &mut C, state: &AppState) {
    let _guard = state.connection_opened();
    tracing::info!("Client connected");

    while let Some(frame) = channel.next_frame().await {
        let Inbound::Text(text) = frame else {
            continue;
        };
        state.increment_messages();

        let outcome = match serde_json::from_str::<IncomingMessage>(&text) {
            Ok(incoming) => {
                tracing::info!(len = incoming.message.len(), "Message received");
                let envelope = state.orchestrator.get_response(&incoming.message).await;
                respond(channel, state, envelope).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Invalid message");
                channel.send_text(INVALID_MESSAGE_REPLY.to_string()).await
            }
        };

        if let Err(e) = outcome {
            tracing::info!(error = %e, "Send failed, closing session");
            break;
        }
    }

    tracing::info!("Client disconnected");
}

async fn respond<C: ChatChannel>(
    channel: &mut C,
    state: &AppState,
    envelope: ResponseEnvelope,
) -> Result<()> {
    if !envelope.result {
        return channel.send_text(NO_RESPONSE_REPLY.to_string()).await;
    }

    match envelope.kind {
        Some(EnvelopeKind::Response) => channel.send_text(envelope.response).await,
        Some(EnvelopeKind::Prompt) => stream_generation(channel, state, &envelope.response).await,
        _ => channel.send_text(ERROR_REPLY.to_string()).await,
    }
}

/// Relay generated chunks in order; any failure ends with a single error reply
async fn stream_generation<C: ChatChannel>(
    channel: &mut C,
    state: &AppState,
    prompt: &str,
) -> Result<()> {
    let mut stream = match state.llm.generate_stream(prompt).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "Generation failed to start");
            return channel.send_text(ERROR_REPLY.to_string()).await;
        }
    };

    let mut sent = 0usize;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                channel.send_text(chunk).await?;
                sent += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, chunks = sent, "Generation failed mid-stream");
                return channel.send_text(ERROR_REPLY.to_string()).await;
            }
        }
    }

    tracing::debug!(chunks = sent, "Generation streamed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_core::testing::{FakeEmbedding, InMemoryIndexProvider, ScriptedLlm};
    use docchat_core::AppConfig;
    use docchat_rag::{PromptLibrary, ResponseOrchestrator};
    use docchat_vector::VectorIndexClient;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<String>,
    }

    #[async_trait]
    impl ChatChannel for Recorder {
        async fn next_frame(&mut self) -> Option<Inbound> {
            None
        }

        async fn send_text(&mut self, text: String) -> Result<()> {
            self.sent.push(text);
            Ok(())
        }
    }

    fn state(llm: Arc<ScriptedLlm>) -> AppState {
        let config = AppConfig::default();
        let index = VectorIndexClient::new(
            Arc::new(FakeEmbedding::new(4)),
            Arc::new(InMemoryIndexProvider::new()),
            &config.rag,
        );
        let orchestrator = ResponseOrchestrator::new(
            Arc::new(index),
            Arc::new(PromptLibrary::default()),
            config.rag.clone(),
        );
        AppState::new(config, Arc::new(orchestrator), llm)
    }

    #[tokio::test]
    async fn test_unexpected_successful_envelope_replies_error() {
        let llm = Arc::new(ScriptedLlm::new(["unused"]));
        let state = state(llm.clone());
        let mut channel = Recorder::default();

        for kind in [Some(EnvelopeKind::Error), None] {
            let envelope = ResponseEnvelope {
                result: true,
                kind,
                response: "ignored".to_string(),
            };
            respond(&mut channel, &state, envelope).await.unwrap();
        }

        assert_eq!(channel.sent, vec![ERROR_REPLY, ERROR_REPLY]);
        assert!(llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_failed_envelope_replies_no_response() {
        let state = state(Arc::new(ScriptedLlm::new(["unused"])));
        let mut channel = Recorder::default();

        respond(&mut channel, &state, ResponseEnvelope::fetch_error())
            .await
            .unwrap();

        assert_eq!(channel.sent, vec![NO_RESPONSE_REPLY]);
    }
}
