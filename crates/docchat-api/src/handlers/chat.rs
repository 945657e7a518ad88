//! Websocket chat endpoint
//!
//! Author: hephaex@gmail.com

use crate::connection::run_session;
use crate::state::AppState;
use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::Instrument;

/// Upgrade to a websocket and run a chat session on it
pub async fn ws_response(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let connection_id = uuid::Uuid::new_v4();

    ws.on_upgrade(move |mut socket| {
        async move { run_session(&mut socket, &state).await }
            .instrument(tracing::info_span!("ws", connection = %connection_id))
    })
}
