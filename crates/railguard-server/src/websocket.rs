//! WebSocket duplex channel
//!
//! One connection is bound to one session. Rail progress and outcomes for
//! that session arrive from the event hub; replies that concern only this
//! connection (detection results, rejected requests) go straight back.

use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use railguard_core::{ClientEvent, Error, ServerEvent};
use railguard_pipeline::ChatRequest;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Events queued for this connection only
const DIRECT_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub session_id: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let session_id = match params.session_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => state.rail.sessions().resolve(&id).id().to_string(),
        None => state.rail.sessions().create().id().to_string(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.rail.hub().subscribe(&session_id);
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerEvent>(DIRECT_BUFFER);
    info!(session_id = %session_id, "WebSocket connected");

    // Event forwarding task
    let forward_session = session_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(session_id = %forward_session, skipped, "Subscriber lagged, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(event) = direct_rx.recv() => event,
            };

            match serde_json::to_string(&event) {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize event"),
            }
        }
    });

    // Receive task
    let rail = Arc::clone(&state.rail);
    let recv_session = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_client_text(&rail, &recv_session, &text, &direct_tx).await
                }
                Message::Close(_) => break,
                // Pings are answered by axum
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            debug!("Send task completed");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            debug!("Receive task completed");
            send_task.abort();
        }
    }
    info!(session_id = %session_id, "WebSocket disconnected");
}

async fn handle_client_text(
    rail: &Arc<railguard_pipeline::Rail>,
    session_id: &str,
    text: &str,
    direct: &mpsc::Sender<ServerEvent>,
) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            let err = Error::invalid_request(format!("malformed event: {e}"));
            let _ = direct.send(ServerEvent::error(session_id, "", &err)).await;
            return;
        }
    };

    if let Some(other) = event.session_id().filter(|id| *id != session_id) {
        let err = Error::invalid_request(format!(
            "connection is bound to session {session_id}, not {other}"
        ));
        let message_id = event.message_id().unwrap_or_default().to_string();
        let _ = direct.send(ServerEvent::error(session_id, message_id, &err)).await;
        return;
    }

    let message_id = event
        .message_id()
        .filter(|id| !id.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    match event {
        ClientEvent::ChatMessage { text, config, .. } => {
            let request = ChatRequest::new(session_id, text)
                .with_message_id(message_id.clone())
                .with_overrides(config);
            let rail = Arc::clone(rail);
            let direct = direct.clone();
            let session_id = session_id.to_string();

            // Outcomes arrive through the hub; only rejections come back here
            tokio::spawn(async move {
                match rail.submit(request).await {
                    Ok(_) => {}
                    Err(Error::DuplicateMessage(_)) => {
                        // A client resending after a reconnect; the turn
                        // still running publishes to this connection too
                        debug!(session_id = %session_id, message_id = %message_id, "Resent message already in flight");
                    }
                    Err(err) => {
                        debug!(session_id = %session_id, message_id = %message_id, error = %err, "Message rejected");
                        let _ = direct
                            .send(ServerEvent::error(session_id, message_id, &err))
                            .await;
                    }
                }
            });
        }
        ClientEvent::DetectionRequest {
            text, detectors, ..
        } => {
            let rail = Arc::clone(rail);
            let direct = direct.clone();
            let session_id = session_id.to_string();

            tokio::spawn(async move {
                let result = rail
                    .detect(Some(session_id.as_str()), &text, detectors.as_deref())
                    .await;
                let reply = match result {
                    Ok(verdict) => ServerEvent::DetectionResult {
                        session_id,
                        message_id,
                        verdict,
                    },
                    Err(err) => ServerEvent::error(session_id, message_id, &err),
                };
                let _ = direct.send(reply).await;
            });
        }
    }
}
