//! WebSocket transport (§4.8) — one socket per session. Operations flow in
//! as JSON frames, Events flow out the same way; `Operation::Interrupt` is
//! special-cased to bypass the session's submission queue entirely (see
//! `cancel.rs`'s doc comment for why).
//!
//! Grounded on the teacher's `nodes/ws.rs` (split socket, spawned writer
//! task draining an mpsc channel, reader loop dispatching inbound JSON),
//! with the node-handshake/ping-pong protocol dropped — sessions
//! authenticate once via the upgrade request's bearer token and need no
//! per-connection handshake of their own.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use ak_domain::operation::Operation;
use ak_sessions::user_context::AuthError;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Fallback for clients that can't set an `Authorization` header during
    /// the WebSocket handshake.
    pub token: Option<String>,
}

/// GET /v1/ws — upgrade to WebSocket and create a fresh session for the
/// authenticated user. One socket is always exactly one session; there is
/// no multiplexing of several sessions over one connection. Every session
/// drives LLM calls, so the provider-key check happens here rather than
/// being deferred to the first turn.
pub async fn session_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Response {
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .or_else(|| query.token.as_ref().map(|t| format!("Bearer {t}")));

    let user = match state.user_ctx.require_provider_key(auth_header.as_deref()) {
        Ok(user) => user,
        Err(AuthError::Unauthenticated) => {
            return (
                StatusCode::UNAUTHORIZED,
                [(axum::http::header::WWW_AUTHENTICATE, "Bearer")],
                "missing or invalid token",
            )
                .into_response()
        }
        Err(AuthError::ProviderKeyRequired) => {
            return (StatusCode::FORBIDDEN, "provider API key required").into_response()
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user.user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (session_id, mut events) = state.sessions.create_session(&user_id);

    state.connections.register(&session_id, {
        // The writer task below owns the receiving half; give the registry
        // a sender so out-of-band broadcasts (lifecycle shutdown) can also
        // reach this socket without threading through SessionManager.
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session_id_for_writer = session_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    ev = events.recv() => {
                        let Some(ev) = ev else { break };
                        if send_event(&mut ws_sink, &ev).await.is_err() { break; }
                    }
                    ev = rx.recv() => {
                        let Some(ev) = ev else { break };
                        if send_event(&mut ws_sink, &ev).await.is_err() { break; }
                    }
                }
            }
            tracing::debug!(session_id = %session_id_for_writer, "session writer task exiting");
        });
        tx
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<Operation>(&text) {
                Ok(Operation::Interrupt) => {
                    state.cancel_registry.cancel(&session_id);
                }
                Ok(op) => {
                    state.sessions.submit(&session_id, op);
                }
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "ignoring unparseable operation");
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.connections.remove(&session_id);
    // Transport close ends the submission loop (§4.4) even if the client
    // never sent an explicit Shutdown operation.
    state.sessions.shutdown_session(&session_id).await;
}

async fn send_event(
    sink: &mut (impl SinkExt<Message> + Unpin),
    event: &ak_domain::Event,
) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}
