//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;

use slate_common::id::{prefix, prefixed_ulid};

use crate::AppState;

use super::handler;
use super::protocol::{FrameError, ServerFrame};
use super::session::{SendOutcome, Session};

/// Bound on each connection's outbound queue. A client that falls this far
/// behind is disconnected rather than allowed to stall its room.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_CAPACITY);
    let session = Arc::new(Session::new(prefixed_ulid(prefix::SESSION), tx));

    tracing::info!(session_id = %session.session_id, "client connected");

    // Drain the outbound queue onto the socket. Aborted on disconnect, which
    // cancels only this connection's pending sends.
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut probe_timer = time::interval(state.config.heartbeat_interval);
    probe_timer.tick().await; // First tick fires immediately; skip it.

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handler::handle_frame(&state, &session, &text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        match std::str::from_utf8(&data) {
                            Ok(text) => handler::handle_frame(&state, &session, text).await,
                            Err(_) => {
                                session.try_send_frame(&ServerFrame::error(
                                    FrameError::InvalidFormat.message(),
                                ));
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        handler::record_activity(&state, &session);
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // The protocol layer answers pings for us.
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(session_id = %session.session_id, %err, "ws read error");
                        break;
                    }
                }
            }

            // Server-initiated liveness probe. A session that failed to
            // answer the previous probe is closed.
            _ = probe_timer.tick() => {
                if !session.probe() {
                    tracing::info!(session_id = %session.session_id, "liveness timeout");
                    break;
                }
                if session.try_send_message(Message::Ping(Default::default())) != SendOutcome::Sent {
                    break;
                }
            }

            // Kicked by the router for not draining its queue.
            _ = session.kicked() => {
                tracing::warn!(session_id = %session.session_id, "closing unresponsive session");
                break;
            }
        }
    }

    // Same cleanup as an explicit leave.
    handler::depart(&state, &session).await;
    send_task.abort();

    tracing::info!(session_id = %session.session_id, "client disconnected");
}
