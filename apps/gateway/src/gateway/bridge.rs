//! Log-subscription-to-local-fan-out bridge.
//!
//! A draw broadcast through the in-process router only reaches sessions
//! local to the publishing process. Every gateway therefore also subscribes
//! to the durable log and forwards remote events into its own router, so
//! room membership is correct regardless of which process a socket lands on.

use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use slate_common::{Event, LogEnvelope};
use slate_store::{retry, BackoffPolicy};

use crate::AppState;

use super::protocol::ServerFrame;
use super::rooms::Exclude;

/// Run the bridge until the process exits. Subscription drops are
/// re-established with bounded backoff; only exhaustion gives up.
pub async fn run(state: AppState) {
    loop {
        let stream = match retry(&BackoffPolicy::startup(), "log subscribe", || {
            state.log.subscribe()
        })
        .await
        {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(%err, "log bridge gave up; cross-process fan-out disabled");
                return;
            }
        };

        tracing::info!(process_id = %state.process_id, "log bridge subscribed");
        consume(&state, stream).await;
        tracing::warn!("log subscription ended, resubscribing");
    }
}

async fn consume(state: &AppState, mut stream: BoxStream<'static, LogEnvelope>) {
    while let Some(envelope) = stream.next().await {
        forward(state, &envelope);
    }
}

/// Forward one log record to local sessions.
///
/// Skips records this process published (their local fan-out already
/// happened) and rooms with no local sessions. The originating user's own
/// sessions are excluded to avoid echo.
pub(crate) fn forward(state: &AppState, envelope: &LogEnvelope) {
    if envelope.origin == state.process_id {
        return;
    }

    let room_id = envelope.event.room_id();
    if !state.rooms.contains_room(room_id) {
        return;
    }

    match &envelope.event {
        Event::Draw {
            user_id,
            coordinates,
            timestamp,
            ..
        } => {
            let frame = ServerFrame::Draw {
                user_id: user_id.clone(),
                room_id: room_id.to_string(),
                coordinates: *coordinates,
                timestamp: *timestamp,
            };
            state.rooms.broadcast(room_id, &frame, Exclude::User(user_id));
        }
        Event::Join { user_id, .. } => {
            let frame = ServerFrame::UserJoined {
                user_id: user_id.clone(),
            };
            state.rooms.broadcast(room_id, &frame, Exclude::User(user_id));
        }
        // Leave, activity, and presence-derived facts have no client frame.
        _ => {}
    }
}
