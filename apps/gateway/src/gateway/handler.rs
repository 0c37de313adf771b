//! Inbound frame dispatch: join, draw, leave, and the error replies.

use std::sync::Arc;

use serde_json::Value;

use slate_common::Event;
use slate_store::{retry, BackoffPolicy, BusMessage, JoinNotice, LeaveNotice, SessionNotice};

use crate::AppState;

use super::protocol::{
    parse_client_frame, ClientFrame, ReplayEvent, ServerFrame, ERR_ALREADY_JOINED,
    ERR_JOIN_FAILED, ERR_NOT_JOINED, ERR_PUBLISH_FAILED,
};
use super::rooms::Exclude;
use super::session::Session;

/// Dispatch one inbound frame. Protocol failures answer an error frame and
/// leave the connection open.
pub async fn handle_frame(state: &AppState, session: &Arc<Session>, text: &str) {
    match parse_client_frame(text) {
        Ok(ClientFrame::Join { room_id, user_id }) => {
            handle_join(state, session, room_id, user_id).await;
        }
        Ok(ClientFrame::Draw { coordinates }) => {
            handle_draw(state, session, coordinates).await;
        }
        Ok(ClientFrame::Leave) => depart(state, session).await,
        Err(err) => {
            tracing::debug!(
                session_id = %session.session_id,
                reason = err.message(),
                "rejected inbound frame"
            );
            session.try_send_frame(&ServerFrame::error(err.message()));
        }
    }
}

async fn handle_join(state: &AppState, session: &Arc<Session>, room_id: String, user_id: String) {
    if !session.join(room_id.clone(), user_id.clone()) {
        session.try_send_frame(&ServerFrame::error(ERR_ALREADY_JOINED));
        return;
    }

    // Snapshot first, register after: everything queued here sits ahead of
    // any live broadcast on the FIFO outbound queue, so the client observes
    // state-before-live.
    let fields = match retry(&BackoffPolicy::publish(), "replay read", || {
        state.cache.room_state(&room_id)
    })
    .await
    {
        Ok(fields) => fields,
        Err(err) => {
            tracing::error!(
                session_id = %session.session_id,
                %room_id,
                %err,
                "replay read exhausted"
            );
            session.take_membership();
            session.try_send_frame(&ServerFrame::error(ERR_JOIN_FAILED));
            return;
        }
    };

    let events = replay_events(fields);
    tracing::info!(
        session_id = %session.session_id,
        %room_id,
        %user_id,
        replayed = events.len(),
        "session joined room"
    );
    session.try_send_frame(&ServerFrame::InitState { events });
    session.try_send_frame(&ServerFrame::Joined {
        room_id: room_id.clone(),
        user_id: user_id.clone(),
    });

    state.rooms.join(&room_id, session.clone());
    state.rooms.broadcast(
        &room_id,
        &ServerFrame::UserJoined {
            user_id: user_id.clone(),
        },
        Exclude::Session(&session.session_id),
    );

    let joined_at = state.stamper.assign();
    notify_presence_join(state, &room_id, &user_id, joined_at).await;

    let event = Event::Join {
        room_id,
        user_id,
        timestamp: joined_at,
    };
    spawn_publish(state, session, event, false);
}

async fn handle_draw(
    state: &AppState,
    session: &Arc<Session>,
    coordinates: slate_common::Coordinates,
) {
    let Some(membership) = session.membership() else {
        session.try_send_frame(&ServerFrame::error(ERR_NOT_JOINED));
        return;
    };

    let timestamp = state.stamper.assign();

    // Local fan-out happens before durability: the room sees the stroke even
    // when the log is temporarily down.
    let frame = ServerFrame::Draw {
        user_id: membership.user_id.clone(),
        room_id: membership.room_id.clone(),
        coordinates,
        timestamp,
    };
    state
        .rooms
        .broadcast(&membership.room_id, &frame, Exclude::Session(&session.session_id));

    let event = Event::Draw {
        room_id: membership.room_id,
        user_id: membership.user_id,
        coordinates,
        timestamp,
    };
    spawn_publish(state, session, event, true);
}

/// Leave handling, shared by the explicit `leave` frame and disconnect
/// cleanup. A session that never joined is a silent no-op.
pub async fn depart(state: &AppState, session: &Arc<Session>) {
    let Some(membership) = session.take_membership() else {
        return;
    };

    state.rooms.leave(&membership.room_id, &session.session_id);
    tracing::info!(
        session_id = %session.session_id,
        room_id = %membership.room_id,
        user_id = %membership.user_id,
        "session left room"
    );

    let leave = BusMessage::Leave(LeaveNotice {
        user_id: membership.user_id.clone(),
        room_id: membership.room_id.clone(),
    });
    if let Err(err) = state.bus.publish(&leave).await {
        tracing::warn!(session_id = %session.session_id, %err, "leave notify failed");
    }

    let event = Event::Leave {
        room_id: membership.room_id,
        user_id: membership.user_id,
        timestamp: state.stamper.assign(),
    };
    spawn_publish(state, session, event, false);
}

/// A liveness probe response from a joined session counts as activity.
pub fn record_activity(state: &AppState, session: &Arc<Session>) {
    session.mark_alive();
    if let Some(membership) = session.membership() {
        let event = Event::UserActivity {
            room_id: membership.room_id,
            user_id: membership.user_id,
            timestamp: state.stamper.assign(),
        };
        spawn_publish(state, session, event, false);
    }
}

/// Decode and order the cached draw fields for `init_state`.
fn replay_events(fields: Vec<(String, String)>) -> Vec<ReplayEvent> {
    let mut events: Vec<ReplayEvent> = fields
        .into_iter()
        .filter_map(|(field, value)| {
            let timestamp = slate_common::event::parse_draw_field_key(&field)?;
            let coordinates = serde_json::from_str(&value).ok()?;
            Some(ReplayEvent::Draw {
                coordinates,
                timestamp,
            })
        })
        .collect();
    events.sort_by_key(|ReplayEvent::Draw { timestamp, .. }| *timestamp);
    events
}

/// Publish in a detached task: closing the connection never cancels an
/// in-flight append for an event already accepted.
fn spawn_publish(state: &AppState, session: &Arc<Session>, event: Event, report_failure: bool) {
    let publisher = state.publisher.clone();
    let origin = state.process_id.clone();
    let session = session.clone();
    tokio::spawn(async move {
        if let Err(err) = publisher.publish(&origin, &event).await {
            tracing::error!(session_id = %session.session_id, %err, "publish failed");
            if report_failure {
                session.try_send_frame(&ServerFrame::error(ERR_PUBLISH_FAILED));
            }
        }
    });
}

async fn notify_presence_join(state: &AppState, room_id: &str, user_id: &str, joined_at: i64) {
    let join = BusMessage::Join(JoinNotice {
        user_id: user_id.to_string(),
        room_id: room_id.to_string(),
        metadata: Value::Null,
    });
    if let Err(err) = state.bus.publish(&join).await {
        tracing::warn!(%room_id, %user_id, %err, "join notify failed");
    }

    let session_notice = BusMessage::Session(SessionNotice {
        origin_process_id: state.process_id.clone(),
        user_id: user_id.to_string(),
        room_id: room_id.to_string(),
        joined_at,
    });
    if let Err(err) = state.bus.publish(&session_notice).await {
        tracing::warn!(%room_id, %user_id, %err, "session replication notify failed");
    }
}
