//! The event model shared by the gateway, the presence tracker, and the
//! durable log.
//!
//! Events are immutable facts. Their only ordering key is the millisecond
//! timestamp assigned by the publishing gateway's [`EventStamper`]; within a
//! room that order is total.
//!
//! [`EventStamper`]: crate::stamp::EventStamper

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stroke segment: start point and end point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

/// An immutable room-scoped fact.
///
/// `join`/`draw`/`leave`/`user_activity` are appended by the gateway that
/// observed the client action; `user_joined`/`user_left` are membership facts
/// derived and appended by the presence tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    #[serde(rename_all = "camelCase")]
    Join {
        room_id: String,
        user_id: String,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Draw {
        room_id: String,
        user_id: String,
        coordinates: Coordinates,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    Leave {
        room_id: String,
        user_id: String,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    UserActivity {
        room_id: String,
        user_id: String,
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined {
        room_id: String,
        user_id: String,
        timestamp: i64,
        #[serde(default)]
        metadata: Value,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft {
        room_id: String,
        user_id: String,
        timestamp: i64,
    },
}

impl Event {
    pub fn room_id(&self) -> &str {
        match self {
            Event::Join { room_id, .. }
            | Event::Draw { room_id, .. }
            | Event::Leave { room_id, .. }
            | Event::UserActivity { room_id, .. }
            | Event::UserJoined { room_id, .. }
            | Event::UserLeft { room_id, .. } => room_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Event::Join { user_id, .. }
            | Event::Draw { user_id, .. }
            | Event::Leave { user_id, .. }
            | Event::UserActivity { user_id, .. }
            | Event::UserJoined { user_id, .. }
            | Event::UserLeft { user_id, .. } => user_id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Event::Join { timestamp, .. }
            | Event::Draw { timestamp, .. }
            | Event::Leave { timestamp, .. }
            | Event::UserActivity { timestamp, .. }
            | Event::UserJoined { timestamp, .. }
            | Event::UserLeft { timestamp, .. } => *timestamp,
        }
    }
}

/// The record shape appended to the durable log.
///
/// `origin` is the process id of the publishing gateway. Gateways subscribed
/// to the log drop envelopes carrying their own origin — the local fan-out
/// for those already happened before the append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEnvelope {
    pub origin: String,
    pub event: Event,
}

/// Cache field key for a draw event within `room:{id}:state`.
pub fn draw_field_key(timestamp: i64) -> String {
    format!("draw:{timestamp}")
}

/// Recover the timestamp from a `draw:{timestamp}` field key.
///
/// Returns `None` for foreign fields so replay can skip them.
pub fn parse_draw_field_key(field: &str) -> Option<i64> {
    let ts = field.strip_prefix("draw:")?;
    ts.parse().ok()
}
