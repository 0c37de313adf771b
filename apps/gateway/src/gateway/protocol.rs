//! Wire-format frames for the client protocol.
//!
//! Inbound frames are parsed in two steps — JSON first, then the `type` tag —
//! so a malformed frame and an unrecognized kind produce distinct error
//! replies. Neither closes the connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use slate_common::Coordinates;

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Join { room_id: String, user_id: String },
    Draw { coordinates: Coordinates },
    Leave,
}

/// Why an inbound frame was rejected. Each variant maps to one error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not JSON, or a payload that doesn't decode.
    InvalidFormat,
    /// Missing or unrecognized `type` tag.
    UnknownType,
    /// `join` without a room id or user id.
    MissingFields,
}

impl FrameError {
    pub fn message(&self) -> &'static str {
        match self {
            FrameError::InvalidFormat => "invalid_format",
            FrameError::UnknownType => "unknown_type",
            FrameError::MissingFields => "missing_fields",
        }
    }
}

#[derive(Debug, Deserialize)]
struct JoinPayload {
    #[serde(rename = "roomId", default)]
    room_id: Option<String>,
    #[serde(rename = "userId", default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DrawPayload {
    coordinates: Coordinates,
}

/// Parse one inbound frame, dispatching on the `type` tag.
pub fn parse_client_frame(text: &str) -> Result<ClientFrame, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(|_| FrameError::InvalidFormat)?;

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_string(),
        None => return Err(FrameError::UnknownType),
    };

    match kind.as_str() {
        "join" => {
            let payload: JoinPayload =
                serde_json::from_value(value).map_err(|_| FrameError::InvalidFormat)?;
            match (payload.room_id, payload.user_id) {
                (Some(room_id), Some(user_id)) if !room_id.is_empty() && !user_id.is_empty() => {
                    Ok(ClientFrame::Join { room_id, user_id })
                }
                _ => Err(FrameError::MissingFields),
            }
        }
        "draw" => {
            let payload: DrawPayload =
                serde_json::from_value(value).map_err(|_| FrameError::InvalidFormat)?;
            Ok(ClientFrame::Draw {
                coordinates: payload.coordinates,
            })
        }
        "leave" => Ok(ClientFrame::Leave),
        _ => Err(FrameError::UnknownType),
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// A draw event as replayed inside `init_state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    Draw {
        coordinates: Coordinates,
        timestamp: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    InitState {
        events: Vec<ReplayEvent>,
    },
    #[serde(rename_all = "camelCase")]
    Joined {
        room_id: String,
        user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined {
        user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Draw {
        user_id: String,
        room_id: String,
        coordinates: Coordinates,
        timestamp: i64,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}

/// Error reply for an action that requires a joined session.
pub const ERR_NOT_JOINED: &str = "not_joined";
/// Error reply for a second `join` on an already-joined session.
pub const ERR_ALREADY_JOINED: &str = "already_joined";
/// Error reply when the replay read exhausted its retries.
pub const ERR_JOIN_FAILED: &str = "join_failed";
/// Error reply when the durable publish exhausted its retries.
pub const ERR_PUBLISH_FAILED: &str = "publish_failed";
