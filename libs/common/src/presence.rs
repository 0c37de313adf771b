use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Derived per-user membership state, keyed `user:{userId}` in the cache.
///
/// Created on join, refreshed on activity, deleted on leave or by the
/// inactivity sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    /// The room this user is currently in.
    pub room_id: String,
    /// Last activity (ms since Unix epoch).
    pub last_seen: i64,
    /// Caller-supplied metadata, passed through untouched.
    #[serde(default)]
    pub metadata: Value,
}

impl PresenceRecord {
    pub fn new(room_id: impl Into<String>, last_seen: i64, metadata: Value) -> Self {
        Self {
            room_id: room_id.into(),
            last_seen,
            metadata,
        }
    }
}
