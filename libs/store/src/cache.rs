//! The Fast Room Cache: per-room draw state for join-time replay, room
//! metadata counters, and derived presence records.
//!
//! Backed by Redis in production and an in-memory map in tests. The cache is
//! not durable; the event log is authoritative for anything the cache loses.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde_json::Value;

use slate_common::{Coordinates, PresenceRecord};

use crate::error::StoreError;

/// Hash holding one room's draw events, field `draw:{timestamp}`.
fn state_key(room_id: &str) -> String {
    format!("room:{room_id}:state")
}

/// Set of user ids currently present in a room.
fn users_key(room_id: &str) -> String {
    format!("room:{room_id}:users")
}

/// Hash of room aggregates: `activeUsers`, `lastActivity`.
fn meta_key(room_id: &str) -> String {
    format!("room:{room_id}:metadata")
}

/// One user's presence record.
fn user_key(user_id: &str) -> String {
    format!("user:{user_id}")
}

const USER_KEY_PREFIX: &str = "user:";

#[async_trait]
pub trait RoomCache: Send + Sync {
    /// Record a draw event for join-time replay.
    async fn append_draw(
        &self,
        room_id: &str,
        timestamp: i64,
        coordinates: &Coordinates,
    ) -> Result<(), StoreError>;

    /// All `(field, value)` pairs of a room's state hash, unordered.
    async fn room_state(&self, room_id: &str) -> Result<Vec<(String, String)>, StoreError>;

    async fn add_room_user(&self, room_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn remove_room_user(&self, room_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn room_users(&self, room_id: &str) -> Result<Vec<String>, StoreError>;

    /// Increment (or decrement) the room's active-user counter; returns the
    /// new value.
    async fn bump_active_users(&self, room_id: &str, delta: i64) -> Result<i64, StoreError>;

    async fn set_last_activity(&self, room_id: &str, timestamp: i64) -> Result<(), StoreError>;

    async fn room_metadata(&self, room_id: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn put_presence(
        &self,
        user_id: &str,
        record: &PresenceRecord,
    ) -> Result<(), StoreError>;

    async fn get_presence(&self, user_id: &str) -> Result<Option<PresenceRecord>, StoreError>;

    /// Refresh a record's last-seen timestamp. Returns `false` when there is
    /// no record to refresh.
    async fn touch_presence(&self, user_id: &str, last_seen: i64) -> Result<bool, StoreError>;

    async fn delete_presence(&self, user_id: &str) -> Result<(), StoreError>;

    /// All user ids with a presence record (the sweep's scan set).
    async fn presence_user_ids(&self) -> Result<Vec<String>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    room_state: HashMap<String, HashMap<String, String>>,
    room_users: HashMap<String, HashSet<String>>,
    room_meta: HashMap<String, HashMap<String, String>>,
    presence: HashMap<String, PresenceRecord>,
}

#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomCache for MemoryCache {
    async fn append_draw(
        &self,
        room_id: &str,
        timestamp: i64,
        coordinates: &Coordinates,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_string(coordinates)?;
        self.inner
            .lock()
            .unwrap()
            .room_state
            .entry(room_id.to_string())
            .or_default()
            .insert(slate_common::event::draw_field_key(timestamp), value);
        Ok(())
    }

    async fn room_state(&self, room_id: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .room_state
            .get(room_id)
            .map(|fields| {
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_room_user(&self, room_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .room_users
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        Ok(())
    }

    async fn remove_room_user(&self, room_id: &str, user_id: &str) -> Result<(), StoreError> {
        if let Some(users) = self.inner.lock().unwrap().room_users.get_mut(room_id) {
            users.remove(user_id);
        }
        Ok(())
    }

    async fn room_users(&self, room_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .room_users
            .get(room_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn bump_active_users(&self, room_id: &str, delta: i64) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let meta = inner.room_meta.entry(room_id.to_string()).or_default();
        let current: i64 = meta
            .get("activeUsers")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let next = current + delta;
        meta.insert("activeUsers".to_string(), next.to_string());
        Ok(next)
    }

    async fn set_last_activity(&self, room_id: &str, timestamp: i64) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .room_meta
            .entry(room_id.to_string())
            .or_default()
            .insert("lastActivity".to_string(), timestamp.to_string());
        Ok(())
    }

    async fn room_metadata(&self, room_id: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .room_meta
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_presence(
        &self,
        user_id: &str,
        record: &PresenceRecord,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .presence
            .insert(user_id.to_string(), record.clone());
        Ok(())
    }

    async fn get_presence(&self, user_id: &str) -> Result<Option<PresenceRecord>, StoreError> {
        Ok(self.inner.lock().unwrap().presence.get(user_id).cloned())
    }

    async fn touch_presence(&self, user_id: &str, last_seen: i64) -> Result<bool, StoreError> {
        match self.inner.lock().unwrap().presence.get_mut(user_id) {
            Some(record) => {
                record.last_seen = last_seen;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_presence(&self, user_id: &str) -> Result<(), StoreError> {
        self.inner.lock().unwrap().presence.remove(user_id);
        Ok(())
    }

    async fn presence_user_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().unwrap().presence.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Redis-backed cache over a multiplexed [`redis::aio::ConnectionManager`].
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl RoomCache for RedisCache {
    async fn append_draw(
        &self,
        room_id: &str,
        timestamp: i64,
        coordinates: &Coordinates,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(coordinates)?;
        conn.hset::<_, _, _, ()>(
            state_key(room_id),
            slate_common::event::draw_field_key(timestamp),
            value,
        )
        .await?;
        Ok(())
    }

    async fn room_state(&self, room_id: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(state_key(room_id)).await?;
        Ok(fields.into_iter().collect())
    }

    async fn add_room_user(&self, room_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(users_key(room_id), user_id).await?;
        Ok(())
    }

    async fn remove_room_user(&self, room_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(users_key(room_id), user_id).await?;
        Ok(())
    }

    async fn room_users(&self, room_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(users_key(room_id)).await?)
    }

    async fn bump_active_users(&self, room_id: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hincr(meta_key(room_id), "activeUsers", delta).await?)
    }

    async fn set_last_activity(&self, room_id: &str, timestamp: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(meta_key(room_id), "lastActivity", timestamp)
            .await?;
        Ok(())
    }

    async fn room_metadata(&self, room_id: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(meta_key(room_id)).await?)
    }

    async fn put_presence(
        &self,
        user_id: &str,
        record: &PresenceRecord,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let items = [
            ("roomId", record.room_id.clone()),
            ("lastSeen", record.last_seen.to_string()),
            ("metadata", serde_json::to_string(&record.metadata)?),
        ];
        conn.hset_multiple::<_, _, _, ()>(user_key(user_id), &items)
            .await?;
        Ok(())
    }

    async fn get_presence(&self, user_id: &str) -> Result<Option<PresenceRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(user_key(user_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let room_id = fields
            .get("roomId")
            .cloned()
            .ok_or_else(|| StoreError::Corrupt(format!("presence {user_id}: missing roomId")))?;
        let last_seen = fields
            .get("lastSeen")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| StoreError::Corrupt(format!("presence {user_id}: bad lastSeen")))?;
        let metadata = fields
            .get("metadata")
            .and_then(|v| serde_json::from_str(v).ok())
            .unwrap_or(Value::Null);
        Ok(Some(PresenceRecord {
            room_id,
            last_seen,
            metadata,
        }))
    }

    async fn touch_presence(&self, user_id: &str, last_seen: i64) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(user_key(user_id)).await?;
        if !exists {
            return Ok(false);
        }
        conn.hset::<_, _, _, ()>(user_key(user_id), "lastSeen", last_seen)
            .await?;
        Ok(true)
    }

    async fn delete_presence(&self, user_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(user_key(user_id)).await?;
        Ok(())
    }

    async fn presence_user_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(format!("{USER_KEY_PREFIX}*")).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(USER_KEY_PREFIX).map(str::to_string))
            .collect())
    }
}
