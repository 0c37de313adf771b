//! The Pub/Sub Channel: non-durable cross-process notifications.
//!
//! Three logical topics — join-notify, leave-notify, and session
//! replication — carried over Redis pub/sub in production. Consumed by the
//! presence tracker.

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::StoreError;

pub const CHANNEL_JOIN: &str = "presence:join";
pub const CHANNEL_LEAVE: &str = "presence:leave";
pub const CHANNEL_SESSION: &str = "presence:session";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinNotice {
    pub user_id: String,
    pub room_id: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveNotice {
    pub user_id: String,
    pub room_id: String,
}

/// Advertises a session to other processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotice {
    pub origin_process_id: String,
    pub user_id: String,
    pub room_id: String,
    pub joined_at: i64,
}

/// One message on the bus, tagged by topic.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    Join(JoinNotice),
    Leave(LeaveNotice),
    Session(SessionNotice),
}

#[async_trait]
pub trait PresenceBus: Send + Sync {
    async fn publish(&self, message: &BusMessage) -> Result<(), StoreError>;

    /// Live stream over all three topics.
    async fn subscribe(&self) -> Result<BoxStream<'static, BusMessage>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<BusMessage>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceBus for MemoryBus {
    async fn publish(&self, message: &BusMessage) -> Result<(), StoreError> {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, BusMessage>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        });
        Ok(stream.boxed())
    }
}

// ---------------------------------------------------------------------------
// Redis pub/sub implementation
// ---------------------------------------------------------------------------

/// Redis pub/sub bus. Publishing goes through a multiplexed connection
/// manager; each subscriber holds its own dedicated pub/sub connection.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    conn: redis::aio::ConnectionManager,
}

impl RedisBus {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl PresenceBus for RedisBus {
    async fn publish(&self, message: &BusMessage) -> Result<(), StoreError> {
        use redis::AsyncCommands;

        let (channel, payload) = match message {
            BusMessage::Join(notice) => (CHANNEL_JOIN, serde_json::to_string(notice)?),
            BusMessage::Leave(notice) => (CHANNEL_LEAVE, serde_json::to_string(notice)?),
            BusMessage::Session(notice) => (CHANNEL_SESSION, serde_json::to_string(notice)?),
        };
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, BusMessage>, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(CHANNEL_JOIN).await?;
        pubsub.subscribe(CHANNEL_LEAVE).await?;
        pubsub.subscribe(CHANNEL_SESSION).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let channel = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(err) => {
                    tracing::warn!(%channel, %err, "unreadable bus payload");
                    return None;
                }
            };
            decode_bus_message(&channel, &payload)
        });
        Ok(stream.boxed())
    }
}

fn decode_bus_message(channel: &str, payload: &str) -> Option<BusMessage> {
    let decoded = match channel {
        CHANNEL_JOIN => serde_json::from_str(payload).map(BusMessage::Join),
        CHANNEL_LEAVE => serde_json::from_str(payload).map(BusMessage::Leave),
        CHANNEL_SESSION => serde_json::from_str(payload).map(BusMessage::Session),
        _ => return None,
    };
    match decoded {
        Ok(message) => Some(message),
        Err(err) => {
            tracing::warn!(%channel, %err, "skipping undecodable bus message");
            None
        }
    }
}
