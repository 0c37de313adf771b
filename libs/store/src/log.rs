//! The Durable Event Log: an append-only stream partitioned by room.
//!
//! Production implementation is NATS JetStream — one stream, one subject per
//! room (`slate.events.{roomId}`), so all events for a room are totally
//! ordered within their subject. Consumers here (the gateway bridge, the
//! presence tracker) use low-latency core subscriptions; the archival
//! collaborator owns its own durable consumer and is out of scope.

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use slate_common::LogEnvelope;

use crate::error::StoreError;

/// Stream holding every room's events.
pub const STREAM_NAME: &str = "SLATE_EVENTS";

/// Subject prefix; the room id is the final token.
pub const SUBJECT_PREFIX: &str = "slate.events";

/// Subject carrying one room's events.
pub fn room_subject(room_id: &str) -> String {
    format!("{SUBJECT_PREFIX}.{room_id}")
}

/// Wildcard matching every room's subject.
pub fn all_rooms_subject() -> String {
    format!("{SUBJECT_PREFIX}.>")
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one envelope to the room's partition.
    async fn append(&self, envelope: &LogEnvelope) -> Result<(), StoreError>;

    /// Live stream of every appended envelope, all rooms.
    async fn subscribe(&self) -> Result<BoxStream<'static, LogEnvelope>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryLogInner {
    history: Vec<LogEnvelope>,
    subscribers: Vec<mpsc::UnboundedSender<LogEnvelope>>,
}

/// In-memory log: retains every appended envelope and fans out to
/// subscribers. Shared by test gateways to exercise cross-process paths.
#[derive(Default)]
pub struct MemoryLog {
    inner: Mutex<MemoryLogInner>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything appended so far, in append order.
    pub fn appended(&self) -> Vec<LogEnvelope> {
        self.inner.lock().unwrap().history.clone()
    }
}

#[async_trait]
impl EventLog for MemoryLog {
    async fn append(&self, envelope: &LogEnvelope) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.history.push(envelope.clone());
        inner
            .subscribers
            .retain(|tx| tx.send(envelope.clone()).is_ok());
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, LogEnvelope>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().subscribers.push(tx);
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|envelope| (envelope, rx))
        });
        Ok(stream.boxed())
    }
}

// ---------------------------------------------------------------------------
// NATS JetStream implementation
// ---------------------------------------------------------------------------

/// JetStream-backed log with acknowledged appends.
#[derive(Clone)]
pub struct JetStreamLog {
    client: async_nats::Client,
    jetstream: async_nats::jetstream::Context,
}

impl JetStreamLog {
    /// Connect and ensure the stream exists.
    pub async fn connect(nats_url: &str) -> Result<Self, StoreError> {
        let client = async_nats::connect(nats_url)
            .await
            .map_err(|e| StoreError::Nats(e.to_string()))?;
        let jetstream = async_nats::jetstream::new(client.clone());

        jetstream
            .get_or_create_stream(async_nats::jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: vec![all_rooms_subject()],
                storage: async_nats::jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| StoreError::Nats(e.to_string()))?;

        Ok(Self { client, jetstream })
    }
}

#[async_trait]
impl EventLog for JetStreamLog {
    async fn append(&self, envelope: &LogEnvelope) -> Result<(), StoreError> {
        let subject = room_subject(envelope.event.room_id());
        let payload: bytes::Bytes = serde_json::to_vec(envelope)?.into();
        self.jetstream
            .publish(subject, payload)
            .await
            .map_err(|e| StoreError::Nats(e.to_string()))?
            .await
            .map_err(|e| StoreError::Nats(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, LogEnvelope>, StoreError> {
        let subscriber = self
            .client
            .subscribe(all_rooms_subject())
            .await
            .map_err(|e| StoreError::Nats(e.to_string()))?;

        let stream = subscriber.filter_map(|message| async move {
            match serde_json::from_slice::<LogEnvelope>(&message.payload) {
                Ok(envelope) => Some(envelope),
                Err(err) => {
                    tracing::warn!(subject = %message.subject, %err, "skipping undecodable log record");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
