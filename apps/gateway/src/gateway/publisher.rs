//! Turns an in-memory event into its two side effects: the cache write that
//! powers join-time replay and the durable append the archival side and the
//! presence tracker consume.
//!
//! The two writes are deliberately not transactional. The log is
//! authoritative for anything the cache loses; the cache is authoritative
//! for join-time replay under normal operation.

use std::sync::Arc;

use thiserror::Error;

use slate_common::{Event, LogEnvelope};
use slate_store::{retry, BackoffPolicy, EventLog, RetryExhausted, RoomCache, StoreError};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("cache write exhausted: {0}")]
    Cache(RetryExhausted<StoreError>),
    #[error("durable append exhausted: {0}")]
    Log(RetryExhausted<StoreError>),
}

pub struct EventPublisher {
    cache: Arc<dyn RoomCache>,
    log: Arc<dyn EventLog>,
    policy: BackoffPolicy,
}

impl EventPublisher {
    pub fn new(cache: Arc<dyn RoomCache>, log: Arc<dyn EventLog>) -> Self {
        Self::with_policy(cache, log, BackoffPolicy::publish())
    }

    pub fn with_policy(
        cache: Arc<dyn RoomCache>,
        log: Arc<dyn EventLog>,
        policy: BackoffPolicy,
    ) -> Self {
        Self { cache, log, policy }
    }

    /// Write the event's side effects, each retried independently.
    ///
    /// Draw events hit both the cache and the log; everything else only the
    /// log. A log failure wins over a cache failure when both exhaust, since
    /// the log is the authoritative store.
    pub async fn publish(&self, origin: &str, event: &Event) -> Result<(), PublishError> {
        let cache_result = match event {
            Event::Draw {
                room_id,
                coordinates,
                timestamp,
                ..
            } => retry(&self.policy, "cache draw write", || {
                self.cache.append_draw(room_id, *timestamp, coordinates)
            })
            .await
            .map_err(PublishError::Cache),
            _ => Ok(()),
        };

        let envelope = LogEnvelope {
            origin: origin.to_string(),
            event: event.clone(),
        };
        let log_result = retry(&self.policy, "durable append", || self.log.append(&envelope))
            .await
            .map_err(PublishError::Log);

        log_result.and(cache_result)
    }
}
