//! Derives per-user membership and liveness from the pub/sub notices and the
//! durable log's activity stream.
//!
//! State lives in the cache (`user:{id}` records, `room:{id}:users` sets,
//! `room:{id}:metadata` counters), so a tracker restart forgets nothing.
//! Every membership mutation also appends a durable `user_joined`/`user_left`
//! fact for the archival side.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;

use slate_common::id::{prefix, prefixed_ulid};
use slate_common::{Event, EventStamper, LogEnvelope, PresenceRecord};
use slate_store::{
    retry, BackoffPolicy, BusMessage, EventLog, JoinNotice, PresenceBus, RoomCache, StoreError,
};

pub struct PresenceTracker {
    cache: Arc<dyn RoomCache>,
    log: Arc<dyn EventLog>,
    bus: Arc<dyn PresenceBus>,
    stamper: EventStamper,
    heartbeat_interval: Duration,
    process_id: String,
}

impl PresenceTracker {
    pub fn new(
        cache: Arc<dyn RoomCache>,
        log: Arc<dyn EventLog>,
        bus: Arc<dyn PresenceBus>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            cache,
            log,
            bus,
            stamper: EventStamper::new(),
            heartbeat_interval,
            process_id: prefixed_ulid(prefix::TRACKER),
        }
    }

    /// Consume both input streams and run the sweep until the process exits.
    /// Dropped subscriptions are re-established with bounded backoff.
    pub async fn run(self: Arc<Self>, sweep_interval: Duration) {
        loop {
            let policy = BackoffPolicy::startup();
            let mut bus_stream = match retry(&policy, "bus subscribe", || self.bus.subscribe()).await
            {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::error!(%err, "bus subscription gave up");
                    return;
                }
            };
            let mut log_stream = match retry(&policy, "log subscribe", || self.log.subscribe()).await
            {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::error!(%err, "log subscription gave up");
                    return;
                }
            };

            tracing::info!(process_id = %self.process_id, "presence tracker consuming");

            let mut sweep_timer = tokio::time::interval(sweep_interval);
            sweep_timer.tick().await; // First tick fires immediately; skip it.

            loop {
                tokio::select! {
                    notice = bus_stream.next() => {
                        match notice {
                            Some(message) => self.handle_bus_message(message).await,
                            None => break,
                        }
                    }
                    record = log_stream.next() => {
                        match record {
                            Some(envelope) => self.handle_log_record(&envelope).await,
                            None => break,
                        }
                    }
                    _ = sweep_timer.tick() => {
                        // A failed iteration never halts the next one.
                        if let Err(err) = self.sweep().await {
                            tracing::error!(%err, "presence sweep failed");
                        }
                    }
                }
            }

            tracing::warn!("input stream ended, resubscribing");
        }
    }

    pub async fn handle_bus_message(&self, message: BusMessage) {
        match message {
            BusMessage::Join(notice) => {
                if let Err(err) = self.handle_join(&notice).await {
                    tracing::warn!(user_id = %notice.user_id, %err, "join handling failed");
                }
            }
            BusMessage::Leave(notice) => {
                if let Err(err) = self.handle_leave(&notice.user_id, &notice.room_id).await {
                    tracing::warn!(user_id = %notice.user_id, %err, "leave handling failed");
                }
            }
            BusMessage::Session(notice) => {
                // A replicated session is a live session.
                tracing::debug!(
                    origin = %notice.origin_process_id,
                    user_id = %notice.user_id,
                    room_id = %notice.room_id,
                    "session replicated"
                );
                let now = Utc::now().timestamp_millis();
                if let Err(err) = self.cache.touch_presence(&notice.user_id, now).await {
                    tracing::warn!(user_id = %notice.user_id, %err, "presence touch failed");
                }
            }
        }
    }

    pub async fn handle_log_record(&self, envelope: &LogEnvelope) {
        match &envelope.event {
            Event::Draw {
                user_id, room_id, ..
            }
            | Event::UserActivity {
                user_id, room_id, ..
            } => {
                if let Err(err) = self.handle_activity(user_id, room_id).await {
                    tracing::warn!(%user_id, %err, "activity handling failed");
                }
            }
            _ => {}
        }
    }

    async fn handle_join(&self, notice: &JoinNotice) -> Result<(), StoreError> {
        let timestamp = self.stamper.assign();

        self.cache
            .add_room_user(&notice.room_id, &notice.user_id)
            .await?;
        self.cache
            .put_presence(
                &notice.user_id,
                &PresenceRecord::new(&notice.room_id, timestamp, notice.metadata.clone()),
            )
            .await?;
        let active = self.cache.bump_active_users(&notice.room_id, 1).await?;
        self.cache
            .set_last_activity(&notice.room_id, timestamp)
            .await?;

        tracing::info!(
            user_id = %notice.user_id,
            room_id = %notice.room_id,
            active,
            "user joined"
        );

        self.append(Event::UserJoined {
            room_id: notice.room_id.clone(),
            user_id: notice.user_id.clone(),
            timestamp,
            metadata: notice.metadata.clone(),
        })
        .await;
        Ok(())
    }

    /// Shared by explicit leaves and sweep evictions, so room counters stay
    /// consistent and each departure publishes exactly one `user_left`.
    pub async fn handle_leave(&self, user_id: &str, room_id: &str) -> Result<(), StoreError> {
        let timestamp = self.stamper.assign();

        self.cache.remove_room_user(room_id, user_id).await?;
        self.cache.delete_presence(user_id).await?;
        let active = self.cache.bump_active_users(room_id, -1).await?;

        tracing::info!(%user_id, %room_id, active, "user left");

        self.append(Event::UserLeft {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            timestamp,
        })
        .await;
        Ok(())
    }

    async fn handle_activity(&self, user_id: &str, room_id: &str) -> Result<(), StoreError> {
        let now = Utc::now().timestamp_millis();
        self.cache.touch_presence(user_id, now).await?;
        self.cache.set_last_activity(room_id, now).await?;
        Ok(())
    }

    /// Evict users whose last activity is older than twice the heartbeat
    /// interval. Returns the number of evictions.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let threshold =
            Utc::now().timestamp_millis() - 2 * self.heartbeat_interval.as_millis() as i64;
        let mut evicted = 0;

        for user_id in self.cache.presence_user_ids().await? {
            let record = match self.cache.get_presence(&user_id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => {
                    // One bad entry must not stop the scan.
                    tracing::warn!(%user_id, %err, "unreadable presence record");
                    continue;
                }
            };

            if record.last_seen < threshold {
                match self.handle_leave(&user_id, &record.room_id).await {
                    Ok(()) => {
                        evicted += 1;
                        tracing::info!(%user_id, room_id = %record.room_id, "evicted inactive user");
                    }
                    Err(err) => {
                        tracing::warn!(%user_id, %err, "eviction failed");
                    }
                }
            }
        }

        Ok(evicted)
    }

    async fn append(&self, event: Event) {
        let envelope = LogEnvelope {
            origin: self.process_id.clone(),
            event,
        };
        if let Err(err) = retry(&BackoffPolicy::publish(), "presence append", || {
            self.log.append(&envelope)
        })
        .await
        {
            tracing::warn!(%err, "presence fact dropped after retries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use slate_common::Coordinates;
    use slate_store::{LeaveNotice, MemoryBus, MemoryCache, MemoryLog};

    const HEARTBEAT: Duration = Duration::from_secs(30);

    fn tracker() -> (Arc<PresenceTracker>, Arc<MemoryCache>, Arc<MemoryLog>, Arc<MemoryBus>) {
        let cache = Arc::new(MemoryCache::new());
        let log = Arc::new(MemoryLog::new());
        let bus = Arc::new(MemoryBus::new());
        let tracker = Arc::new(PresenceTracker::new(
            cache.clone(),
            log.clone(),
            bus.clone(),
            HEARTBEAT,
        ));
        (tracker, cache, log, bus)
    }

    fn join_notice(user: &str, room: &str) -> JoinNotice {
        JoinNotice {
            user_id: user.to_string(),
            room_id: room.to_string(),
            metadata: Value::Null,
        }
    }

    fn user_left_count(log: &MemoryLog, user: &str) -> usize {
        log.appended()
            .iter()
            .filter(|e| matches!(&e.event, Event::UserLeft { user_id, .. } if user_id == user))
            .count()
    }

    #[tokio::test]
    async fn join_creates_record_and_publishes_fact() {
        let (tracker, cache, log, _bus) = tracker();

        tracker
            .handle_bus_message(BusMessage::Join(join_notice("alice", "42")))
            .await;

        let record = cache.get_presence("alice").await.unwrap().unwrap();
        assert_eq!(record.room_id, "42");
        assert_eq!(cache.room_users("42").await.unwrap(), vec!["alice"]);
        let meta = cache.room_metadata("42").await.unwrap();
        assert_eq!(meta.get("activeUsers").unwrap(), "1");

        let facts = log.appended();
        assert_eq!(facts.len(), 1);
        assert!(matches!(facts[0].event, Event::UserJoined { .. }));
    }

    #[tokio::test]
    async fn leave_clears_record_and_publishes_fact() {
        let (tracker, cache, log, _bus) = tracker();
        tracker
            .handle_bus_message(BusMessage::Join(join_notice("alice", "42")))
            .await;

        tracker
            .handle_bus_message(BusMessage::Leave(LeaveNotice {
                user_id: "alice".to_string(),
                room_id: "42".to_string(),
            }))
            .await;

        assert!(cache.get_presence("alice").await.unwrap().is_none());
        assert!(cache.room_users("42").await.unwrap().is_empty());
        let meta = cache.room_metadata("42").await.unwrap();
        assert_eq!(meta.get("activeUsers").unwrap(), "0");
        assert_eq!(user_left_count(&log, "alice"), 1);
    }

    #[tokio::test]
    async fn sweep_evicts_stale_users_exactly_once() {
        let (tracker, cache, log, _bus) = tracker();

        // Last seen far beyond the 2× heartbeat threshold.
        let stale = Utc::now().timestamp_millis() - 3 * HEARTBEAT.as_millis() as i64;
        cache
            .put_presence("alice", &PresenceRecord::new("42", stale, Value::Null))
            .await
            .unwrap();
        cache.add_room_user("42", "alice").await.unwrap();
        cache.bump_active_users("42", 1).await.unwrap();

        assert_eq!(tracker.sweep().await.unwrap(), 1);
        assert!(cache.get_presence("alice").await.unwrap().is_none());
        assert_eq!(user_left_count(&log, "alice"), 1);

        // The record is gone; a second sweep publishes nothing more.
        assert_eq!(tracker.sweep().await.unwrap(), 0);
        assert_eq!(user_left_count(&log, "alice"), 1);
    }

    #[tokio::test]
    async fn sweep_keeps_active_users() {
        let (tracker, cache, _log, _bus) = tracker();

        let fresh = Utc::now().timestamp_millis();
        cache
            .put_presence("alice", &PresenceRecord::new("42", fresh, Value::Null))
            .await
            .unwrap();

        assert_eq!(tracker.sweep().await.unwrap(), 0);
        assert!(cache.get_presence("alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn activity_refresh_prevents_eviction() {
        let (tracker, cache, _log, _bus) = tracker();

        let stale = Utc::now().timestamp_millis() - 3 * HEARTBEAT.as_millis() as i64;
        cache
            .put_presence("alice", &PresenceRecord::new("42", stale, Value::Null))
            .await
            .unwrap();

        // A draw on the log counts as activity.
        let envelope = LogEnvelope {
            origin: "gw_a".to_string(),
            event: Event::Draw {
                room_id: "42".to_string(),
                user_id: "alice".to_string(),
                coordinates: Coordinates {
                    x0: 0.0,
                    y0: 0.0,
                    x1: 1.0,
                    y1: 1.0,
                },
                timestamp: 1,
            },
        };
        tracker.handle_log_record(&envelope).await;

        assert_eq!(tracker.sweep().await.unwrap(), 0);
        assert!(cache.get_presence("alice").await.unwrap().is_some());

        let meta = cache.room_metadata("42").await.unwrap();
        assert!(meta.contains_key("lastActivity"));
    }

    #[tokio::test]
    async fn presence_facts_are_ignored_as_activity() {
        let (tracker, cache, _log, _bus) = tracker();

        let envelope = LogEnvelope {
            origin: "pt_x".to_string(),
            event: Event::UserJoined {
                room_id: "42".to_string(),
                user_id: "alice".to_string(),
                timestamp: 1,
                metadata: Value::Null,
            },
        };
        tracker.handle_log_record(&envelope).await;

        // No record was conjured from the tracker's own facts.
        assert!(cache.get_presence("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn run_consumes_bus_notices() {
        let (tracker, cache, _log, bus) = tracker();

        let handle = tokio::spawn(tracker.clone().run(Duration::from_secs(3600)));
        // Give run() a moment to subscribe before publishing.
        tokio::time::sleep(Duration::from_millis(20)).await;

        bus.publish(&BusMessage::Join(join_notice("alice", "42")))
            .await
            .unwrap();

        let mut seen = false;
        for _ in 0..100 {
            if cache.get_presence("alice").await.unwrap().is_some() {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();
        assert!(seen, "join notice never processed");
    }
}
