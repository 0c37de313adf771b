use std::sync::Mutex;

use chrono::Utc;

/// Per-process source of event timestamps.
///
/// Timestamps are wall-clock milliseconds, forced strictly increasing within
/// the process: if the clock stalls or steps backwards, the stamper hands out
/// `last + 1` instead. Within a room, the order assigned by the publishing
/// gateway is the order every consumer observes.
pub struct EventStamper {
    last_ms: Mutex<i64>,
}

impl EventStamper {
    pub fn new() -> Self {
        Self {
            last_ms: Mutex::new(0),
        }
    }

    /// Hand out the next timestamp (ms since Unix epoch, strictly increasing).
    pub fn assign(&self) -> i64 {
        let mut last = self.last_ms.lock().unwrap();
        let now = Utc::now().timestamp_millis();
        let stamped = if now > *last { now } else { *last + 1 };
        *last = stamped;
        stamped
    }
}

impl Default for EventStamper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_are_strictly_increasing() {
        let stamper = EventStamper::new();
        let mut prev = 0i64;
        for _ in 0..10_000 {
            let ts = stamper.assign();
            assert!(ts > prev, "not monotonic: {prev} >= {ts}");
            prev = ts;
        }
    }

    #[test]
    fn stamps_track_wall_clock() {
        let stamper = EventStamper::new();
        let before = Utc::now().timestamp_millis();
        let ts = stamper.assign();
        let after = Utc::now().timestamp_millis();
        assert!(ts >= before && ts <= after + 1);
    }

    #[test]
    fn stamps_are_unique_across_threads() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let stamper = Arc::new(EventStamper::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let stamper = stamper.clone();
            handles.push(std::thread::spawn(move || {
                (0..1_000).map(|_| stamper.assign()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for ts in handle.join().unwrap() {
                assert!(seen.insert(ts), "duplicate stamp: {ts}");
            }
        }
    }
}
