use std::time::Duration;

/// Presence tracker configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection string (Fast Room Cache and pub/sub channel).
    pub redis_url: String,
    /// NATS connection string (Durable Event Log).
    pub nats_url: String,
    /// The gateway's liveness probe interval; users are evicted after twice
    /// this long without activity.
    pub heartbeat_interval: Duration,
    /// How often the inactivity sweep runs.
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379/0".to_string()),
            nats_url: std::env::var("NATS_URL")
                .unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            heartbeat_interval: Duration::from_secs(
                std::env::var("HEARTBEAT_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            sweep_interval: Duration::from_secs(
                std::env::var("SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}
