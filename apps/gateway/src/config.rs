use std::time::Duration;

/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the WebSocket server binds to.
    pub port: u16,
    /// Redis connection string (Fast Room Cache and pub/sub channel).
    pub redis_url: String,
    /// NATS connection string (Durable Event Log).
    pub nats_url: String,
    /// Interval between server-initiated liveness probes.
    pub heartbeat_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables; every value has a
    /// local-development default.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
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
        }
    }
}
