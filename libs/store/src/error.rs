use thiserror::Error;

/// Errors surfaced by the cache, log, and pub/sub clients.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("nats error: {0}")]
    Nats(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}
