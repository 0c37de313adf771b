use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slate_presence::config::Config;
use slate_presence::tracker::PresenceTracker;
use slate_store::{retry, BackoffPolicy, JetStreamLog, RedisBus, RedisCache};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let policy = BackoffPolicy::startup();
    let cache = retry(&policy, "redis connect", || {
        RedisCache::connect(&config.redis_url)
    })
    .await
    .expect("redis unreachable");
    let log = retry(&policy, "nats connect", || {
        JetStreamLog::connect(&config.nats_url)
    })
    .await
    .expect("nats unreachable");
    let bus = retry(&policy, "redis pub/sub connect", || {
        RedisBus::connect(&config.redis_url)
    })
    .await
    .expect("redis pub/sub unreachable");

    let tracker = Arc::new(PresenceTracker::new(
        Arc::new(cache),
        Arc::new(log),
        Arc::new(bus),
        config.heartbeat_interval,
    ));

    tracing::info!(
        heartbeat = ?config.heartbeat_interval,
        sweep = ?config.sweep_interval,
        "slate-presence started"
    );

    tokio::select! {
        _ = tracker.run(config.sweep_interval) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
}
