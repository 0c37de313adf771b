use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slate_common::id::{prefix, prefixed_ulid};
use slate_gateway::config::Config;
use slate_gateway::gateway::bridge;
use slate_gateway::AppState;
use slate_store::{retry, BackoffPolicy, JetStreamLog, RedisBus, RedisCache};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    // The gateway accepts no connections until its dependencies are
    // reachable; each connect is retried with bounded backoff.
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

    let process_id = prefixed_ulid(prefix::GATEWAY);
    tracing::info!(%process_id, "slate-gateway configured");

    let state = AppState::new(
        config,
        Arc::new(cache),
        Arc::new(log),
        Arc::new(bus),
        process_id,
    );

    // Cross-process fan-out: forward remote log records into the local router.
    tokio::spawn(bridge::run(state.clone()));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(slate_gateway::gateway::server::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "slate-gateway listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
