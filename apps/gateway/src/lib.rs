pub mod config;
pub mod gateway;

use std::sync::Arc;

use config::Config;
use gateway::publisher::EventPublisher;
use gateway::rooms::RoomRouter;
use slate_common::EventStamper;
use slate_store::{EventLog, PresenceBus, RoomCache};

/// Shared application state available to every connection task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRouter>,
    pub cache: Arc<dyn RoomCache>,
    pub log: Arc<dyn EventLog>,
    pub bus: Arc<dyn PresenceBus>,
    pub publisher: Arc<EventPublisher>,
    pub stamper: Arc<EventStamper>,
    /// This gateway process's id; stamped onto every log record it appends.
    pub process_id: String,
}

impl AppState {
    pub fn new(
        config: Config,
        cache: Arc<dyn RoomCache>,
        log: Arc<dyn EventLog>,
        bus: Arc<dyn PresenceBus>,
        process_id: String,
    ) -> Self {
        let publisher = Arc::new(EventPublisher::new(cache.clone(), log.clone()));
        Self {
            config: Arc::new(config),
            rooms: Arc::new(RoomRouter::new()),
            cache,
            log,
            bus,
            publisher,
            stamper: Arc::new(EventStamper::new()),
            process_id,
        }
    }
}
