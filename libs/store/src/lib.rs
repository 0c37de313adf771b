//! Infrastructure boundary shared by the gateway and the presence tracker:
//! the Fast Room Cache, the Durable Event Log, and the Pub/Sub Channel, each
//! as a trait with a production client and an in-memory twin for tests.

pub mod bus;
pub mod cache;
pub mod error;
pub mod log;
pub mod retry;

pub use bus::{BusMessage, JoinNotice, LeaveNotice, MemoryBus, PresenceBus, RedisBus, SessionNotice};
pub use cache::{MemoryCache, RedisCache, RoomCache};
pub use error::StoreError;
pub use log::{EventLog, JetStreamLog, MemoryLog};
pub use retry::{retry, BackoffPolicy, RetryExhausted};
