pub mod event;
pub mod id;
pub mod presence;
pub mod stamp;

pub use event::{Coordinates, Event, LogEnvelope};
pub use presence::PresenceRecord;
pub use stamp::EventStamper;
