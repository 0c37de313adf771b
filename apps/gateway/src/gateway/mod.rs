pub mod bridge;
pub mod handler;
pub mod protocol;
pub mod publisher;
pub mod rooms;
pub mod server;
pub mod session;
