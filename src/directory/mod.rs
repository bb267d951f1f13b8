//! Rendezvous directory: registration, connection status, discovery, clock
//! sync and stats replica placement

pub mod clock_sync;
pub mod connection;
pub mod routes;
pub mod service;

pub use connection::{ConnectionEvent, ConnectionStatus};
pub use routes::build_router;
pub use service::Directory;
