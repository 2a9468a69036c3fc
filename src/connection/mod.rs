//! Broker connection module
//!
//! One authenticated STOMP connection per chat session. The manager owns the
//! link: it performs the handshake with bounded retry, forwards MESSAGE frames
//! to the session, reconnects after transport drops and tears everything down
//! on `disconnect`.

pub mod manager;
pub mod types;

pub use manager::ConnectionManager;
pub use types::{backoff_delay, ConnectionConfig, ConnectionState};
