//! Forum Chat - real-time chat layer for a discussion forum
//!
//! This library provides the client side of the forum's chat widget: a single
//! STOMP broker connection per signed-in user, routing of inbound messages,
//! an ordered per-conversation message store reconciled with the REST message
//! history, and the session facade the rendering layer talks to.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod protocol;
pub mod router;
pub mod session;
pub mod storage;
pub mod transport;
pub mod tui;

use std::time::Duration;

pub use connection::{ConnectionManager, ConnectionState};
pub use session::{ChatSession, ChatStatus, SessionEvent};
pub use storage::{ChatConfig, Contact, Message, MessageStore, User, UserId};

/// Result type alias for Forum Chat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Forum Chat operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Broker handshake or transport failure
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Message history could not be fetched
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Inbound broker payload is not a valid chat message
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// STOMP frame could not be encoded or decoded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid or unreadable configuration
    #[error("Config error: {0}")]
    Config(String),

    /// An operation needed a conversation but no contact is selected
    #[error("No active contact selected")]
    NoActiveContact,

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

/// Reasons a broker connection could not be established or used
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The user has no bearer token, chat stays disabled
    #[error("no authentication token available")]
    MissingToken,

    /// The broker answered the handshake with an ERROR frame
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// No CONNECTED frame arrived in time
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// Socket-level failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// No live link to send on
    #[error("not connected")]
    NotConnected,

    /// The caller cancelled the attempt
    #[error("connection attempt cancelled")]
    Cancelled,

    /// Every retry failed
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error of the final attempt
        last: String,
    },
}

/// Reasons the REST message history could not be loaded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The conversation or contact does not exist (HTTP 404)
    #[error("conversation not found")]
    NotFound,

    /// Token missing, expired or refused (HTTP 401/403)
    #[error("not authorized to read history")]
    Unauthorized,

    /// Any other non-success HTTP status
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The request exceeded the fetch timeout
    #[error("history request timed out")]
    Timeout,

    /// Request could not be sent
    #[error("request failed: {0}")]
    Request(String),

    /// Response body is not a message list
    #[error("invalid history payload: {0}")]
    Decode(String),

    /// A newer hydration superseded this one
    #[error("history request cancelled")]
    Cancelled,
}

/// Initialize the Forum Chat library with logging
pub fn init() {
    tracing_subscriber::fmt::init();
}

#[cfg(test)]
mod tests;
