//! Chat storage module
//!
//! This module holds the chat's data and its sources:
//! - `message` - users, contacts, messages and conversations
//! - `store` - the ordered message log of the active conversation
//! - `history` - conversation history from the forum REST API
//! - `settings` - chat configuration

pub mod history;
pub mod message;
pub mod settings;
pub mod store;

pub use history::{HistorySource, RestHistory};
pub use message::{Contact, Conversation, Message, MessageView, User, UserId};
pub use settings::ChatConfig;
pub use store::{Acceptance, HydrationTicket, MessageStore};
