//! Ordered message log of the active conversation

use crate::storage::history::HistorySource;
use crate::storage::message::{Contact, Conversation, Message, MessageView, User, UserId};
use crate::{FetchError, Result};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Proof that a hydration was started for a conversation
///
/// Only the ticket of the most recent `begin_hydration` can commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationTicket {
    conversation: Conversation,
    epoch: u64,
}

impl HydrationTicket {
    /// Conversation being hydrated
    pub fn conversation(&self) -> Conversation {
        self.conversation
    }
}

/// Outcome of offering an inbound message to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Appended to the log
    Appended,
    /// Already in the log (our own message echoed back)
    Duplicate,
    /// Belongs to another conversation, or none is active
    OutsideConversation,
}

impl Acceptance {
    /// Whether the store changed
    pub fn is_appended(&self) -> bool {
        matches!(self, Self::Appended)
    }
}

/// Append-only message log for one conversation
///
/// Messages are kept in insertion order and never re-sorted. Switching
/// conversation replaces the whole log.
#[derive(Debug, Default)]
pub struct MessageStore {
    conversation: Option<Conversation>,
    messages: Vec<Message>,
    seen: HashSet<Uuid>,
    epoch: u64,
}

impl MessageStore {
    /// Create an empty store with no conversation
    pub fn new() -> Self {
        Self::default()
    }

    /// Active conversation, if any
    pub fn conversation(&self) -> Option<Conversation> {
        self.conversation
    }

    /// Drop everything and switch to `conversation`
    ///
    /// Invalidates outstanding hydration tickets.
    pub fn reset(&mut self, conversation: Option<Conversation>) {
        self.conversation = conversation;
        self.messages.clear();
        self.seen.clear();
        self.epoch += 1;
    }

    /// Reset to `conversation` and hand out the ticket for its history
    pub fn begin_hydration(&mut self, conversation: Conversation) -> HydrationTicket {
        self.reset(Some(conversation));
        HydrationTicket {
            conversation,
            epoch: self.epoch,
        }
    }

    /// Whether `ticket` may still commit
    pub fn is_current(&self, ticket: &HydrationTicket) -> bool {
        ticket.epoch == self.epoch && self.conversation == Some(ticket.conversation)
    }

    /// Replace the log with fetched history if `ticket` is still current
    ///
    /// Messages carrying a client ID that were appended while the fetch was
    /// in flight stay at the tail unless the history already holds them.
    pub fn commit_hydration(&mut self, ticket: &HydrationTicket, history: Vec<Message>) -> bool {
        if !self.is_current(ticket) {
            debug!(
                "Discarding stale history for {:?} ({} messages)",
                ticket.conversation,
                history.len()
            );
            return false;
        }

        let local = std::mem::take(&mut self.messages);
        self.seen.clear();
        for message in history {
            self.append(message);
        }
        for message in local.into_iter().filter(|m| m.id.is_some()) {
            self.append(message);
        }
        debug!("Hydrated {:?} with {} messages", ticket.conversation, self.messages.len());
        true
    }

    /// Fetch and install the history between `user` and `contact`
    ///
    /// Returns `Ok(false)` when a newer hydration replaced this one before
    /// the fetch resolved.
    pub async fn hydrate(
        &mut self,
        source: &dyn HistorySource,
        user: &User,
        contact: &Contact,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let ticket = self.begin_hydration(Conversation::between(user, contact));
        let history = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled.into()),
            history = source.fetch_history(user, contact.id) => history?,
        };
        Ok(self.commit_hydration(&ticket, history))
    }

    /// Add a message at the tail
    ///
    /// Messages carrying an already stored client ID are skipped.
    pub fn append(&mut self, message: Message) -> bool {
        if let Some(id) = message.id {
            if !self.seen.insert(id) {
                debug!("Skipping duplicate message {}", id);
                return false;
            }
        }
        self.messages.push(message);
        true
    }

    /// Append an inbound message if it belongs to the active conversation
    pub fn accept(&mut self, message: Message) -> Acceptance {
        let belongs = self
            .conversation
            .is_some_and(|c| c.involves(message.sender_id, message.recipient_id));
        if !belongs {
            debug!(
                "Dropping message {} -> {} outside the active conversation",
                message.sender_id, message.recipient_id
            );
            return Acceptance::OutsideConversation;
        }

        if self.append(message) {
            Acceptance::Appended
        } else {
            Acceptance::Duplicate
        }
    }

    /// Messages in insertion order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Render-ready projection for the signed-in user
    pub fn views(&self, current_user_id: UserId) -> Vec<MessageView> {
        self.messages
            .iter()
            .map(|message| MessageView::from_message(message, current_user_id))
            .collect()
    }
}
