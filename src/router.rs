//! Subscription router
//!
//! Binds the broker connection to the signed-in user's inbound destination
//! and turns MESSAGE frames for that binding into chat messages. Filtering
//! by conversation happens in the message store, not here.

use crate::connection::ConnectionManager;
use crate::protocol::{Command, Frame};
use crate::storage::settings::USER_ID_PLACEHOLDER;
use crate::storage::{Message, UserId};
use crate::{ConnectionError, Error, Result};
use tracing::{debug, info};

/// The live binding of a user to their inbound destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSubscription {
    /// STOMP subscription id
    pub id: String,
    /// Subscribed user
    pub user_id: UserId,
    /// Broker destination
    pub destination: String,
}

/// Per-user subscription on the shared connection
pub struct SubscriptionRouter {
    connection: ConnectionManager,
    destination_template: String,
    active: Option<ActiveSubscription>,
    next_id: u64,
}

impl SubscriptionRouter {
    /// Create a router; `destination_template` contains `{user_id}`
    pub fn new(connection: ConnectionManager, destination_template: impl Into<String>) -> Self {
        Self {
            connection,
            destination_template: destination_template.into(),
            active: None,
            next_id: 0,
        }
    }

    /// Inbound destination of a user
    pub fn destination_for(&self, user_id: UserId) -> String {
        self.destination_template
            .replace(USER_ID_PLACEHOLDER, &user_id.to_string())
    }

    /// Current binding
    pub fn active(&self) -> Option<&ActiveSubscription> {
        self.active.as_ref()
    }

    /// Subscribe to `user_id`'s inbound destination
    ///
    /// Returns `Ok(false)` when that user is already subscribed. A binding for
    /// a different user is released first.
    pub fn subscribe(&mut self, user_id: UserId) -> Result<bool> {
        if !self.connection.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }

        if let Some(active) = &self.active {
            if active.user_id == user_id {
                debug!("User {} already subscribed as {}", user_id, active.id);
                return Ok(false);
            }
            self.unsubscribe();
        }

        self.next_id += 1;
        let id = format!("sub-{}", self.next_id);
        let destination = self.destination_for(user_id);
        self.connection
            .send_frame(Frame::subscribe(&id, &destination))?;

        info!("Subscribed to {} as {}", destination, id);
        self.active = Some(ActiveSubscription {
            id,
            user_id,
            destination,
        });
        Ok(true)
    }

    /// Release the binding; returns whether there was one
    pub fn unsubscribe(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };

        match self.connection.send_frame(Frame::unsubscribe(&active.id)) {
            Ok(()) => info!("Unsubscribed {} from {}", active.id, active.destination),
            Err(e) => debug!("UNSUBSCRIBE for {} not sent: {}", active.id, e),
        }
        true
    }

    /// Replay the binding on a fresh link after a reconnect
    pub fn resubscribe(&mut self) -> Result<bool> {
        let Some(active) = &self.active else {
            return Ok(false);
        };
        self.connection
            .send_frame(Frame::subscribe(&active.id, &active.destination))?;
        info!("Resubscribed {} to {}", active.id, active.destination);
        Ok(true)
    }

    /// Decode a frame delivered for the active binding
    ///
    /// `None` for frames that are not MESSAGE frames of the active
    /// subscription; `Some(Err(MalformedMessage))` when the body is not a
    /// chat message.
    pub fn route(&self, frame: &Frame) -> Option<Result<Message>> {
        if frame.command != Command::Message {
            return None;
        }
        let active = self.active.as_ref()?;
        if frame.get_header("subscription") != Some(active.id.as_str()) {
            debug!(
                "Ignoring MESSAGE for subscription {:?}",
                frame.get_header("subscription")
            );
            return None;
        }

        Some(
            serde_json::from_str::<Message>(&frame.body)
                .map_err(|e| Error::MalformedMessage(e.to_string())),
        )
    }
}
