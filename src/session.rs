//! Chat session module
//!
//! `ChatSession` is the only surface the rendering layer touches. It combines
//! the connection manager, subscription router, message store and history
//! source for one signed-in user:
//! - `start` connects and subscribes
//! - `select_contact` switches conversation and loads its history
//! - `send` publishes and optimistically appends
//! - `next_event` applies the next inbound message, history result or
//!   connection change
//!
//! # Example
//! ```rust,no_run
//! use forum_chat::{ChatConfig, ChatSession, Contact, User};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> forum_chat::Result<()> {
//! let config = ChatConfig::default();
//! let user = User::new(1, "alice", "token-from-login");
//! let mut session = ChatSession::from_config(&config, user)?;
//!
//! session.start(&CancellationToken::new()).await?;
//! session.select_contact(Some(Contact::new(2, "bob")));
//! session.send("hello")?;
//!
//! while let Some(event) = session.next_event().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

use crate::connection::{ConnectionManager, ConnectionState};
use crate::protocol::Frame;
use crate::router::SubscriptionRouter;
use crate::storage::{
    Acceptance, ChatConfig, Contact, Conversation, HistorySource, HydrationTicket, Message,
    MessageStore, MessageView, RestHistory, User, UserId,
};
use crate::transport::WebSocketConnector;
use crate::{ConnectionError, Error, FetchError, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the new-message notification channel
const NOTIFICATION_CAPACITY: usize = 256;

/// Chat availability as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatStatus {
    /// Not started or closed
    Offline,
    /// Handshake or reconnect in progress
    Connecting,
    /// Messages can be sent and received
    Ready,
    /// Chat is disabled; the reason is shown instead of the input
    Unavailable(String),
}

impl ChatStatus {
    /// Whether sending is possible
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Status bar text
    pub fn label(&self) -> String {
        match self {
            Self::Offline => "offline".to_string(),
            Self::Connecting => "connecting...".to_string(),
            Self::Ready => "online".to_string(),
            Self::Unavailable(reason) => format!("chat unavailable: {}", reason),
        }
    }
}

/// Something `next_event` applied to the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// An inbound message was appended to the active conversation
    MessageReceived(Message),
    /// An inbound message for another conversation was dropped
    MessageDropped {
        /// Sender of the dropped message
        sender_id: UserId,
        /// Recipient of the dropped message
        recipient_id: UserId,
    },
    /// An inbound payload was not a chat message
    MalformedMessage(String),
    /// History of the active contact replaced the store
    HistoryLoaded {
        /// Contact whose history loaded
        contact_id: UserId,
        /// Number of messages loaded
        count: usize,
    },
    /// History of the active contact could not be loaded
    HistoryFailed {
        /// Contact whose history failed
        contact_id: UserId,
        /// Failure reason
        error: FetchError,
    },
    /// Chat availability changed
    StatusChanged(ChatStatus),
}

type HydrationResult = (HydrationTicket, Result<Vec<Message>>);

struct PendingHydration {
    ticket: HydrationTicket,
    cancel: CancellationToken,
}

/// Chat session of one signed-in user
pub struct ChatSession {
    user: User,
    active_contact: Option<Contact>,
    connection: ConnectionManager,
    deliveries: mpsc::UnboundedReceiver<Frame>,
    state_rx: watch::Receiver<ConnectionState>,
    router: SubscriptionRouter,
    store: MessageStore,
    history: Arc<dyn HistorySource>,
    publish_destination: String,
    pending: Option<PendingHydration>,
    hydration_tx: mpsc::UnboundedSender<HydrationResult>,
    hydration_rx: mpsc::UnboundedReceiver<HydrationResult>,
    notifications: broadcast::Sender<Message>,
    status: ChatStatus,
    closed: bool,
}

impl ChatSession {
    /// Assemble a session from its collaborators
    ///
    /// `deliveries` is the receiver returned by `ConnectionManager::new`.
    pub fn new(
        user: User,
        connection: ConnectionManager,
        deliveries: mpsc::UnboundedReceiver<Frame>,
        history: Arc<dyn HistorySource>,
        config: &ChatConfig,
    ) -> Self {
        let state_rx = connection.watch_state();
        let router = SubscriptionRouter::new(connection.clone(), config.inbound_destination.clone());
        let (hydration_tx, hydration_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Self {
            user,
            active_contact: None,
            connection,
            deliveries,
            state_rx,
            router,
            store: MessageStore::new(),
            history,
            publish_destination: config.publish_destination.clone(),
            pending: None,
            hydration_tx,
            hydration_rx,
            notifications,
            status: ChatStatus::Offline,
            closed: false,
        }
    }

    /// Session over WebSocket and the REST API described by `config`
    pub fn from_config(config: &ChatConfig, user: User) -> Result<Self> {
        config.validate()?;
        let connector = Arc::new(WebSocketConnector::new(config.broker_url.clone()));
        let (connection, deliveries) =
            ConnectionManager::new(connector, config.connection_config());
        let history = Arc::new(RestHistory::new(
            config.api_base_url.clone(),
            config.fetch_timeout(),
        )?);
        Ok(Self::new(user, connection, deliveries, history, config))
    }

    /// Signed-in user
    pub fn user(&self) -> &User {
        &self.user
    }

    /// Selected counterpart
    pub fn active_contact(&self) -> Option<&Contact> {
        self.active_contact.as_ref()
    }

    /// Chat availability
    pub fn status(&self) -> &ChatStatus {
        &self.status
    }

    /// Broker connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Messages of the active conversation in order
    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    /// Render-ready messages of the active conversation
    pub fn views(&self) -> Vec<MessageView> {
        self.store.views(self.user.id)
    }

    /// Whether a history request for the active contact is outstanding
    pub fn is_loading_history(&self) -> bool {
        self.pending.is_some()
    }

    /// Stream of messages appended to the active conversation
    pub fn notifications(&self) -> broadcast::Receiver<Message> {
        self.notifications.subscribe()
    }

    /// Connect to the broker and subscribe to the user's inbound messages
    ///
    /// Failures leave the session `Unavailable` and are returned for
    /// logging; they are never fatal.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.user.bearer_token().is_none() {
            warn!("Chat disabled: {} is not signed in", self.user.username);
            self.status = ChatStatus::Unavailable("sign in to chat".to_string());
            return Err(ConnectionError::MissingToken.into());
        }

        self.closed = false;
        self.status = ChatStatus::Connecting;
        let was_connected = self.connection.is_connected();
        let connected = self.connection.connect(&self.user, cancel).await;
        let _ = self.state_rx.borrow_and_update();

        let result = connected.and_then(|()| {
            if was_connected {
                self.router.subscribe(self.user.id).map(|_| ())
            } else {
                // A binding left over from a lost link must be replayed
                self.bind_inbound()
            }
        });
        match &result {
            Ok(()) => {
                info!("Chat ready for {}", self.user.username);
                self.status = ChatStatus::Ready;
            }
            Err(e) => {
                error!("Chat unavailable: {}", e);
                self.status = ChatStatus::Unavailable(e.to_string());
            }
        }
        result
    }

    /// Switch the active conversation
    ///
    /// Any history request still in flight is cancelled; the store is reset
    /// immediately and the new history is fetched in the background.
    pub fn select_contact(&mut self, contact: Option<Contact>) {
        if let Some(pending) = self.pending.take() {
            debug!(
                "Cancelling history request for {:?}",
                pending.ticket.conversation()
            );
            pending.cancel.cancel();
        }

        self.active_contact = contact.clone();
        let Some(contact) = contact else {
            self.store.reset(None);
            return;
        };

        info!("Opening chat with {}", contact.username);
        let ticket = self
            .store
            .begin_hydration(Conversation::between(&self.user, &contact));
        let cancel = CancellationToken::new();

        let history = self.history.clone();
        let user = self.user.clone();
        let results = self.hydration_tx.clone();
        let task_ticket = ticket.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = task_cancel.cancelled() => return,
                result = history.fetch_history(&user, contact.id) => result,
            };
            let _ = results.send((task_ticket, result));
        });

        self.pending = Some(PendingHydration { ticket, cancel });
    }

    /// Send `content` to the active contact
    ///
    /// Blank content is ignored (`Ok(None)`). The message is published
    /// without waiting for acknowledgment and appended locally once the
    /// publish is handed to the link.
    pub fn send(&mut self, content: &str) -> Result<Option<Message>> {
        if content.trim().is_empty() {
            return Ok(None);
        }
        let contact = self.active_contact.as_ref().ok_or(Error::NoActiveContact)?;
        if self.user.bearer_token().is_none() {
            return Err(ConnectionError::MissingToken.into());
        }

        let message = Message::outgoing(&self.user, contact, content);
        let body = serde_json::to_string(&message)?;
        self.connection.publish(&self.publish_destination, body)?;
        debug!("Sent message to {}", contact.username);

        self.append(message.clone());
        Ok(Some(message))
    }

    /// Wait for and apply the next inbound frame, history result or
    /// connection change
    ///
    /// Returns `None` after `close` until the session is started again.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if self.closed {
            return None;
        }
        loop {
            tokio::select! {
                frame = self.deliveries.recv() => {
                    let frame = frame?;
                    if let Some(event) = self.handle_frame(frame) {
                        return Some(event);
                    }
                }
                Some((ticket, result)) = self.hydration_rx.recv() => {
                    if let Some(event) = self.handle_history(ticket, result) {
                        return Some(event);
                    }
                }
                changed = self.state_rx.changed() => {
                    changed.ok()?;
                    let state = *self.state_rx.borrow_and_update();
                    if let Some(event) = self.handle_state(state) {
                        return Some(event);
                    }
                }
            }
        }
    }

    /// Release the subscription and the connection
    ///
    /// Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
        }
        self.router.unsubscribe();
        self.connection.disconnect();
        let _ = self.state_rx.borrow_and_update();
        self.status = ChatStatus::Offline;
        self.closed = true;
    }

    fn append(&mut self, message: Message) -> bool {
        let appended = self.store.append(message.clone());
        if appended {
            let _ = self.notifications.send(message);
        }
        appended
    }

    fn bind_inbound(&mut self) -> Result<()> {
        match self.router.resubscribe() {
            Ok(true) => Ok(()),
            Ok(false) => self.router.subscribe(self.user.id).map(|_| ()),
            Err(e) => Err(e),
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Option<SessionEvent> {
        match self.router.route(&frame)? {
            Ok(message) => {
                let sender_id = message.sender_id;
                let recipient_id = message.recipient_id;
                match self.store.accept(message.clone()) {
                    Acceptance::Appended => {
                        let _ = self.notifications.send(message.clone());
                        Some(SessionEvent::MessageReceived(message))
                    }
                    Acceptance::Duplicate => None,
                    Acceptance::OutsideConversation => Some(SessionEvent::MessageDropped {
                        sender_id,
                        recipient_id,
                    }),
                }
            }
            Err(e) => {
                warn!("Dropping inbound payload: {}", e);
                Some(SessionEvent::MalformedMessage(e.to_string()))
            }
        }
    }

    fn handle_history(
        &mut self,
        ticket: HydrationTicket,
        result: Result<Vec<Message>>,
    ) -> Option<SessionEvent> {
        if !self.store.is_current(&ticket) {
            debug!("Ignoring stale history for {:?}", ticket.conversation());
            return None;
        }
        if self.pending.as_ref().is_some_and(|p| p.ticket == ticket) {
            self.pending = None;
        }

        let contact_id = ticket.conversation().contact_id;
        match result {
            Ok(history) => {
                let count = history.len();
                self.store.commit_hydration(&ticket, history);
                Some(SessionEvent::HistoryLoaded { contact_id, count })
            }
            Err(e) => {
                warn!("Could not load history for contact {}: {}", contact_id, e);
                let error = match e {
                    Error::Fetch(fetch) => fetch,
                    other => FetchError::Request(other.to_string()),
                };
                Some(SessionEvent::HistoryFailed { contact_id, error })
            }
        }
    }

    fn handle_state(&mut self, state: ConnectionState) -> Option<SessionEvent> {
        let status = match state {
            ConnectionState::Connected => {
                match self.bind_inbound() {
                    Ok(()) => ChatStatus::Ready,
                    Err(e) => {
                        error!("Could not restore subscription: {}", e);
                        ChatStatus::Unavailable(e.to_string())
                    }
                }
            }
            ConnectionState::Connecting => ChatStatus::Connecting,
            ConnectionState::Disconnected => ChatStatus::Offline,
            ConnectionState::Failed => {
                ChatStatus::Unavailable("lost connection to the chat server".to_string())
            }
        };

        if status == self.status {
            return None;
        }
        info!("Chat status: {}", status.label());
        self.status = status.clone();
        Some(SessionEvent::StatusChanged(status))
    }
}
