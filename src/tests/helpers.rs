//! Shared test helpers: an in-memory broker, a scripted history source and
//! sample data

use crate::connection::{ConnectionConfig, ConnectionManager};
use crate::protocol::{Command, Frame};
use crate::session::{ChatSession, SessionEvent};
use crate::storage::{ChatConfig, Contact, HistorySource, Message, User, UserId};
use crate::transport::{BrokerLink, BrokerSide, Connector};
use crate::{ConnectionError, FetchError, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// How the mock broker answers a CONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBehavior {
    /// Reply CONNECTED
    Accept,
    /// Reply ERROR
    Reject,
    /// Never reply
    Silent,
    /// Refuse to open links at all
    Unreachable,
}

/// Broker side of one link: its outbound sender and its SUBSCRIBE id
struct ClientLink {
    sender: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    subscription: Mutex<Option<String>>,
}

impl ClientLink {
    fn send(&self, frame: Frame) -> Option<bool> {
        let sender = self.sender.lock().unwrap();
        sender.as_ref().map(|client| client.send(frame).is_ok())
    }

    fn is_live(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }
}

/// In-memory STOMP broker implementing `Connector`
#[derive(Clone)]
pub struct MockBroker {
    inner: Arc<BrokerState>,
}

struct BrokerState {
    behavior: Mutex<BrokerBehavior>,
    refuse_next: AtomicUsize,
    opens: AtomicUsize,
    received: Mutex<Vec<Frame>>,
    clients: Mutex<Vec<Arc<ClientLink>>>,
}

impl MockBroker {
    pub fn new(behavior: BrokerBehavior) -> Self {
        Self {
            inner: Arc::new(BrokerState {
                behavior: Mutex::new(behavior),
                refuse_next: AtomicUsize::new(0),
                opens: AtomicUsize::new(0),
                received: Mutex::new(Vec::new()),
                clients: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn accepting() -> Self {
        Self::new(BrokerBehavior::Accept)
    }

    pub fn set_behavior(&self, behavior: BrokerBehavior) {
        *self.inner.behavior.lock().unwrap() = behavior;
    }

    /// Refuse the next `count` opens before applying the behavior
    pub fn refuse_next(&self, count: usize) {
        self.inner.refuse_next.store(count, Ordering::SeqCst);
    }

    /// Number of links opened (or attempted)
    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// Every frame received from clients, in order
    pub fn frames(&self) -> Vec<Frame> {
        self.inner.received.lock().unwrap().clone()
    }

    /// Received frames with the given command
    pub fn sent(&self, command: Command) -> Vec<Frame> {
        self.frames()
            .into_iter()
            .filter(|frame| frame.command == command)
            .collect()
    }

    /// Newest live link that sent a SUBSCRIBE, with its subscription id
    fn subscribed_link(&self) -> Option<(Arc<ClientLink>, String)> {
        let clients = self.inner.clients.lock().unwrap();
        let link = clients.iter().rev().find(|link| link.is_live())?;
        let subscription = link.subscription.lock().unwrap().clone()?;
        Some((link.clone(), subscription))
    }

    /// Subscription id of the newest live link, if it subscribed
    pub fn subscription(&self) -> Option<String> {
        self.subscribed_link().map(|(_, id)| id)
    }

    /// Push a raw frame to the newest live link
    pub fn deliver(&self, frame: Frame) -> bool {
        let clients = self.inner.clients.lock().unwrap();
        clients
            .iter()
            .rev()
            .find_map(|link| link.send(frame.clone()))
            .unwrap_or(false)
    }

    /// Deliver a chat message to the subscriber of the newest live link
    pub fn deliver_message(&self, message: &Message) -> bool {
        let body = serde_json::to_string(message).unwrap();
        self.deliver_body(&body)
    }

    /// Deliver a raw MESSAGE body to the subscriber of the newest live link
    ///
    /// Returns `false` when that link never subscribed.
    pub fn deliver_body(&self, body: &str) -> bool {
        let Some((link, subscription)) = self.subscribed_link() else {
            return false;
        };
        let frame = Frame::new(Command::Message)
            .header("subscription", subscription)
            .header("destination", "/user/queue/messages")
            .header("message-id", Uuid::new_v4().to_string())
            .with_body(body);
        link.send(frame).unwrap_or(false)
    }

    /// Close every live link from the broker side
    pub fn drop_connections(&self) {
        for link in self.inner.clients.lock().unwrap().iter() {
            link.sender.lock().unwrap().take();
        }
    }
}

#[async_trait]
impl Connector for MockBroker {
    async fn open(&self) -> Result<BrokerLink> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .inner
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let behavior = *self.inner.behavior.lock().unwrap();
        if refused || behavior == BrokerBehavior::Unreachable {
            return Err(ConnectionError::Transport("connection refused".to_string()).into());
        }

        let (link, side) = BrokerLink::pair();
        let BrokerSide {
            mut from_client,
            to_client,
        } = side;
        let client = Arc::new(ClientLink {
            sender: Mutex::new(Some(to_client)),
            subscription: Mutex::new(None),
        });
        self.inner.clients.lock().unwrap().push(client.clone());

        let state = self.inner.clone();
        tokio::spawn(async move {
            while let Some(frame) = from_client.recv().await {
                if frame.command == Command::Subscribe {
                    *client.subscription.lock().unwrap() =
                        frame.get_header("id").map(str::to_string);
                }
                state.received.lock().unwrap().push(frame.clone());
                let reply = match frame.command {
                    Command::Connect => match *state.behavior.lock().unwrap() {
                        BrokerBehavior::Accept => {
                            Some(Frame::new(Command::Connected).header("version", "1.2"))
                        }
                        BrokerBehavior::Reject => Some(
                            Frame::new(Command::Error)
                                .header("message", "invalid token")
                                .with_body("Bearer token rejected"),
                        ),
                        BrokerBehavior::Silent | BrokerBehavior::Unreachable => None,
                    },
                    _ => None,
                };
                if let Some(reply) = reply {
                    client.send(reply);
                }
            }
        });

        Ok(link)
    }

    fn host(&self) -> String {
        "mock-broker".to_string()
    }
}

/// History source answering from a per-contact script
#[derive(Default)]
pub struct MockHistory {
    responses: Mutex<HashMap<UserId, (Duration, std::result::Result<Vec<Message>, FetchError>)>>,
    calls: AtomicUsize,
}

impl MockHistory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, contact_id: UserId, messages: Vec<Message>) {
        self.respond_after(contact_id, Duration::ZERO, messages);
    }

    pub fn respond_after(&self, contact_id: UserId, delay: Duration, messages: Vec<Message>) {
        self.responses
            .lock()
            .unwrap()
            .insert(contact_id, (delay, Ok(messages)));
    }

    pub fn fail(&self, contact_id: UserId, error: FetchError) {
        self.responses
            .lock()
            .unwrap()
            .insert(contact_id, (Duration::ZERO, Err(error)));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistorySource for MockHistory {
    async fn fetch_history(&self, _user: &User, contact_id: UserId) -> Result<Vec<Message>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.responses.lock().unwrap().get(&contact_id).cloned();
        let Some((delay, result)) = scripted else {
            return Ok(Vec::new());
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result.map_err(Into::into)
    }
}

/// Connection settings small enough for tests
pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        handshake_timeout: Duration::from_millis(200),
        max_attempts: 3,
        retry_base_delay: Duration::from_millis(10),
        heartbeat: Duration::ZERO,
    }
}

pub fn manager_for(broker: &MockBroker) -> (ConnectionManager, mpsc::UnboundedReceiver<Frame>) {
    manager_with(broker, fast_config())
}

pub fn manager_with(
    broker: &MockBroker,
    config: ConnectionConfig,
) -> (ConnectionManager, mpsc::UnboundedReceiver<Frame>) {
    ConnectionManager::new(Arc::new(broker.clone()), config)
}

/// Unstarted session for `user` over the mock broker and history
pub fn session_for(broker: &MockBroker, history: Arc<MockHistory>, user: User) -> ChatSession {
    let (connection, deliveries) = manager_for(broker);
    ChatSession::new(user, connection, deliveries, history, &ChatConfig::default())
}

pub fn alice() -> User {
    User::new(1, "alice", "alice-token")
}

pub fn bob() -> Contact {
    Contact::new(2, "bob")
}

pub fn carol() -> Contact {
    Contact::new(3, "carol")
}

/// Server-side message without a client ID
pub fn message(sender_id: UserId, recipient_id: UserId, content: &str) -> Message {
    Message {
        id: None,
        sender_id,
        recipient_id,
        sender_name: format!("user{}", sender_id),
        recipient_name: format!("user{}", recipient_id),
        content: content.to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Apply session events until none arrives for `idle`
pub async fn drain_events(session: &mut ChatSession, idle: Duration) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(idle, session.next_event()).await {
        events.push(event);
    }
    events
}

/// Next session event, failing the test after two seconds
pub async fn next_event(session: &mut ChatSession) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), session.next_event())
        .await
        .expect("timed out waiting for a session event")
        .expect("session ended")
}
