//! Connection manager: handshake, retry, reconnect, teardown

use super::types::{backoff_delay, ConnectionConfig, ConnectionState};
use crate::protocol::{Command, Frame};
use crate::storage::User;
use crate::transport::{BrokerLink, Connector};
use crate::{ConnectionError, Error, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Owner of the single broker connection of a chat session
///
/// Cheap to clone; clones share the same link. Only the manager opens or
/// closes the link; other components go through `send_frame`/`publish`.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    /// Outbound half of the live link
    link: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    /// Cancels the pump and any reconnect of the current session
    session: Mutex<Option<CancellationToken>>,
    /// Credentials reused for reconnects
    user: Mutex<Option<User>>,
    deliveries: mpsc::UnboundedSender<Frame>,
}

impl ConnectionManager {
    /// Create a manager and the receiver of inbound MESSAGE frames
    pub fn new(
        connector: Arc<dyn Connector>,
        config: ConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (deliveries, deliveries_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let manager = Self {
            inner: Arc::new(Inner {
                connector,
                config,
                state,
                link: Mutex::new(None),
                session: Mutex::new(None),
                user: Mutex::new(None),
                deliveries,
            }),
        };
        (manager, deliveries_rx)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether frames can be sent right now
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Retry and timeout settings
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Connect as `user`
    ///
    /// A no-op while already connecting or connected. Transport failures and
    /// handshake timeouts are retried with exponential backoff up to
    /// `max_attempts`; a rejected handshake fails immediately. On failure the
    /// state becomes `Failed` (or `Disconnected` when cancelled).
    pub async fn connect(&self, user: &User, cancel: &CancellationToken) -> Result<()> {
        let Some(token) = user.bearer_token().map(str::to_string) else {
            warn!("User {} has no token; chat connection disabled", user.username);
            return Err(ConnectionError::MissingToken.into());
        };

        let claimed = self.inner.state.send_if_modified(|state| {
            if state.is_active() {
                false
            } else {
                *state = ConnectionState::Connecting;
                true
            }
        });
        if !claimed {
            debug!("Connect requested while {}; ignoring", self.state().label());
            return Ok(());
        }

        info!("Connecting to chat broker as {}", user.username);
        *lock(&self.inner.user) = Some(user.clone());
        let session = CancellationToken::new();
        if let Some(previous) = lock(&self.inner.session).replace(session.clone()) {
            previous.cancel();
        }

        match self.establish(&token, cancel, &session).await {
            Ok(link) => {
                if session.is_cancelled() {
                    debug!("Session closed while handshaking; dropping new link");
                    return Err(ConnectionError::Cancelled.into());
                }
                self.install(link, session);
                info!("Connected to chat broker");
                Ok(())
            }
            Err(e) => {
                let next = if e == ConnectionError::Cancelled {
                    ConnectionState::Disconnected
                } else {
                    error!("Chat connection failed: {}", e);
                    ConnectionState::Failed
                };
                if !session.is_cancelled() {
                    self.inner.state.send_replace(next);
                }
                Err(e.into())
            }
        }
    }

    /// Tear the connection down
    ///
    /// Safe to call in any state and any number of times; always ends in
    /// `Disconnected`.
    pub fn disconnect(&self) {
        if let Some(session) = lock(&self.inner.session).take() {
            session.cancel();
        }
        if let Some(outbound) = lock(&self.inner.link).take() {
            if outbound.send(Frame::disconnect()).is_err() {
                debug!("Link already closed; skipping DISCONNECT");
            }
        }
        let previous = self.inner.state.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            info!("Disconnected from chat broker (was {})", previous.label());
        }
    }

    /// Write a raw frame on the live link
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        let guard = lock(&self.inner.link);
        let outbound = guard.as_ref().ok_or(ConnectionError::NotConnected)?;
        outbound
            .send(frame)
            .map_err(|_| ConnectionError::NotConnected.into())
    }

    /// Publish a JSON body to a destination
    pub fn publish(&self, destination: &str, body: String) -> Result<()> {
        debug!("Publishing {} bytes to {}", body.len(), destination);
        self.send_frame(Frame::send(destination, body))
    }

    /// Try the handshake until it succeeds, is rejected, or attempts run out
    async fn establish(
        &self,
        token: &str,
        cancel: &CancellationToken,
        session: &CancellationToken,
    ) -> std::result::Result<BrokerLink, ConnectionError> {
        let attempts = self.inner.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            info!("Broker handshake attempt {}/{}", attempt, attempts);

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
                _ = session.cancelled() => return Err(ConnectionError::Cancelled),
                outcome = self.handshake(token) => outcome,
            };

            match outcome {
                Ok(link) => return Ok(link),
                Err(ConnectionError::Rejected(reason)) => {
                    error!("Broker rejected the handshake: {}", reason);
                    return Err(ConnectionError::Rejected(reason));
                }
                Err(e) => {
                    warn!("Handshake attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                let delay = backoff_delay(self.inner.config.retry_base_delay, attempt);
                info!("Retrying broker connection in {:?}", delay);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
                    _ = session.cancelled() => return Err(ConnectionError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(ConnectionError::Exhausted {
            attempts,
            last: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Open one link and run the CONNECT/CONNECTED exchange on it
    async fn handshake(&self, token: &str) -> std::result::Result<BrokerLink, ConnectionError> {
        let mut link = self.inner.connector.open().await.map_err(|e| match e {
            Error::Connection(inner) => inner,
            other => ConnectionError::Transport(other.to_string()),
        })?;

        let heartbeat_ms = self.inner.config.heartbeat.as_millis() as u64;
        let connect = Frame::connect(&self.inner.connector.host(), token, heartbeat_ms);
        link.outbound
            .send(connect)
            .map_err(|_| ConnectionError::Transport("link closed before CONNECT".to_string()))?;

        let timeout = self.inner.config.handshake_timeout;
        match tokio::time::timeout(timeout, await_connected(&mut link.inbound)).await {
            Ok(Ok(())) => Ok(link),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectionError::Timeout(timeout)),
        }
    }

    fn install(&self, link: BrokerLink, session: CancellationToken) {
        let BrokerLink { outbound, inbound } = link;
        *lock(&self.inner.link) = Some(outbound);
        self.inner.state.send_replace(ConnectionState::Connected);
        tokio::spawn(self.clone().pump(inbound, session));
    }

    /// Forward inbound frames; reconnect when the link drops
    async fn pump(self, mut inbound: mpsc::UnboundedReceiver<Frame>, session: CancellationToken) {
        loop {
            loop {
                tokio::select! {
                    _ = session.cancelled() => return,
                    frame = inbound.recv() => match frame {
                        Some(frame) => self.dispatch(frame),
                        None => break,
                    },
                }
            }

            if session.is_cancelled() {
                return;
            }
            warn!("Broker link dropped; reconnecting");
            lock(&self.inner.link).take();
            self.inner.state.send_replace(ConnectionState::Connecting);

            let token = lock(&self.inner.user)
                .as_ref()
                .and_then(|user| user.bearer_token().map(str::to_string));
            let Some(token) = token else {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                return;
            };

            match self.establish(&token, &session, &session).await {
                Ok(link) => {
                    if session.is_cancelled() {
                        return;
                    }
                    let BrokerLink { outbound, inbound: next } = link;
                    *lock(&self.inner.link) = Some(outbound);
                    inbound = next;
                    self.inner.state.send_replace(ConnectionState::Connected);
                    info!("Reconnected to chat broker");
                }
                Err(ConnectionError::Cancelled) => return,
                Err(e) => {
                    error!("Giving up on chat broker: {}", e);
                    if !session.is_cancelled() {
                        self.inner.state.send_replace(ConnectionState::Failed);
                    }
                    return;
                }
            }
        }
    }

    fn dispatch(&self, frame: Frame) {
        match frame.command {
            Command::Message => {
                if self.inner.deliveries.send(frame).is_err() {
                    debug!("No consumer for inbound messages; dropping frame");
                }
            }
            Command::Error => error!("Broker error: {}", frame.error_reason()),
            Command::Receipt => debug!("Receipt {:?}", frame.get_header("receipt-id")),
            other => debug!("Ignoring {} frame", other),
        }
    }
}

async fn await_connected(
    inbound: &mut mpsc::UnboundedReceiver<Frame>,
) -> std::result::Result<(), ConnectionError> {
    while let Some(frame) = inbound.recv().await {
        match frame.command {
            Command::Connected => {
                debug!("Broker version {:?}", frame.get_header("version"));
                return Ok(());
            }
            Command::Error => return Err(ConnectionError::Rejected(frame.error_reason())),
            other => debug!("Ignoring {} before CONNECTED", other),
        }
    }
    Err(ConnectionError::Transport("link closed during handshake".to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
