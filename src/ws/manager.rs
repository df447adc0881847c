//! Connection lifecycle: connect, receive, replay, reconnect.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::auth::CredentialsProvider;
use crate::error::KrakenError;
use crate::ws::catalog::FeedCatalog;
use crate::ws::client::WsConfig;
use crate::ws::connection::{Connection, WsReceiver};
use crate::ws::dispatcher::{Dispatcher, ErrorNotice, FuturesWsEvent};
use crate::ws::messages::InboundMessage;
use crate::ws::registry::{Subscription, SubscriptionRegistry};

/// How long a best-effort Close frame may take on cancellation.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Lower bound for the keepalive period; `tokio::time::interval` rejects zero.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Lifecycle state of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected; initial state and final state after cancellation.
    Disconnected,
    /// Waiting out backoff or performing the handshake.
    Connecting,
    /// Handshake complete, frames are flowing.
    Open,
    /// Cancellation in progress.
    Closing,
    /// Reconnect attempts exhausted. Terminal.
    Failed,
}

/// The socket senders should use right now.
#[derive(Debug, Clone)]
pub(crate) enum Link {
    /// Between connections; senders wait.
    Pending,
    /// A handshake completed on this connection.
    Open(Arc<Connection>),
    /// The manager stopped; senders fail with this reason.
    Closed(String),
}

/// State shared by the application handle and the connection manager.
pub(crate) struct Session {
    config: WsConfig,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    catalog: Arc<dyn FeedCatalog>,
    registry: Mutex<SubscriptionRegistry>,
    link: watch::Sender<Link>,
    state: watch::Sender<ConnectionState>,
}

impl Session {
    pub(crate) fn new(
        config: WsConfig,
        credentials: Option<Arc<dyn CredentialsProvider>>,
        catalog: Arc<dyn FeedCatalog>,
    ) -> Self {
        Self {
            config,
            credentials,
            catalog,
            registry: Mutex::new(SubscriptionRegistry::new()),
            link: watch::Sender::new(Link::Pending),
            state: watch::Sender::new(ConnectionState::Disconnected),
        }
    }

    /// Validate a subscription request against the catalog and credentials.
    ///
    /// Fails without touching the network.
    pub(crate) fn subscription<I, S>(
        &self,
        feed: &str,
        product_ids: I,
    ) -> Result<Subscription, KrakenError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let visibility = self
            .catalog
            .visibility(feed)
            .ok_or_else(|| KrakenError::UnknownFeed(feed.to_string()))?;

        if visibility.is_private() && self.credentials.is_none() {
            return Err(KrakenError::MissingCredentials);
        }

        Ok(Subscription::new(feed, product_ids, visibility))
    }

    /// Record `subscription` and send it once a connection is open.
    ///
    /// The entry stays registered if the connection drops before the send,
    /// so it goes out with the next replay. Authorization failures remove it.
    pub(crate) async fn subscribe(&self, subscription: Subscription) -> Result<(), KrakenError> {
        self.registry().add(subscription.clone());

        let result = match self.open_connection().await {
            Ok(connection) => connection.subscribe(&subscription).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            if e.is_auth() {
                self.registry().remove(&subscription);
            }
        }
        result
    }

    /// Forget `subscription` and send the unsubscribe request.
    pub(crate) async fn unsubscribe(&self, subscription: Subscription) -> Result<(), KrakenError> {
        self.registry().remove(&subscription);
        let connection = self.open_connection().await?;
        connection.unsubscribe(&subscription).await
    }

    /// Wait for an open connection.
    ///
    /// Fails with [`KrakenError::ConnectionClosed`] once the manager has stopped.
    pub(crate) async fn open_connection(&self) -> Result<Arc<Connection>, KrakenError> {
        let mut link = self.link.subscribe();
        let current = link
            .wait_for(|link| !matches!(link, Link::Pending))
            .await
            .map_err(|_| KrakenError::ConnectionClosed {
                reason: "session dropped".into(),
            })?;

        match &*current {
            Link::Open(connection) => Ok(Arc::clone(connection)),
            Link::Closed(reason) => Err(KrakenError::ConnectionClosed {
                reason: reason.clone(),
            }),
            Link::Pending => Err(KrakenError::ConnectionClosed {
                reason: "no open connection".into(),
            }),
        }
    }

    /// The connection currently open, if any.
    pub(crate) fn current_connection(&self) -> Option<Arc<Connection>> {
        match &*self.link.borrow() {
            Link::Open(connection) => Some(Arc::clone(connection)),
            _ => None,
        }
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, SubscriptionRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn catalog(&self) -> &dyn FeedCatalog {
        self.catalog.as_ref()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Connection state {:?} -> {:?}", previous, state);
        }
    }

    fn publish(&self, link: Link) -> Link {
        self.link.send_replace(link)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("has_credentials", &self.credentials.is_some())
            .field("state", &self.state())
            .field("subscriptions", &self.registry().len())
            .finish()
    }
}

/// Runs connection attempts until cancelled or out of attempts.
pub(crate) struct ConnectionManager {
    url: String,
    session: Arc<Session>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
    reconnect_attempts: AtomicU32,
}

impl ConnectionManager {
    pub(crate) fn new(
        url: String,
        session: Arc<Session>,
        dispatcher: Dispatcher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            url,
            session,
            dispatcher,
            cancel,
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    /// Drive the connection until a terminal error, then emit the notice.
    pub(crate) async fn run(self) {
        let error = self.run_until_terminal().await;

        let final_state = match error {
            KrakenError::Cancelled => {
                self.session.set_state(ConnectionState::Closing);
                ConnectionState::Disconnected
            }
            _ => ConnectionState::Failed,
        };
        self.session.publish(Link::Closed(error.to_string()));
        self.session.set_state(final_state);
        self.dispatcher.terminate(ErrorNotice::from_error(&error));
    }

    async fn run_until_terminal(&self) -> KrakenError {
        let max_attempts = self.session.config.max_reconnect_attempts;

        loop {
            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt >= max_attempts {
                tracing::error!(
                    "Giving up after reaching {} of {} reconnect attempts",
                    attempt,
                    max_attempts
                );
                return KrakenError::MaxReconnectExceeded { attempts: attempt };
            }

            self.session.set_state(ConnectionState::Connecting);
            let wait = self.session.config.backoff.wait(attempt);
            tracing::debug!("Connection attempt {} in {:?}", attempt, wait);

            tokio::select! {
                _ = self.cancel.cancelled() => return KrakenError::Cancelled,
                _ = tokio::time::sleep(wait) => {}
            }

            let error = self.run_attempt().await;
            if error.is_terminal() {
                return error;
            }
            tracing::warn!("Connection lost: {}", error);
        }
    }

    /// One connection: receive and replay together, first failure wins.
    async fn run_attempt(&self) -> KrakenError {
        let attempt = async {
            tokio::try_join!(self.open_and_receive(), self.replay())?;
            Ok::<(), KrakenError>(())
        };

        let error = tokio::select! {
            _ = self.cancel.cancelled() => KrakenError::Cancelled,
            result = attempt => match result {
                Err(e) => e,
                Ok(()) => KrakenError::ConnectionClosed {
                    reason: "receive loop ended".into(),
                },
            },
        };

        if let Link::Open(connection) = self.session.publish(Link::Pending) {
            if matches!(error, KrakenError::Cancelled) {
                self.session.set_state(ConnectionState::Closing);
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, connection.close()).await;
            }
            connection.mark_closed();
        }

        error
    }

    async fn open_and_receive(&self) -> Result<(), KrakenError> {
        tracing::info!("Connecting to {}", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| KrakenError::WebSocketMsg(format!("Failed to connect: {}", e)))?;
        tracing::info!("Connected to {}", self.url);

        self.reconnect_attempts.store(0, Ordering::SeqCst);

        let (sink, receiver) = ws_stream.split();
        let connection = Arc::new(Connection::new(
            sink,
            self.session.credentials.clone(),
            self.session.config.challenge_timeout,
        ));

        self.session.set_state(ConnectionState::Open);
        self.session.publish(Link::Open(Arc::clone(&connection)));

        self.receive(receiver, &connection).await
    }

    async fn receive(
        &self,
        mut receiver: WsReceiver,
        connection: &Connection,
    ) -> Result<(), KrakenError> {
        let config = &self.session.config;
        let period = config.ping_interval.max(MIN_PING_INTERVAL);
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut unanswered_since: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    if let (Some(sent), Some(limit)) = (unanswered_since, config.pong_timeout) {
                        if sent.elapsed() > limit {
                            tracing::warn!("No pong within {:?}", limit);
                            return Err(KrakenError::Timeout);
                        }
                    }
                    connection.send_ping().await?;
                    unanswered_since.get_or_insert_with(Instant::now);
                }
                frame = tokio::time::timeout(config.recv_timeout, receiver.next()) => {
                    let msg = match frame {
                        Err(_) => {
                            tracing::trace!("No frame within {:?}", config.recv_timeout);
                            continue;
                        }
                        Ok(None) => {
                            return Err(KrakenError::ConnectionClosed {
                                reason: "stream ended".into(),
                            });
                        }
                        Ok(Some(Err(e))) => return Err(KrakenError::WebSocket(e)),
                        Ok(Some(Ok(msg))) => msg,
                    };

                    match msg {
                        WsMessage::Text(text) => self.handle_text(&text, connection),
                        WsMessage::Binary(data) => match std::str::from_utf8(&data) {
                            Ok(text) => self.handle_text(text, connection),
                            Err(e) => tracing::warn!("Dropping non UTF-8 binary frame: {}", e),
                        },
                        WsMessage::Pong(_) => unanswered_since = None,
                        WsMessage::Close(frame) => {
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_else(|| "closed by server".into());
                            return Err(KrakenError::ConnectionClosed { reason });
                        }
                        WsMessage::Ping(_) | WsMessage::Frame(_) => {}
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str, connection: &Connection) {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping unparseable frame {:?}: {}", text, e);
                return;
            }
        };

        match message {
            InboundMessage::Challenge(challenge) => {
                tracing::debug!("Received challenge");
                if let Err(e) = connection.accept_challenge(&challenge.message) {
                    tracing::warn!("Failed to sign challenge: {}", e);
                }
            }
            InboundMessage::Subscribed(ack) => {
                match Subscription::from_ack(&ack, self.session.catalog()) {
                    Some(subscription) => self.session.registry().add(subscription),
                    None => tracing::warn!("Subscribed to feed {} outside the catalog", ack.feed),
                }
                self.dispatcher.deliver(FuturesWsEvent::Subscribed(ack));
            }
            InboundMessage::Unsubscribed(ack) => {
                match Subscription::from_ack(&ack, self.session.catalog()) {
                    Some(subscription) => self.session.registry().remove(&subscription),
                    None => {
                        tracing::warn!("Unsubscribed from feed {} outside the catalog", ack.feed)
                    }
                }
                self.dispatcher.deliver(FuturesWsEvent::Unsubscribed(ack));
            }
            InboundMessage::Data(value) => self.dispatcher.deliver(FuturesWsEvent::Message(value)),
        }
    }

    /// Re-issue every registered subscription on the new connection.
    async fn replay(&self) -> Result<(), KrakenError> {
        let connection = self.session.open_connection().await?;
        let subscriptions = self.session.registry().snapshot();
        if !subscriptions.is_empty() {
            tracing::debug!("Replaying {} subscriptions", subscriptions.len());
        }

        for subscription in &subscriptions {
            connection.subscribe(subscription).await?;
            tracing::debug!("Replayed subscription {}", subscription);
        }

        Ok(())
    }
}
