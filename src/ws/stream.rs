//! Futures WebSocket stream implementation.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::KrakenError;
use crate::ws::challenge::ChallengeState;
use crate::ws::dispatcher::FuturesWsEvent;
use crate::ws::manager::{ConnectionState, Session};
use crate::ws::registry::Subscription;

/// A managed Kraken Futures WebSocket stream.
///
/// Yields [`FuturesWsEvent`]s in wire order. The connection behind it is
/// reconnected with backoff and every registered subscription is replayed
/// on each new socket. When the manager stops, one
/// [`FuturesWsEvent::Error`] is yielded and then the stream ends.
///
/// Dropping the stream cancels the connection.
pub struct FuturesStream {
    events: UnboundedReceiverStream<FuturesWsEvent>,
    session: Arc<Session>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FuturesStream {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<FuturesWsEvent>,
        session: Arc<Session>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            events: UnboundedReceiverStream::new(events),
            session,
            cancel,
            task: Some(task),
        }
    }

    /// Subscribe to a feed.
    ///
    /// An empty `product_ids` subscribes to the whole feed. Private feeds
    /// are authenticated with a signed challenge, requested on first use
    /// per connection.
    ///
    /// The subscription is registered before it is sent and survives
    /// reconnects. Suspends until a connection is open (and, for private
    /// feeds, until the challenge is signed).
    ///
    /// # Errors
    ///
    /// - [`KrakenError::UnknownFeed`] if the feed is in neither catalog
    /// - [`KrakenError::MissingCredentials`] for a private feed without credentials
    /// - [`KrakenError::Auth`] if no challenge arrives in time
    /// - [`KrakenError::ConnectionClosed`] once the stream has stopped
    pub async fn subscribe<I, S>(&self, feed: &str, product_ids: I) -> Result<(), KrakenError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let subscription = self.session.subscription(feed, product_ids)?;
        tracing::debug!("Subscribing to {}", subscription);
        self.session.subscribe(subscription).await
    }

    /// Subscribe to every product of a feed.
    pub async fn subscribe_feed(&self, feed: &str) -> Result<(), KrakenError> {
        self.subscribe(feed, Vec::<String>::new()).await
    }

    /// Unsubscribe from a feed.
    ///
    /// The subscription is dropped from the registry right away, so it is
    /// not replayed even if the request never reaches the server.
    pub async fn unsubscribe<I, S>(&self, feed: &str, product_ids: I) -> Result<(), KrakenError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let subscription = self.session.subscription(feed, product_ids)?;
        tracing::debug!("Unsubscribing from {}", subscription);
        self.session.unsubscribe(subscription).await
    }

    /// Unsubscribe from a whole-feed subscription.
    pub async fn unsubscribe_feed(&self, feed: &str) -> Result<(), KrakenError> {
        self.unsubscribe(feed, Vec::<String>::new()).await
    }

    /// The registered subscriptions, in replay order.
    pub fn current_subscriptions(&self) -> Vec<Subscription> {
        self.session.registry().snapshot()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.session.state_changes()
    }

    /// Whether the reconnect attempts were exhausted.
    pub fn has_failed(&self) -> bool {
        self.state() == ConnectionState::Failed
    }

    /// Challenge state of the open connection, if one is open.
    pub fn challenge_state(&self) -> Option<ChallengeState> {
        self.session
            .current_connection()
            .map(|connection| connection.challenge_state())
    }

    /// Token that stops the connection when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the connection and wait for the manager to finish.
    ///
    /// The terminal notice is still delivered through the stream.
    pub async fn close(&mut self) -> Result<(), KrakenError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| {
                KrakenError::WebSocketMsg(format!("Connection task failed: {}", e))
            })?;
        }
        Ok(())
    }
}

impl Stream for FuturesStream {
    type Item = FuturesWsEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for FuturesStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for FuturesStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuturesStream")
            .field("session", &self.session)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
