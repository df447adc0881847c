//! Write side of one live WebSocket connection.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures_util::SinkExt;
use futures_util::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::auth::CredentialsProvider;
use crate::error::KrakenError;
use crate::ws::challenge::{ChallengeAuthenticator, ChallengeState};
use crate::ws::messages::{ChallengeRequest, SubscriptionRequest};
use crate::ws::registry::Subscription;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, WsMessage>;
pub(crate) type WsReceiver = SplitStream<WsStream>;

/// Handle to one open socket.
///
/// Created by the connection manager when a handshake completes and
/// discarded when that attempt ends. Every outbound frame goes through
/// here, so the challenge handshake is tied to exactly one socket.
pub(crate) struct Connection {
    sink: Mutex<WsSink>,
    authenticator: ChallengeAuthenticator,
    challenge_timeout: Duration,
    closed: CancellationToken,
    // Subscriptions already requested on this socket.
    sent: StdMutex<HashSet<Subscription>>,
}

impl Connection {
    pub(crate) fn new(
        sink: WsSink,
        credentials: Option<Arc<dyn CredentialsProvider>>,
        challenge_timeout: Duration,
    ) -> Self {
        Self {
            sink: Mutex::new(sink),
            authenticator: ChallengeAuthenticator::new(credentials),
            challenge_timeout,
            closed: CancellationToken::new(),
            sent: StdMutex::new(HashSet::new()),
        }
    }

    /// Subscribe once per socket.
    ///
    /// The application and the replay both call this when a connection
    /// opens; whichever claims `subscription` first sends it and the other
    /// returns immediately. A failed send releases the claim.
    pub(crate) async fn subscribe(&self, subscription: &Subscription) -> Result<(), KrakenError> {
        if !self.sent().insert(subscription.clone()) {
            tracing::debug!("Already subscribed to {} on this connection", subscription);
            return Ok(());
        }

        let result = self
            .send_request(subscription, SubscriptionRequest::subscribe(subscription))
            .await;
        if result.is_err() {
            self.sent().remove(subscription);
        }
        result
    }

    /// Unsubscribe, so a later subscribe goes out again.
    pub(crate) async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), KrakenError> {
        self.sent().remove(subscription);
        self.send_request(subscription, SubscriptionRequest::unsubscribe(subscription))
            .await
    }

    fn sent(&self) -> std::sync::MutexGuard<'_, HashSet<Subscription>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a subscribe or unsubscribe request on the path `subscription` needs.
    async fn send_request(
        &self,
        subscription: &Subscription,
        request: SubscriptionRequest,
    ) -> Result<(), KrakenError> {
        if subscription.is_private() {
            self.send_private(request).await
        } else {
            self.send_json(&request).await
        }
    }

    /// Send a private request, running the challenge handshake first if needed.
    ///
    /// Suspends until the challenge for this connection has been signed.
    pub(crate) async fn send_private(&self, request: SubscriptionRequest) -> Result<(), KrakenError> {
        let credentials = self.authenticator.credentials()?;

        if self.authenticator.begin() {
            tracing::debug!("Requesting challenge for private feeds");
            self.send_json(&ChallengeRequest::new(&credentials.api_key))
                .await?;
        }

        let auth = self
            .authenticator
            .wait_ready(self.challenge_timeout, &self.closed)
            .await?;
        self.send_json(&request.with_auth(auth)).await
    }

    /// Send a JSON message.
    pub(crate) async fn send_json<T: serde::Serialize>(&self, msg: &T) -> Result<(), KrakenError> {
        let json = serde_json::to_string(msg)?;

        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Text(json.into()))
            .await
            .map_err(|e| KrakenError::WebSocketMsg(format!("Failed to send message: {}", e)))
    }

    /// Send a transport-level ping.
    pub(crate) async fn send_ping(&self) -> Result<(), KrakenError> {
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Ping(Default::default()))
            .await
            .map_err(|e| KrakenError::WebSocketMsg(format!("Failed to send ping: {}", e)))
    }

    /// Hand a server challenge to the authenticator.
    pub(crate) fn accept_challenge(&self, challenge: &str) -> Result<(), KrakenError> {
        self.authenticator.accept(challenge)
    }

    /// Handshake state of this connection.
    pub(crate) fn challenge_state(&self) -> ChallengeState {
        self.authenticator.state()
    }

    /// Mark the connection abandoned; pending private sends fail.
    pub(crate) fn mark_closed(&self) {
        self.closed.cancel();
    }

    /// Send a Close frame, ignoring failures.
    pub(crate) async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(WsMessage::Close(None)).await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("authenticator", &self.authenticator)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}
