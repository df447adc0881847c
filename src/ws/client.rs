//! Futures WebSocket client implementation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::{CredentialsProvider, sign_challenge};
use crate::error::KrakenError;
use crate::ws::backoff::BackoffPolicy;
use crate::ws::catalog::{FeedCatalog, StaticFeedCatalog};
use crate::ws::dispatcher::Dispatcher;
use crate::ws::endpoints;
use crate::ws::manager::{ConnectionManager, Session};
use crate::ws::stream::FuturesStream;

/// Configuration for WebSocket connections.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Jittered backoff applied before every connection attempt.
    pub backoff: BackoffPolicy,
    /// The manager stops once its attempt counter reaches this value.
    ///
    /// The counter resets on every successful handshake, so with the default
    /// of 2 a dropped connection gets exactly one reconnect attempt.
    pub max_reconnect_attempts: u32,
    /// How long to wait for a frame before checking again.
    pub recv_timeout: Duration,
    /// How long a private request waits for the server's challenge.
    pub challenge_timeout: Duration,
    /// Ping interval for connection health checks.
    pub ping_interval: Duration,
    /// Pong timeout - reconnect if a ping stays unanswered this long.
    pub pong_timeout: Option<Duration>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_reconnect_attempts: 2,
            recv_timeout: Duration::from_secs(15),
            challenge_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl WsConfig {
    /// Create a new configuration builder.
    pub fn builder() -> WsConfigBuilder {
        WsConfigBuilder::new()
    }
}

/// Builder for [`WsConfig`].
#[derive(Debug, Clone, Default)]
pub struct WsConfigBuilder {
    config: WsConfig,
}

impl WsConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: WsConfig::default(),
        }
    }

    /// Set the reconnection backoff policy.
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Set maximum reconnection attempts.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Set the bounded wait for each inbound frame.
    pub fn recv_timeout(mut self, timeout: Duration) -> Self {
        self.config.recv_timeout = timeout;
        self
    }

    /// Set how long private requests wait for the challenge.
    pub fn challenge_timeout(mut self, timeout: Duration) -> Self {
        self.config.challenge_timeout = timeout;
        self
    }

    /// Set ping interval.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Set pong timeout.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.config.pong_timeout = Some(timeout);
        self
    }

    /// Keep pinging but never fail a connection over a missing pong.
    pub fn no_pong_timeout(mut self) -> Self {
        self.config.pong_timeout = None;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> WsConfig {
        self.config
    }
}

/// Kraken Futures WebSocket client.
///
/// Holds the endpoint, connection policy, credentials and feed catalog.
/// Each call to [`connect`](Self::connect) starts an independent managed
/// connection.
///
/// # Example
///
/// ```rust,ignore
/// use kraken_futures_stream::ws::{FuturesWsClient, FuturesWsEvent, feeds};
/// use futures_util::StreamExt;
///
/// let client = FuturesWsClient::new();
/// let mut stream = client.connect();
///
/// stream.subscribe(feeds::TICKER, vec!["PI_XBTUSD"]).await?;
///
/// while let Some(event) = stream.next().await {
///     if let FuturesWsEvent::Message(msg) = event {
///         println!("{}", msg);
///     }
/// }
/// ```
#[derive(Clone)]
pub struct FuturesWsClient {
    /// WebSocket URL.
    url: String,
    /// Connection configuration.
    config: WsConfig,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    catalog: Arc<dyn FeedCatalog>,
}

impl FuturesWsClient {
    /// Create a new WebSocket client with default settings.
    pub fn new() -> Self {
        Self::with_config(WsConfig::default())
    }

    /// Create a new WebSocket client with custom configuration.
    pub fn with_config(config: WsConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Create a client for the demo/testnet environment.
    pub fn demo() -> Self {
        Self::builder().use_demo().build()
    }

    /// Create a client with a custom URL (useful for testing).
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::builder().url(url).build()
    }

    /// Create a new client builder.
    pub fn builder() -> FuturesWsClientBuilder {
        FuturesWsClientBuilder::new()
    }

    /// Get the WebSocket URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the configuration.
    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    /// Check if the client has credentials for private feeds.
    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    /// The configured API key, if any.
    pub fn api_key(&self) -> Option<&str> {
        self.credentials
            .as_ref()
            .map(|provider| provider.get_credentials().api_key.as_str())
    }

    /// Sign a challenge with the configured secret.
    pub fn sign_challenge(&self, challenge: &str) -> Result<String, KrakenError> {
        let provider = self
            .credentials
            .as_ref()
            .ok_or(KrakenError::MissingCredentials)?;
        sign_challenge(provider.get_credentials(), challenge)
    }

    /// Start a managed connection.
    ///
    /// Returns immediately; the connection is established in the background
    /// and requests issued on the stream wait until it is open. Must be
    /// called from within a Tokio runtime.
    pub fn connect(&self) -> FuturesStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let session = Arc::new(Session::new(
            self.config.clone(),
            self.credentials.clone(),
            Arc::clone(&self.catalog),
        ));

        let manager = ConnectionManager::new(
            self.url.clone(),
            Arc::clone(&session),
            Dispatcher::new(sender),
            cancel.clone(),
        );
        let task = tokio::spawn(manager.run());

        FuturesStream::new(receiver, session, cancel, task)
    }
}

impl Default for FuturesWsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FuturesWsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuturesWsClient")
            .field("url", &self.url)
            .field("config", &self.config)
            .field("has_credentials", &self.credentials.is_some())
            .finish()
    }
}

/// Builder for [`FuturesWsClient`].
pub struct FuturesWsClientBuilder {
    url: String,
    config: WsConfig,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    catalog: Option<Arc<dyn FeedCatalog>>,
}

impl FuturesWsClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            url: endpoints::WS_PUBLIC.to_string(),
            config: WsConfig::default(),
            credentials: None,
            catalog: None,
        }
    }

    /// Set a custom WebSocket URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Use the demo/testnet endpoint.
    pub fn use_demo(mut self) -> Self {
        self.url = endpoints::WS_DEMO.to_string();
        self
    }

    /// Set the connection configuration.
    pub fn config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    /// Set credentials for private feeds.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Replace the default Kraken Futures feed catalog.
    pub fn feed_catalog(mut self, catalog: Arc<dyn FeedCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Build the client.
    pub fn build(self) -> FuturesWsClient {
        FuturesWsClient {
            url: self.url,
            config: self.config,
            credentials: self.credentials,
            catalog: self
                .catalog
                .unwrap_or_else(|| Arc::new(StaticFeedCatalog::kraken_futures())),
        }
    }
}

impl Default for FuturesWsClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FuturesWsClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuturesWsClientBuilder")
            .field("url", &self.url)
            .field("config", &self.config)
            .field("has_credentials", &self.credentials.is_some())
            .finish()
    }
}
