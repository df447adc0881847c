//! Kraken Futures WebSocket API client.
//!
//! This module provides a persistent WebSocket connection to the Kraken
//! Futures API, supporting both public market data feeds and authenticated
//! private feeds.
//!
//! ## Features
//!
//! - Automatic reconnection with jittered exponential backoff
//! - Subscription registry replayed after every reconnect
//! - Challenge-based authentication
//! - Terminal failures delivered through the same event stream as data
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kraken_futures_stream::ws::{FuturesWsClient, feeds};
//! use futures_util::StreamExt;
//!
//! let client = FuturesWsClient::new();
//! let mut stream = client.connect();
//!
//! // Subscribe to ticker for BTC perpetual
//! stream.subscribe(feeds::TICKER, vec!["PI_XBTUSD"]).await?;
//!
//! while let Some(event) = stream.next().await {
//!     println!("Event: {:?}", event);
//! }
//! ```
//!
//! ## Authentication
//!
//! The Futures WebSocket API uses challenge-based authentication:
//!
//! 1. Request a challenge with your API key
//! 2. Sign the challenge using HMAC-SHA512(SHA256(challenge), secret)
//! 3. Include both original and signed challenge in private subscriptions
//!
//! All three steps happen on demand, once per connection, the first time a
//! private feed is subscribed (or replayed after a reconnect).
//!
//! ```rust,ignore
//! use kraken_futures_stream::ws::{FuturesWsClient, feeds};
//! use kraken_futures_stream::auth::StaticCredentials;
//! use std::sync::Arc;
//!
//! let credentials = Arc::new(StaticCredentials::new("api_key", "api_secret"));
//! let client = FuturesWsClient::builder().credentials(credentials).build();
//! let mut stream = client.connect();
//!
//! stream.subscribe_feed(feeds::OPEN_ORDERS).await?;
//! stream.subscribe_feed(feeds::FILLS).await?;
//! ```

mod backoff;
mod catalog;
mod challenge;
mod client;
mod connection;
mod dispatcher;
mod manager;
mod messages;
mod registry;
mod stream;

pub use backoff::BackoffPolicy;
pub use catalog::{FeedCatalog, StaticFeedCatalog};
pub use challenge::ChallengeState;
pub use client::{FuturesWsClient, FuturesWsClientBuilder, WsConfig, WsConfigBuilder};
pub use dispatcher::{ErrorNotice, FuturesWsEvent, TerminalReason};
pub use manager::ConnectionState;
pub use messages::*;
pub use registry::{Subscription, SubscriptionRegistry, Visibility};
pub use stream::FuturesStream;

/// WebSocket endpoint URLs.
pub mod endpoints {
    /// Public WebSocket endpoint.
    pub const WS_PUBLIC: &str = "wss://futures.kraken.com/ws/v1";
    /// Demo/testnet WebSocket endpoint.
    pub const WS_DEMO: &str = "wss://demo-futures.kraken.com/ws/v1";
}

/// Available feed names.
pub mod feeds {
    // Public feeds
    /// Trade feed - individual trade executions.
    pub const TRADE: &str = "trade";
    /// Order book feed - provides order book snapshots and updates.
    pub const BOOK: &str = "book";
    /// Ticker feed - price and volume information.
    pub const TICKER: &str = "ticker";
    /// Lightweight ticker feed - minimal ticker data.
    pub const TICKER_LITE: &str = "ticker_lite";
    /// Heartbeat feed.
    pub const HEARTBEAT: &str = "heartbeat";

    // Private feeds
    /// Fills feed - user's trade executions.
    pub const FILLS: &str = "fills";
    /// Open positions feed - user's open positions.
    pub const OPEN_POSITIONS: &str = "open_positions";
    /// Open orders feed - user's open orders.
    pub const OPEN_ORDERS: &str = "open_orders";
    /// Verbose open orders feed.
    pub const OPEN_ORDERS_VERBOSE: &str = "open_orders_verbose";
    /// Balances feed - account balances.
    pub const BALANCES: &str = "balances";
    /// Deposits and withdrawals feed.
    pub const DEPOSITS_WITHDRAWALS: &str = "deposits_withdrawals";
    /// Account balances and margins feed.
    pub const ACCOUNT_BALANCES_AND_MARGINS: &str = "account_balances_and_margins";
    /// Account log feed - account activity.
    pub const ACCOUNT_LOG: &str = "account_log";
    /// Authenticated notifications feed.
    pub const NOTIFICATIONS_AUTH: &str = "notifications_auth";

    /// Public feeds known to the default catalog.
    pub const PUBLIC: &[&str] = &[TRADE, BOOK, TICKER, TICKER_LITE, HEARTBEAT];

    /// Private feeds known to the default catalog.
    pub const PRIVATE: &[&str] = &[
        FILLS,
        OPEN_POSITIONS,
        OPEN_ORDERS,
        OPEN_ORDERS_VERBOSE,
        BALANCES,
        DEPOSITS_WITHDRAWALS,
        ACCOUNT_BALANCES_AND_MARGINS,
        ACCOUNT_LOG,
        NOTIFICATIONS_AUTH,
    ];
}
