//! # Kraken Futures Stream
//!
//! An async Rust client for the Kraken Futures WebSocket API.
//!
//! ## Features
//!
//! - Persistent connection with automatic reconnection and jittered backoff
//! - Subscription registry replayed after every reconnect
//! - Challenge-based authentication for private feeds
//! - Inbound messages delivered in wire order as a [`futures_util::Stream`]
//! - Terminal failures reported through the same stream
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use kraken_futures_stream::ws::{FuturesWsClient, FuturesWsEvent, feeds};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FuturesWsClient::new();
//!     let mut stream = client.connect();
//!
//!     stream.subscribe(feeds::TICKER, vec!["PI_XBTUSD"]).await?;
//!
//!     while let Some(event) = stream.next().await {
//!         if let FuturesWsEvent::Message(msg) = event {
//!             println!("{msg}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod error;
pub mod types;
pub mod ws;

// Re-export commonly used types at crate root
pub use error::KrakenError;
pub use ws::{FuturesStream, FuturesWsClient, FuturesWsEvent};

/// Result type alias using KrakenError
pub type Result<T> = std::result::Result<T, KrakenError>;
