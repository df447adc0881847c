//! Example: Futures WebSocket private feeds.
//!
//! Reads `KRAKEN_FUTURES_API_KEY` and `KRAKEN_FUTURES_API_SECRET`, also from `.env`.
//!
//! Run with: cargo run --example futures_ws_private

use std::sync::Arc;

use futures_util::StreamExt;
use kraken_futures_stream::auth::EnvCredentials;
use kraken_futures_stream::ws::{FuturesWsClient, FuturesWsEvent, feeds};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let credentials = match EnvCredentials::try_from_env() {
        Some(creds) => Arc::new(creds),
        None => {
            println!(
                "Set KRAKEN_FUTURES_API_KEY and KRAKEN_FUTURES_API_SECRET to run this example."
            );
            return Ok(());
        }
    };

    let client = FuturesWsClient::builder().credentials(credentials).build();
    let mut stream = client.connect();

    stream.subscribe_feed(feeds::OPEN_ORDERS).await?;
    stream.subscribe_feed(feeds::FILLS).await?;
    stream.subscribe_feed(feeds::OPEN_POSITIONS).await?;
    stream.subscribe_feed(feeds::BALANCES).await?;

    let mut seen = 0;
    while let Some(event) = stream.next().await {
        match event {
            FuturesWsEvent::Subscribed(ack) => println!("Subscribed: {}", ack.feed),
            FuturesWsEvent::Unsubscribed(ack) => println!("Unsubscribed: {}", ack.feed),
            FuturesWsEvent::Message(msg) => {
                let feed = msg.get("feed").and_then(|f| f.as_str()).unwrap_or("-");
                println!("{feed} update: {msg}");
            }
            FuturesWsEvent::Error(notice) => {
                println!("Stopped: {}", notice.detail);
                break;
            }
        }
        seen += 1;
        if seen >= 25 {
            break;
        }
    }

    stream.close().await?;
    Ok(())
}
