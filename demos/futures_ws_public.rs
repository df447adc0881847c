//! Example: Futures WebSocket public feeds.
//!
//! Run with: RUST_LOG=kraken_futures_stream=debug cargo run --example futures_ws_public

use futures_util::StreamExt;
use kraken_futures_stream::ws::{FuturesWsClient, FuturesWsEvent, feeds};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = FuturesWsClient::new();
    let mut stream = client.connect();

    stream.subscribe(feeds::TICKER, vec!["PI_XBTUSD"]).await?;
    stream.subscribe(feeds::BOOK, vec!["PI_XBTUSD"]).await?;
    stream.subscribe(feeds::TRADE, vec!["PI_XBTUSD"]).await?;

    let mut seen = 0;
    while let Some(event) = stream.next().await {
        match event {
            FuturesWsEvent::Subscribed(ack) => {
                println!("Subscribed: {} ({:?})", ack.feed, ack.product_ids);
            }
            FuturesWsEvent::Unsubscribed(ack) => {
                println!("Unsubscribed: {}", ack.feed);
            }
            FuturesWsEvent::Message(msg) => {
                let feed = msg.get("feed").and_then(|f| f.as_str()).unwrap_or("-");
                println!("{feed}: {msg}");
            }
            FuturesWsEvent::Error(notice) => {
                println!("Stopped: {}", notice.detail);
                break;
            }
        }
        seen += 1;
        if seen >= 50 {
            break;
        }
    }

    println!("Subscriptions: {:?}", stream.current_subscriptions());
    stream.close().await?;
    Ok(())
}
