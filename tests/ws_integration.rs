use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use kraken_futures_stream::KrakenError;
use kraken_futures_stream::auth::StaticCredentials;
use kraken_futures_stream::ws::{
    BackoffPolicy, ConnectionState, FuturesStream, FuturesWsClient, FuturesWsEvent, Subscription,
    TerminalReason, WsConfig, feeds,
};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

const API_KEY: &str = "key";
// base64("futures_ws_secret")
const SECRET: &str = "ZnV0dXJlc193c19zZWNyZXQ=";
const SIGNED_NONCE_1: &str =
    "CuKFBencTluloUEvarR3f/XUJRJoD8ahqW/Nem7cDgL4EIGBh/1Zo3qdy4xkzux8cnPEu+e4lxvfYgpKL0ebwQ==";
const SIGNED_NONCE_2: &str =
    "wVg+bcOI8oqDehtmUNpUz0vIDTaNOCpaffz6c5DkvX8WptSHFgEAd9fpgdkuIRFw0xDGatBiCn6TdquDt+8gFA==";

/// In-process exchange stand-in.
///
/// Completes the WebSocket handshake for the first `handshake_limit`
/// connections and drops every later TCP connection before the handshake.
struct MockServer {
    url: String,
    connections: mpsc::UnboundedReceiver<ServerConnection>,
    accepted: Arc<AtomicUsize>,
}

impl MockServer {
    async fn start() -> Self {
        Self::with_handshake_limit(usize::MAX).await
    }

    async fn with_handshake_limit(limit: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, connections) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                if counter.fetch_add(1, Ordering::SeqCst) >= limit {
                    drop(tcp);
                    continue;
                }
                if let Ok(ws) = accept_async(tcp).await {
                    if tx.send(ServerConnection { ws }).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            url,
            connections,
            accepted,
        }
    }

    async fn next_connection(&mut self) -> ServerConnection {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("client did not connect")
            .expect("server stopped")
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

struct ServerConnection {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConnection {
    async fn send_json(&mut self, value: Value) {
        self.ws.send(Message::text(value.to_string())).await.unwrap();
    }

    async fn send_raw(&mut self, message: Message) {
        self.ws.send(message).await.unwrap();
    }

    async fn info(&mut self) {
        self.send_json(json!({"event": "info", "version": 1})).await;
    }

    async fn next_text(&mut self) -> Option<Value> {
        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    }

    async fn recv_json(&mut self) -> Value {
        tokio::time::timeout(WAIT, self.next_text())
            .await
            .expect("no frame from client")
            .expect("client closed the connection")
    }

    /// Skip frames until one matches.
    async fn recv_matching(&mut self, predicate: impl Fn(&Value) -> bool) -> Value {
        loop {
            let value = self.recv_json().await;
            if predicate(&value) {
                return value;
            }
        }
    }

    async fn expect_silence(&mut self, period: Duration) {
        if let Ok(Some(value)) = tokio::time::timeout(period, self.next_text()).await {
            panic!("unexpected frame from client: {value}");
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

fn test_config() -> WsConfig {
    WsConfig::builder()
        .backoff(BackoffPolicy::with_unit(Duration::from_millis(10)))
        .challenge_timeout(Duration::from_secs(2))
        .build()
}

fn public_client(url: &str) -> FuturesWsClient {
    FuturesWsClient::builder()
        .url(url)
        .config(test_config())
        .build()
}

fn private_client(url: &str) -> FuturesWsClient {
    FuturesWsClient::builder()
        .url(url)
        .config(test_config())
        .credentials(Arc::new(StaticCredentials::new(API_KEY, SECRET)))
        .build()
}

async fn next_event(stream: &mut FuturesStream) -> Option<FuturesWsEvent> {
    tokio::time::timeout(WAIT, stream.next())
        .await
        .expect("timed out waiting for an event")
}

/// Wait until the server's info message arrives, proving the socket is open.
async fn wait_for_info(stream: &mut FuturesStream) {
    loop {
        match next_event(stream).await {
            Some(FuturesWsEvent::Message(msg)) if msg["event"] == "info" => return,
            Some(_) => continue,
            None => panic!("stream ended before info"),
        }
    }
}

async fn terminal_notice(stream: &mut FuturesStream) -> TerminalReason {
    loop {
        match next_event(stream).await {
            Some(FuturesWsEvent::Error(notice)) => return notice.error,
            Some(_) => continue,
            None => panic!("stream ended without a notice"),
        }
    }
}

fn is_event(value: &Value, event: &str) -> bool {
    value["event"] == event
}

fn is_subscribe(value: &Value, feed: &str) -> bool {
    value["event"] == "subscribe" && value["feed"] == feed
}

#[tokio::test]
async fn public_ticker_subscribe_and_acks() {
    let mut server = MockServer::start().await;
    let mut stream = public_client(&server.url).connect();

    let mut conn = server.next_connection().await;
    conn.info().await;
    wait_for_info(&mut stream).await;
    assert_eq!(stream.state(), ConnectionState::Open);

    let (sent, frame) = tokio::join!(
        stream.subscribe(feeds::TICKER, vec!["PI_XBTUSD"]),
        conn.recv_matching(|v| is_subscribe(v, feeds::TICKER)),
    );
    sent.unwrap();
    assert_eq!(
        frame,
        json!({"event": "subscribe", "feed": "ticker", "product_ids": ["PI_XBTUSD"]})
    );

    conn.send_json(json!({"event": "subscribed", "feed": "ticker", "product_ids": ["PI_XBTUSD"]}))
        .await;
    match next_event(&mut stream).await {
        Some(FuturesWsEvent::Subscribed(ack)) => {
            assert_eq!(ack.feed, "ticker");
            assert_eq!(ack.raw["event"], "subscribed");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        stream.current_subscriptions(),
        vec![Subscription::public("ticker", ["PI_XBTUSD"])]
    );

    conn.send_json(json!({"event": "unsubscribed", "feed": "ticker", "product_ids": ["PI_XBTUSD"]}))
        .await;
    assert!(matches!(
        next_event(&mut stream).await,
        Some(FuturesWsEvent::Unsubscribed(_))
    ));
    assert!(stream.current_subscriptions().is_empty());

    stream.close().await.unwrap();
}

#[tokio::test]
async fn feed_data_is_delivered_unmodified() {
    let mut server = MockServer::start().await;
    let mut stream = public_client(&server.url).connect();
    let mut conn = server.next_connection().await;

    let ticker = r#"{"feed":"ticker","product_id":"PI_XBTUSD","bid":50000.123456789012345678}"#;
    conn.send_raw(Message::text(ticker)).await;

    match next_event(&mut stream).await {
        Some(FuturesWsEvent::Message(msg)) => {
            assert_eq!(serde_json::to_string(&msg).unwrap(), ticker);
        }
        other => panic!("unexpected {other:?}"),
    }

    stream.close().await.unwrap();
}

#[tokio::test]
async fn private_subscribe_waits_for_challenge() {
    let mut server = MockServer::start().await;
    let mut stream = private_client(&server.url).connect();

    let mut conn = server.next_connection().await;
    conn.info().await;
    wait_for_info(&mut stream).await;

    let (sent, ()) = tokio::join!(stream.subscribe_feed(feeds::FILLS), async {
        let request = conn.recv_matching(|v| is_event(v, "challenge")).await;
        assert_eq!(request, json!({"event": "challenge", "api_key": API_KEY}));

        // Nothing private goes out before the challenge is answered.
        conn.expect_silence(QUIET).await;
        assert_eq!(stream.challenge_state().map(|s| s.ready), Some(false));

        conn.send_json(json!({"event": "challenge", "message": "nonce-1"}))
            .await;
        let frame = conn.recv_matching(|v| is_subscribe(v, feeds::FILLS)).await;
        assert_eq!(
            frame,
            json!({
                "event": "subscribe",
                "feed": "fills",
                "api_key": API_KEY,
                "original_challenge": "nonce-1",
                "signed_challenge": SIGNED_NONCE_1
            })
        );
    });
    sent.unwrap();

    let state = stream.challenge_state().unwrap();
    assert!(state.ready);
    assert_eq!(state.raw_challenge.as_deref(), Some("nonce-1"));
    assert_eq!(state.signed_challenge.as_deref(), Some(SIGNED_NONCE_1));

    // The challenge was consumed, so the marker is the next event.
    conn.send_json(json!({"event": "info", "version": 2})).await;
    match next_event(&mut stream).await {
        Some(FuturesWsEvent::Message(msg)) => assert_eq!(msg["version"], 2),
        other => panic!("unexpected {other:?}"),
    }

    stream.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_private_subscribes_share_one_challenge() {
    let mut server = MockServer::start().await;
    let mut stream = private_client(&server.url).connect();

    let mut conn = server.next_connection().await;
    conn.info().await;
    wait_for_info(&mut stream).await;

    let (fills, orders, ()) = tokio::join!(
        stream.subscribe_feed(feeds::FILLS),
        stream.subscribe_feed(feeds::OPEN_ORDERS),
        async {
            conn.recv_matching(|v| is_event(v, "challenge")).await;
            conn.send_json(json!({"event": "challenge", "message": "nonce-1"}))
                .await;

            let mut feeds_seen = BTreeSet::new();
            while feeds_seen.len() < 2 {
                let frame = conn.recv_json().await;
                assert_ne!(frame["event"], "challenge", "challenge requested twice");
                assert_eq!(frame["signed_challenge"], SIGNED_NONCE_1);
                feeds_seen.insert(frame["feed"].as_str().unwrap().to_string());
            }
            assert_eq!(
                feeds_seen.into_iter().collect::<Vec<_>>(),
                vec!["fills", "open_orders"]
            );
        },
    );
    fills.unwrap();
    orders.unwrap();

    stream.close().await.unwrap();
}

#[tokio::test]
async fn private_subscribe_without_credentials_fails_immediately() {
    // Nothing listens here and the first attempt waits an hour.
    let client = FuturesWsClient::builder()
        .url("ws://127.0.0.1:9")
        .config(
            WsConfig::builder()
                .backoff(BackoffPolicy::with_unit(Duration::from_secs(3600)))
                .build(),
        )
        .build();
    let mut stream = client.connect();

    let err = tokio::time::timeout(WAIT, stream.subscribe_feed(feeds::FILLS))
        .await
        .expect("private subscribe waited for a connection")
        .unwrap_err();
    assert!(matches!(err, KrakenError::MissingCredentials));

    let err = stream
        .subscribe("candles_1m", vec!["PI_XBTUSD"])
        .await
        .unwrap_err();
    assert!(matches!(err, KrakenError::UnknownFeed(_)));

    assert!(stream.current_subscriptions().is_empty());
    stream.close().await.unwrap();
}

#[tokio::test]
async fn replay_after_reconnect_resends_every_subscription_once() {
    let mut server = MockServer::start().await;
    let mut stream = private_client(&server.url).connect();

    let mut first = server.next_connection().await;
    first.info().await;
    wait_for_info(&mut stream).await;

    let (sent, ()) = tokio::join!(
        async {
            stream.subscribe(feeds::TICKER, vec!["PI_XBTUSD"]).await?;
            stream.subscribe_feed(feeds::FILLS).await
        },
        async {
            first.recv_matching(|v| is_event(v, "challenge")).await;
            first
                .send_json(json!({"event": "challenge", "message": "nonce-1"}))
                .await;
            first.recv_matching(|v| is_subscribe(v, feeds::FILLS)).await;
        },
    );
    sent.unwrap();
    assert_eq!(
        stream.current_subscriptions(),
        vec![
            Subscription::public("ticker", ["PI_XBTUSD"]),
            Subscription::private("fills", Vec::<String>::new()),
        ]
    );

    first.close().await;

    let mut second = server.next_connection().await;
    assert_eq!(
        second.recv_json().await,
        json!({"event": "subscribe", "feed": "ticker", "product_ids": ["PI_XBTUSD"]})
    );
    assert_eq!(
        second.recv_json().await,
        json!({"event": "challenge", "api_key": API_KEY})
    );
    second
        .send_json(json!({"event": "challenge", "message": "nonce-2"}))
        .await;
    assert_eq!(
        second.recv_json().await,
        json!({
            "event": "subscribe",
            "feed": "fills",
            "api_key": API_KEY,
            "original_challenge": "nonce-2",
            "signed_challenge": SIGNED_NONCE_2
        })
    );
    second.expect_silence(QUIET).await;

    assert_eq!(stream.state(), ConnectionState::Open);
    assert_eq!(stream.current_subscriptions().len(), 2);
    stream.close().await.unwrap();
}

#[tokio::test]
async fn subscribe_while_connecting_is_sent_once() {
    let mut server = MockServer::start().await;
    let mut stream = public_client(&server.url).connect();

    // Both the application and the replay race for the opening socket.
    stream
        .subscribe(feeds::TICKER, vec!["PI_XBTUSD"])
        .await
        .unwrap();

    let mut conn = server.next_connection().await;
    assert_eq!(
        conn.recv_json().await,
        json!({"event": "subscribe", "feed": "ticker", "product_ids": ["PI_XBTUSD"]})
    );
    conn.expect_silence(QUIET).await;

    assert_eq!(
        stream.current_subscriptions(),
        vec![Subscription::public("ticker", ["PI_XBTUSD"])]
    );
    stream.close().await.unwrap();
}

#[tokio::test]
async fn private_subscribe_while_connecting_is_sent_once() {
    let mut server = MockServer::start().await;
    let mut stream = private_client(&server.url).connect();

    let (sent, ()) = tokio::join!(stream.subscribe_feed(feeds::FILLS), async {
        let mut conn = server.next_connection().await;
        assert_eq!(
            conn.recv_json().await,
            json!({"event": "challenge", "api_key": API_KEY})
        );
        conn.send_json(json!({"event": "challenge", "message": "nonce-1"}))
            .await;
        let frame = conn.recv_json().await;
        assert!(is_subscribe(&frame, feeds::FILLS));
        assert_eq!(frame["signed_challenge"], SIGNED_NONCE_1);
        conn.expect_silence(QUIET).await;
    });
    sent.unwrap();

    stream.close().await.unwrap();
}

#[tokio::test]
async fn resubscribe_after_unsubscribe_is_sent_again() {
    let mut server = MockServer::start().await;
    let mut stream = public_client(&server.url).connect();

    let mut conn = server.next_connection().await;
    conn.info().await;
    wait_for_info(&mut stream).await;

    stream
        .subscribe(feeds::TICKER, vec!["PI_XBTUSD"])
        .await
        .unwrap();
    assert!(is_subscribe(&conn.recv_json().await, feeds::TICKER));

    stream
        .unsubscribe(feeds::TICKER, vec!["PI_XBTUSD"])
        .await
        .unwrap();
    assert_eq!(conn.recv_json().await["event"], "unsubscribe");

    stream
        .subscribe(feeds::TICKER, vec!["PI_XBTUSD"])
        .await
        .unwrap();
    assert!(is_subscribe(&conn.recv_json().await, feeds::TICKER));

    stream.close().await.unwrap();
}

#[tokio::test]
async fn idle_socket_stays_open_past_the_frame_wait() {
    let mut server = MockServer::start().await;
    let config = WsConfig::builder()
        .backoff(BackoffPolicy::with_unit(Duration::from_millis(10)))
        .recv_timeout(Duration::from_millis(50))
        .build();
    let mut stream = FuturesWsClient::builder()
        .url(&server.url)
        .config(config)
        .build()
        .connect();

    let mut conn = server.next_connection().await;
    // Several frame waits elapse with nothing received.
    tokio::time::sleep(Duration::from_millis(500)).await;
    conn.info().await;
    wait_for_info(&mut stream).await;

    assert_eq!(server.accepted(), 1);
    assert_eq!(stream.state(), ConnectionState::Open);
    stream.close().await.unwrap();
}

#[tokio::test]
async fn unanswered_ping_reconnects() {
    let mut server = MockServer::start().await;
    let config = WsConfig::builder()
        .backoff(BackoffPolicy::with_unit(Duration::from_millis(10)))
        .ping_interval(Duration::from_millis(50))
        .pong_timeout(Duration::from_millis(100))
        .build();
    let mut stream = FuturesWsClient::builder()
        .url(&server.url)
        .config(config)
        .build()
        .connect();

    // Never read from the first socket, so its pings go unanswered.
    let _first = server.next_connection().await;
    let _second = server.next_connection().await;
    assert!(server.accepted() >= 2);

    stream.close().await.unwrap();
}

#[tokio::test]
async fn exhausted_reconnects_emit_one_notice_and_stop() {
    let mut server = MockServer::with_handshake_limit(1).await;
    let mut stream = public_client(&server.url).connect();

    let mut conn = server.next_connection().await;
    conn.close().await;

    assert_eq!(
        terminal_notice(&mut stream).await,
        TerminalReason::MaxReconnectExceeded
    );
    assert!(next_event(&mut stream).await.is_none());
    assert!(stream.has_failed());
    assert_eq!(stream.state(), ConnectionState::Failed);

    let attempts = server.accepted();
    assert_eq!(attempts, 2);
    tokio::time::sleep(QUIET).await;
    assert_eq!(server.accepted(), attempts);

    let err = stream
        .subscribe(feeds::TICKER, vec!["PI_XBTUSD"])
        .await
        .unwrap_err();
    assert!(matches!(err, KrakenError::ConnectionClosed { .. }));
}

#[tokio::test]
async fn close_emits_cancelled_notice() {
    let mut server = MockServer::start().await;
    let mut stream = public_client(&server.url).connect();

    let mut conn = server.next_connection().await;
    conn.info().await;
    wait_for_info(&mut stream).await;

    stream.close().await.unwrap();

    assert_eq!(terminal_notice(&mut stream).await, TerminalReason::Cancelled);
    assert!(next_event(&mut stream).await.is_none());
    assert_eq!(stream.state(), ConnectionState::Disconnected);
    assert!(!stream.has_failed());

    // The server sees the Close frame.
    let remaining = tokio::time::timeout(WAIT, conn.next_text())
        .await
        .expect("socket left open");
    assert!(remaining.is_none());
}

#[tokio::test]
async fn cancellation_token_stops_the_stream() {
    let mut server = MockServer::start().await;
    let mut stream = public_client(&server.url).connect();
    let _conn = server.next_connection().await;

    stream.cancellation_token().cancel();

    assert_eq!(terminal_notice(&mut stream).await, TerminalReason::Cancelled);
    assert!(next_event(&mut stream).await.is_none());
}

#[tokio::test]
async fn dropping_the_stream_closes_the_socket() {
    let mut server = MockServer::start().await;
    let stream = public_client(&server.url).connect();
    let mut conn = server.next_connection().await;

    drop(stream);

    let remaining = tokio::time::timeout(WAIT, conn.next_text())
        .await
        .expect("socket left open");
    assert!(remaining.is_none());
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let mut server = MockServer::start().await;
    let mut stream = public_client(&server.url).connect();
    let mut conn = server.next_connection().await;

    conn.send_raw(Message::text("not json")).await;
    conn.send_raw(Message::binary(vec![0xff, 0xfe, 0xfd])).await;
    // Unrequested challenge without credentials: consumed, never delivered.
    conn.send_json(json!({"event": "challenge", "message": "nonce-1"}))
        .await;
    conn.send_raw(Message::binary(br#"{"feed":"heartbeat","time":1}"#.to_vec()))
        .await;
    conn.info().await;

    match next_event(&mut stream).await {
        Some(FuturesWsEvent::Message(msg)) => assert_eq!(msg["feed"], "heartbeat"),
        other => panic!("unexpected {other:?}"),
    }
    match next_event(&mut stream).await {
        Some(FuturesWsEvent::Message(msg)) => assert_eq!(msg["event"], "info"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(stream.state(), ConnectionState::Open);

    stream.close().await.unwrap();
}

#[tokio::test]
async fn unknown_feed_ack_is_delivered_but_not_recorded() {
    let mut server = MockServer::start().await;
    let mut stream = public_client(&server.url).connect();
    let mut conn = server.next_connection().await;

    conn.send_json(json!({"event": "subscribed", "feed": "candles_1m", "product_ids": "PI_XBTUSD"}))
        .await;

    match next_event(&mut stream).await {
        Some(FuturesWsEvent::Subscribed(ack)) => {
            assert_eq!(ack.feed, "candles_1m");
            assert_eq!(ack.product_ids, vec!["PI_XBTUSD"]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(stream.current_subscriptions().is_empty());

    stream.close().await.unwrap();
}
