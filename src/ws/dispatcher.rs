//! Delivery of inbound events to the application.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::KrakenError;
use crate::ws::messages::SubscriptionAck;

/// Events yielded by a [`FuturesStream`](crate::ws::FuturesStream).
#[derive(Debug, Clone)]
pub enum FuturesWsEvent {
    /// The server confirmed a subscription.
    Subscribed(SubscriptionAck),
    /// The server confirmed an unsubscription.
    Unsubscribed(SubscriptionAck),
    /// Feed data, info and server-side error messages, exactly as received.
    Message(Value),
    /// The connection manager stopped; always the last event.
    Error(ErrorNotice),
}

impl FuturesWsEvent {
    /// Whether this is the terminal [`FuturesWsEvent::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self, FuturesWsEvent::Error(_))
    }

    /// The event as the JSON object it was delivered in.
    ///
    /// Acknowledgements and messages are returned unmodified; the terminal
    /// notice becomes `{"error": <reason>, "detail": <text>}`.
    pub fn into_json(self) -> Value {
        match self {
            FuturesWsEvent::Subscribed(ack) | FuturesWsEvent::Unsubscribed(ack) => ack.raw,
            FuturesWsEvent::Message(value) => value,
            FuturesWsEvent::Error(notice) => notice.to_json(),
        }
    }
}

/// Why the connection manager stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// Reconnect attempts hit the configured maximum.
    MaxReconnectExceeded,
    /// The application closed the stream.
    Cancelled,
}

/// Terminal failure notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorNotice {
    /// Machine-readable reason.
    pub error: TerminalReason,
    /// Human-readable description.
    pub detail: String,
}

impl ErrorNotice {
    /// Build a notice from the error that stopped the manager.
    pub fn from_error(error: &KrakenError) -> Self {
        let reason = match error {
            KrakenError::Cancelled => TerminalReason::Cancelled,
            _ => TerminalReason::MaxReconnectExceeded,
        };
        Self {
            error: reason,
            detail: error.to_string(),
        }
    }

    /// The notice as a JSON object.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "error": self.error,
            "detail": self.detail,
        })
    }
}

/// Sending half of the event stream.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    sender: mpsc::UnboundedSender<FuturesWsEvent>,
}

impl Dispatcher {
    pub(crate) fn new(sender: mpsc::UnboundedSender<FuturesWsEvent>) -> Self {
        Self { sender }
    }

    /// Deliver an event, in arrival order.
    pub(crate) fn deliver(&self, event: FuturesWsEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Event stream dropped, discarding event");
        }
    }

    /// Deliver the terminal notice and end the stream.
    ///
    /// Consumes the dispatcher, so no event can follow the notice.
    pub(crate) fn terminate(self, notice: ErrorNotice) {
        tracing::info!("Connection manager stopped: {}", notice.detail);
        self.deliver(FuturesWsEvent::Error(notice));
    }
}
