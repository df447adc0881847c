//! Futures WebSocket message types.
//!
//! The Futures WebSocket API is event based:
//! - Control messages carry an `event` field (`challenge`, `subscribe`, ...)
//! - Feed data carries a `feed` field and no `event`
//! - Private requests carry a signed challenge instead of a session token

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::serde_helpers::one_or_many;
use crate::ws::registry::Subscription;

// Request Messages

/// Challenge request for authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeRequest {
    /// Event type (always "challenge").
    pub event: &'static str,
    /// API key.
    pub api_key: String,
}

impl ChallengeRequest {
    /// Create a new challenge request.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            event: "challenge",
            api_key: api_key.into(),
        }
    }
}

/// Proof of authorization attached to private requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeAuth {
    /// API key.
    pub api_key: String,
    /// Challenge issued by the server for this connection.
    pub original_challenge: String,
    /// Signed challenge (HMAC-SHA512 of SHA256 hash).
    pub signed_challenge: String,
}

/// Subscribe or unsubscribe request, public or private.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// Event type ("subscribe" or "unsubscribe").
    pub event: &'static str,
    /// Feed name.
    pub feed: String,
    /// Product IDs, omitted for whole-feed requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_ids: Option<Vec<String>>,
    /// Challenge fields, present only on private requests.
    #[serde(flatten)]
    pub auth: Option<ChallengeAuth>,
}

impl SubscriptionRequest {
    /// Create a subscribe request for `subscription`.
    pub fn subscribe(subscription: &Subscription) -> Self {
        Self::with_event("subscribe", subscription)
    }

    /// Create an unsubscribe request for `subscription`.
    pub fn unsubscribe(subscription: &Subscription) -> Self {
        Self::with_event("unsubscribe", subscription)
    }

    fn with_event(event: &'static str, subscription: &Subscription) -> Self {
        Self {
            event,
            feed: subscription.feed.clone(),
            product_ids: if subscription.product_ids.is_empty() {
                None
            } else {
                Some(subscription.product_ids.clone())
            },
            auth: None,
        }
    }

    /// Attach challenge fields, making this a private request.
    pub fn with_auth(mut self, auth: ChallengeAuth) -> Self {
        self.auth = Some(auth);
        self
    }
}

// Response Messages

/// Challenge issued by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChallengeResponse {
    /// The challenge message (UUID to sign).
    pub message: String,
}

/// Subscription or unsubscription confirmation.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionAck {
    /// Feed name.
    pub feed: String,
    /// Product IDs echoed by the server, empty for whole-feed subscriptions.
    #[serde(deserialize_with = "one_or_many::deserialize", default)]
    pub product_ids: Vec<String>,
    /// The acknowledgement exactly as received.
    #[serde(skip)]
    pub raw: Value,
}

/// An inbound message, classified by its `event` field.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Challenge for the pending authentication; consumed internally.
    Challenge(ChallengeResponse),
    /// Subscription confirmed.
    Subscribed(SubscriptionAck),
    /// Unsubscription confirmed.
    Unsubscribed(SubscriptionAck),
    /// Anything else: feed data, info, alerts and server errors.
    Data(Value),
}

#[derive(Clone, Copy)]
enum Kind {
    Challenge,
    Subscribed,
    Unsubscribed,
    Other,
}

impl InboundMessage {
    /// Parse a text frame.
    ///
    /// Fails only when the frame is not JSON; unrecognised JSON is
    /// [`InboundMessage::Data`].
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(value))
    }

    /// Classify an already decoded message.
    pub fn from_value(value: Value) -> Self {
        let kind = match value.get("event").and_then(Value::as_str) {
            Some("challenge") => Kind::Challenge,
            Some("subscribed") => Kind::Subscribed,
            Some("unsubscribed") => Kind::Unsubscribed,
            _ => Kind::Other,
        };

        match kind {
            Kind::Challenge => match value.get("message").and_then(Value::as_str) {
                Some(message) => Self::Challenge(ChallengeResponse {
                    message: message.to_owned(),
                }),
                None => Self::Data(value),
            },
            Kind::Subscribed | Kind::Unsubscribed => {
                match SubscriptionAck::deserialize(&value) {
                    Ok(mut ack) => {
                        ack.raw = value;
                        if matches!(kind, Kind::Subscribed) {
                            Self::Subscribed(ack)
                        } else {
                            Self::Unsubscribed(ack)
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Malformed subscription acknowledgement: {}", e);
                        Self::Data(value)
                    }
                }
            }
            Kind::Other => Self::Data(value),
        }
    }
}
