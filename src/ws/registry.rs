//! Registry of the subscriptions the application wants to keep alive.

use crate::ws::catalog::FeedCatalog;
use crate::ws::messages::SubscriptionAck;

/// Whether a feed needs the authenticated send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Market data available to anyone.
    Public,
    /// Account data, requires a signed challenge.
    Private,
}

impl Visibility {
    /// Whether this is [`Visibility::Private`].
    pub fn is_private(self) -> bool {
        self == Visibility::Private
    }
}

/// A desired feed subscription.
///
/// Equality is structural over all three fields; the registry never holds
/// two equal entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    /// Feed name.
    pub feed: String,
    /// Product scope, in the order given. Empty means the whole feed.
    pub product_ids: Vec<String>,
    /// Send path for this feed.
    pub visibility: Visibility,
}

impl Subscription {
    /// Create a subscription.
    pub fn new<I, S>(feed: impl Into<String>, product_ids: I, visibility: Visibility) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            feed: feed.into(),
            product_ids: product_ids.into_iter().map(Into::into).collect(),
            visibility,
        }
    }

    /// Create a public subscription.
    pub fn public<I, S>(feed: impl Into<String>, product_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(feed, product_ids, Visibility::Public)
    }

    /// Create a private subscription.
    pub fn private<I, S>(feed: impl Into<String>, product_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(feed, product_ids, Visibility::Private)
    }

    /// Build the subscription a server acknowledgement refers to.
    ///
    /// Returns `None` when the acknowledged feed is in neither catalog.
    pub fn from_ack(ack: &SubscriptionAck, catalog: &dyn FeedCatalog) -> Option<Self> {
        let visibility = catalog.visibility(&ack.feed)?;
        Some(Self {
            feed: ack.feed.clone(),
            product_ids: ack.product_ids.clone(),
            visibility,
        })
    }

    /// Whether this subscription needs the authenticated send path.
    pub fn is_private(&self) -> bool {
        self.visibility.is_private()
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.product_ids.is_empty() {
            write!(f, "{}", self.feed)
        } else {
            write!(f, "{}:{}", self.feed, self.product_ids.join(","))
        }
    }
}

/// Ordered set of desired subscriptions.
///
/// Insertion order is kept and re-adding an entry moves it to the back, so
/// the order reflects recency. The registry survives reconnects and is the
/// source of truth for replay.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `subscription`, replacing any equal entry.
    pub fn add(&mut self, subscription: Subscription) {
        self.remove(&subscription);
        self.entries.push(subscription);
    }

    /// Remove the entry equal to `subscription`, if any.
    pub fn remove(&mut self, subscription: &Subscription) {
        self.entries.retain(|entry| entry != subscription);
    }

    /// Whether an entry equal to `subscription` is registered.
    pub fn contains(&self, subscription: &Subscription) -> bool {
        self.entries.contains(subscription)
    }

    /// Iterate over the entries in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    /// Copy of the entries in registry order.
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.entries.clone()
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
