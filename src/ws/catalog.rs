//! Feed catalogs used to route subscriptions to the public or private path.

use std::collections::HashSet;

use crate::ws::feeds;
use crate::ws::registry::Visibility;

/// Lookup of the feeds the exchange offers, split by visibility.
///
/// The connection manager has no built-in feed knowledge; it asks the
/// catalog whether a feed needs the authenticated send path.
pub trait FeedCatalog: Send + Sync {
    /// Feeds that can be subscribed without credentials.
    fn public_feeds(&self) -> &HashSet<String>;

    /// Feeds that require a signed challenge.
    fn private_feeds(&self) -> &HashSet<String>;

    /// Visibility of `feed`, or `None` when the catalog does not know it.
    ///
    /// Private membership wins if a feed is listed in both sets.
    fn visibility(&self, feed: &str) -> Option<Visibility> {
        if self.private_feeds().contains(feed) {
            Some(Visibility::Private)
        } else if self.public_feeds().contains(feed) {
            Some(Visibility::Public)
        } else {
            None
        }
    }
}

/// A fixed catalog built from two lists of feed names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFeedCatalog {
    public: HashSet<String>,
    private: HashSet<String>,
}

impl StaticFeedCatalog {
    /// Create a catalog from explicit public and private feed names.
    pub fn new<P, Q>(public: P, private: Q) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        Q: IntoIterator,
        Q::Item: Into<String>,
    {
        Self {
            public: public.into_iter().map(Into::into).collect(),
            private: private.into_iter().map(Into::into).collect(),
        }
    }

    /// The feeds offered by the Kraken Futures WebSocket API.
    pub fn kraken_futures() -> Self {
        Self::new(feeds::PUBLIC.iter().copied(), feeds::PRIVATE.iter().copied())
    }
}

impl Default for StaticFeedCatalog {
    fn default() -> Self {
        Self::kraken_futures()
    }
}

impl FeedCatalog for StaticFeedCatalog {
    fn public_feeds(&self) -> &HashSet<String> {
        &self.public
    }

    fn private_feeds(&self) -> &HashSet<String> {
        &self.private
    }
}
