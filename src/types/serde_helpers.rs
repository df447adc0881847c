//! Custom serde helpers for Kraken's quirky serialization formats.
//!
//! Kraken's WebSocket feeds are not always consistent about field shapes.
//! These modules provide reusable serde helpers.

use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::Deserializer;

/// Deserialize a field that is either a single string or a list of strings.
///
/// Acknowledgements echo `product_ids` back either as `"PI_XBTUSD"` or as
/// `["PI_XBTUSD", "PI_ETHUSD"]`. Missing or `null` yields an empty list.
///
/// # Example
///
/// ```rust
/// use serde::Deserialize;
/// use kraken_futures_stream::types::serde_helpers::one_or_many;
///
/// #[derive(Deserialize, Debug)]
/// struct Ack {
///     #[serde(deserialize_with = "one_or_many::deserialize", default)]
///     product_ids: Vec<String>,
/// }
///
/// let ack: Ack = serde_json::from_str(r#"{"product_ids":"PI_XBTUSD"}"#).unwrap();
/// assert_eq!(ack.product_ids, vec!["PI_XBTUSD"]);
///
/// let ack: Ack = serde_json::from_str(r#"{"product_ids":["PI_XBTUSD","PI_ETHUSD"]}"#).unwrap();
/// assert_eq!(ack.product_ids.len(), 2);
/// ```
pub mod one_or_many {
    use super::*;

    /// Deserialize a string or a sequence of strings into a `Vec<String>`.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OneOrManyVisitor;

        impl<'de> Visitor<'de> for OneOrManyVisitor {
            type Value = Vec<String>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or a list of strings")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(vec![v.to_string()])
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(vec![v])
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(item) = seq.next_element::<String>()? {
                    items.push(item);
                }
                Ok(items)
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Vec::new())
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Vec::new())
            }
        }

        deserializer.deserialize_any(OneOrManyVisitor)
    }
}
