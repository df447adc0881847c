//! Common types used across the Kraken Futures streaming client.

pub mod serde_helpers;
