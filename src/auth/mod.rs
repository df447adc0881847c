//! Authentication module for Kraken Futures private feeds.
//!
//! This module provides:
//! - Credential management with secure secret storage
//! - HMAC-SHA512 signing of server-issued WebSocket challenges

mod credentials;
mod signature;

pub use credentials::{Credentials, CredentialsProvider, EnvCredentials, StaticCredentials};
pub use signature::sign_challenge;
