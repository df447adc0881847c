//! HMAC-SHA512 signing of Kraken Futures WebSocket challenges.
//!
//! Private feeds require proof of key ownership computed over the nonce the
//! server issued for the current connection:
//! ```text
//! base64(HMAC-SHA512(SHA256(challenge), base64_decode(api_secret)))
//! ```
//!
//! This is the same HMAC-over-digest construction Kraken uses for REST
//! request authentication, applied to the challenge instead of request data.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

use crate::auth::Credentials;
use crate::error::KrakenError;

type HmacSha512 = Hmac<Sha512>;

/// Sign a WebSocket challenge for authentication.
///
/// # Arguments
///
/// * `credentials` - API credentials containing the secret
/// * `challenge` - The challenge string received from the server
///
/// # Returns
///
/// Base64-encoded signed challenge.
///
/// # Example
///
/// ```rust
/// use kraken_futures_stream::auth::{Credentials, sign_challenge};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let credentials = Credentials::new("api_key", "YXBpX3NlY3JldA=="); // base64 of "api_secret"
/// let signed = sign_challenge(&credentials, "c100b894-1729-464d-ace1-52dbce11db42")?;
/// assert_eq!(signed.len(), 88);
/// # Ok(())
/// # }
/// ```
pub fn sign_challenge(credentials: &Credentials, challenge: &str) -> Result<String, KrakenError> {
    // Decode the API secret from base64.
    let secret_decoded = BASE64
        .decode(credentials.expose_secret())
        .map_err(|_| KrakenError::Auth("API secret must be valid base64.".to_string()))?;

    let sha256_hash = Sha256::digest(challenge.as_bytes());

    let mut hmac = HmacSha512::new_from_slice(&secret_decoded)
        .map_err(|e| KrakenError::Auth(format!("Invalid HMAC key: {e}")))?;
    hmac.update(&sha256_hash);
    let hmac_result = hmac.finalize().into_bytes();

    Ok(BASE64.encode(hmac_result))
}
