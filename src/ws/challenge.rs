//! Challenge handshake for private feeds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::auth::{Credentials, CredentialsProvider, sign_challenge};
use crate::error::KrakenError;
use crate::ws::messages::ChallengeAuth;

/// Handshake state of one connection.
///
/// Starts empty for every new socket. `ready` turns true once the server's
/// challenge has been received and signed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeState {
    /// Challenge issued by the server.
    pub raw_challenge: Option<String>,
    /// Base64 HMAC signature of the challenge.
    pub signed_challenge: Option<String>,
    /// Whether private requests can be sent.
    pub ready: bool,
}

/// Per-connection challenge authenticator.
///
/// The challenge request goes out at most once per connection; every
/// private sender then waits on the same readiness signal.
pub(crate) struct ChallengeAuthenticator {
    credentials: Option<Arc<dyn CredentialsProvider>>,
    requested: AtomicBool,
    state: watch::Sender<ChallengeState>,
}

impl ChallengeAuthenticator {
    pub(crate) fn new(credentials: Option<Arc<dyn CredentialsProvider>>) -> Self {
        Self {
            credentials,
            requested: AtomicBool::new(false),
            state: watch::Sender::new(ChallengeState::default()),
        }
    }

    /// Credentials for private requests.
    pub(crate) fn credentials(&self) -> Result<&Credentials, KrakenError> {
        self.credentials
            .as_ref()
            .map(|provider| provider.get_credentials())
            .ok_or(KrakenError::MissingCredentials)
    }

    /// Claim the challenge request for this connection.
    ///
    /// Returns `true` for the first caller only; that caller sends the request.
    pub(crate) fn begin(&self) -> bool {
        !self.requested.swap(true, Ordering::SeqCst)
    }

    /// Current handshake state.
    pub(crate) fn state(&self) -> ChallengeState {
        self.state.borrow().clone()
    }

    /// Sign the challenge issued by the server and mark the handshake ready.
    pub(crate) fn accept(&self, challenge: &str) -> Result<(), KrakenError> {
        let signed = sign_challenge(self.credentials()?, challenge)?;
        self.state.send_replace(ChallengeState {
            raw_challenge: Some(challenge.to_string()),
            signed_challenge: Some(signed),
            ready: true,
        });
        Ok(())
    }

    /// Wait until the handshake is ready and return the fields for a private request.
    ///
    /// Fails immediately without credentials, with [`KrakenError::Auth`] when
    /// `timeout` elapses first, and with [`KrakenError::ConnectionClosed`]
    /// when the connection is abandoned first.
    pub(crate) async fn wait_ready(
        &self,
        timeout: Duration,
        closed: &CancellationToken,
    ) -> Result<ChallengeAuth, KrakenError> {
        let credentials = self.credentials()?;
        let mut receiver = self.state.subscribe();

        let state = tokio::select! {
            _ = closed.cancelled() => {
                return Err(KrakenError::ConnectionClosed {
                    reason: "connection closed before challenge was ready".into(),
                });
            }
            ready = tokio::time::timeout(timeout, receiver.wait_for(|s| s.ready)) => match ready {
                Ok(Ok(state)) => state.clone(),
                Ok(Err(_)) => {
                    return Err(KrakenError::ConnectionClosed {
                        reason: "challenge state dropped".into(),
                    });
                }
                Err(_) => {
                    return Err(KrakenError::Auth(format!(
                        "No challenge received within {timeout:?}"
                    )));
                }
            },
        };

        Ok(ChallengeAuth {
            api_key: credentials.api_key.clone(),
            original_challenge: state.raw_challenge.unwrap_or_default(),
            signed_challenge: state.signed_challenge.unwrap_or_default(),
        })
    }
}

impl std::fmt::Debug for ChallengeAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeAuthenticator")
            .field("has_credentials", &self.credentials.is_some())
            .field("requested", &self.requested.load(Ordering::SeqCst))
            .field("ready", &self.state.borrow().ready)
            .finish()
    }
}
