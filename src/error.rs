//! Error types shared by every subsystem of the controller core.
//!
//! Each variant maps to one cause the device can be in `Error` or
//! `AuthRequired` for. [`Error::code`] gives a stable number that travels
//! as the int payload of error events, so the display layer never has to
//! parse messages.

use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The network did not come up within the connect timeout.
    #[error("network connection timed out")]
    ConnectivityTimeout,

    /// Automatic reconnection gave up after the configured number of attempts.
    #[error("network reconnect gave up after {attempts} attempts")]
    ConnectivityExhausted { attempts: u32 },

    /// The `state` returned on the OAuth callback did not match the one we issued.
    #[error("authorization state mismatch")]
    AuthStateMismatch,

    /// The provider redirected back with an `error` parameter.
    #[error("authorization denied by provider: {0}")]
    AuthProviderError(String),

    /// The callback carried neither an error nor an authorization code.
    #[error("authorization code missing from callback")]
    AuthMissingCode,

    #[error("token exchange failed with HTTP {status}: {body}")]
    AuthTokenExchangeFailed { status: u16, body: String },

    #[error("token endpoint returned a malformed response: {0}")]
    AuthMalformedResponse(String),

    /// Nobody completed the browser step before the auth timeout.
    #[error("authorization timed out waiting for the user")]
    AuthTimeout,

    #[error("access token refresh failed")]
    TokenRefreshFailed,

    /// No access token at all; requests fail closed.
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("API request failed with HTTP {status}: {body}")]
    ApiRequestFailed { status: u16, body: String },

    #[error("could not parse API response: {0}")]
    ApiParseFailed(String),

    /// The request never produced an HTTP status (DNS, TLS, timeout, ...).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("network driver failure: {0}")]
    NetworkDriver(String),

    #[error("credential store failure: {0}")]
    CredentialStore(String),

    #[error("invalid credentials: {0}")]
    Credentials(String),

    #[error("could not bind callback listener on port {port}: {reason}")]
    ListenerBind { port: u16, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Machine-readable cause code, carried as the int payload of error events.
    pub fn code(&self) -> i64 {
        match self {
            Self::ConnectivityTimeout => 10,
            Self::ConnectivityExhausted { .. } => 11,
            Self::NetworkDriver(_) => 12,
            Self::AuthStateMismatch => 20,
            Self::AuthProviderError(_) => 21,
            Self::AuthMissingCode => 22,
            Self::AuthTokenExchangeFailed { .. } => 23,
            Self::AuthMalformedResponse(_) => 24,
            Self::AuthTimeout => 25,
            Self::ListenerBind { .. } => 26,
            Self::TokenRefreshFailed => 30,
            Self::NotAuthenticated => 31,
            Self::ApiRequestFailed { .. } => 40,
            Self::ApiParseFailed(_) => 41,
            Self::Transport(_) => 42,
            Self::CredentialStore(_) => 50,
            Self::Credentials(_) => 51,
            Self::Config(_) => 52,
        }
    }

    /// HTTP status behind an API failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiRequestFailed { status, .. } | Self::AuthTokenExchangeFailed { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
