//! Error taxonomy for the messaging-agent runtime.
//!
//! These are abstract failure kinds, not a one-to-one mirror of every call
//! site's failure mode. The Channel API facade (`channel_api.rs`) never lets
//! any of these escape across its own boundary — operations there return
//! typed outcome values instead.

use thiserror::Error;

/// Transport-level failure: socket/DNS/timeout, or a 2xx-less HTTP reply
/// with no usable body.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("udp io error: {0}")]
    Udp(#[from] std::io::Error),
    #[error("request timed out")]
    Timeout,
    #[error("local throttle tripped, retry after backoff")]
    Throttled,
}

/// Service replied 2xx with `status:"error"`, or the body didn't parse.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed response body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("server reported error: {0}")]
    ServerError(String),
}

/// Developer key or session rejected by the service.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session rejected: {0}")]
    SessionRejected(String),
    #[error("developer key rejected")]
    KeyRejected,
}

/// Channel or session no longer exists server-side.
#[derive(Debug, Error)]
#[error("not found: {0}")]
pub struct NotFoundError(pub String);

/// Missing required input at the API boundary (e.g. `connect` called with
/// neither `channel_id` nor a channel name+password pair).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Operation was aborted by `disconnect`/host cancellation rather than
/// failing on its own terms.
#[derive(Debug, Error)]
#[error("operation cancelled")]
pub struct CancelledError;

/// Top-level error returned by fallible Session/Channel operations that
/// aren't hidden behind a bool/empty-result facade (connect, persistence).
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Crypto(#[from] msg_crypto::CryptoError),
    #[error("rate limited, retry after backoff")]
    RateLimited,
    #[error(transparent)]
    Cancelled(#[from] CancelledError),
    #[error("persistence error: {0}")]
    Persistence(String),
}
