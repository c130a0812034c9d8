use thiserror::Error;

/// Failure classes for the mining coordinator.
///
/// `Network` and `Remote` abort a single pass; the loops keep running.
/// `AuthExpired` clears the session and halts attribution until re-login.
#[derive(Debug, Error)]
pub enum MinerError {
    /// The device-code flow failed, was denied, or expired. The user has to
    /// start a new login attempt.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A previously accepted token was rejected by Twitch.
    #[error("session expired, re-login required")]
    AuthExpired,

    /// A remote operation failed for a non-auth reason.
    #[error("remote error: {0}")]
    Remote(String),

    /// A transient remote condition (service error / missing persisted query).
    /// Retried a fixed number of times before being surfaced as `Remote`.
    #[error("transient remote error: {0}")]
    RetryableRemote(String),

    /// Transport-level failure. Logged, skipped, retried next tick.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The current channel or campaign became ineligible mid-session.
    /// Triggers forced re-selection, not a user-facing error.
    #[error("no longer watchable: {0}")]
    NotWatchable(String),

    /// A response did not match the expected shape.
    #[error("response decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Start on a running coordinator, stop on a stopped one, and similar
    /// lifecycle misuse.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

impl MinerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, MinerError::RetryableRemote(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, MinerError::Auth(_) | MinerError::AuthExpired)
    }
}

pub type Result<T> = std::result::Result<T, MinerError>;
