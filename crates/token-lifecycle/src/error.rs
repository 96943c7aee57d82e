//! Error types for lifecycle operations

/// Errors from token lifecycle operations.
///
/// `Transient` is recoverable locally by the caller (retry later, no state
/// was changed). `ReconnectionRequired` and `Quarantined` are durable until
/// the user acts or the backoff window elapses.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("account not found: {0}")]
    NotFound(String),

    #[error("account {account_id} quarantined until {invalid_until}")]
    Quarantined {
        account_id: String,
        invalid_until: u64,
    },

    #[error("reconnection required: {0}")]
    ReconnectionRequired(String),

    #[error("transient refresh failure: {0}")]
    Transient(String),

    #[error("no refresh client configured for platform {0}")]
    UnsupportedPlatform(String),

    #[error("account store error: {0}")]
    Store(String),
}

impl From<account_store::Error> for Error {
    fn from(err: account_store::Error) -> Self {
        match err {
            account_store::Error::NotFound(msg) => Error::NotFound(msg),
            other => Error::Store(other.to_string()),
        }
    }
}

/// Result alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;
