use std::sync::Arc;

use thiserror::Error;

/// Represents a result type for operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while queueing, persisting or delivering hits.
///
/// In production, most of these can be logged and ignored: background synchronization keeps hits
/// queued until they are delivered, and allocation lookups fall back to defaults. The errors are
/// still valuable for debugging and usually indicate that developer's attention is needed.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The durable record store failed. The operation had no effect.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Visitor identity or context document was rejected. Prior state is retained.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Network error (connection failure, timeout).
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// The collector answered with a status code that asks for a retry: 5xx, 408 (request
    /// timeout) or 429 (throttled).
    #[error("server responded with status {0}")]
    ServerError(u16),

    /// A batch kept failing with a recoverable error. Its hits remain queued.
    #[error("delivery failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of delivery attempts made.
        attempts: u32,
        /// The error returned by the last attempt.
        last: Box<Error>,
    },

    /// The collector rejected a batch as malformed. The batch is discarded.
    #[error("batch rejected as undeliverable with status {status}")]
    PermanentDelivery {
        /// HTTP status code returned by the collector.
        status: u16,
    },

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// Hit data could not be serialized into a payload.
    #[error("failed to serialize hit payload")]
    Payload(#[source] Arc<serde_json::Error>),

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Indicates that the synchronizer thread panicked. This should normally never happen.
    #[error("synchronizer thread panicked")]
    SynchronizerThreadPanicked,
}

impl Error {
    /// Whether the failure is transient and the same batch may succeed later.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Io(_) | Error::ServerError(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Error::Store(value.into())
    }
}

/// Failure of the durable record store.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum StoreError {
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(Arc<rusqlite::Error>),

    /// A persisted row could not be decoded.
    #[error("corrupted record: {0}")]
    Corrupted(String),

    /// A hit payload was written by a newer version of the format.
    #[error("unsupported payload version {0}")]
    UnsupportedPayloadVersion(u32),

    /// A thread panicked while holding the store lock.
    #[error("store lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        StoreError::Sqlite(Arc::new(value))
    }
}

/// Rejected visitor identity input.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum IdentityError {
    /// Visitor ids must not be empty.
    #[error("visitor id must not be empty")]
    EmptyVisitorId,

    /// The visitor context document is not a JSON object of primitive values.
    #[error("invalid visitor context: {0}")]
    InvalidContext(String),
}
