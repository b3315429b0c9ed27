use thiserror::Error;

use crate::models::EntityId;

/// Everything that can go wrong between the local store, the remote store and the
/// replay engine.
///
/// Variants only carry strings so errors can be cloned into events and replayed by
/// test doubles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The durable local store could not be opened or used.
    #[error("local storage unavailable: {0}")]
    StorageUnavailable(String),
    /// The remote store could not be reached (transport failure, timeout, 5xx).
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    /// The session behind the remote channel is no longer valid.
    #[error("authorization expired: {0}")]
    AuthorizationExpired(String),
    /// The remote store refused the request (validation or conflict).
    #[error("remote rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },
    /// A temporary identifier has no server identifier in the current drain.
    #[error("no server identifier known for {0}")]
    UnresolvableReference(EntityId),
    /// A temporary identifier whose creating insert was dropped.
    #[error("{0} was never created remotely")]
    Orphaned(EntityId),
    #[error("{0} not found")]
    NotFound(String),
    #[error("malformed record: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// How the replay engine reacts to a failed queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Abort the drain and leave every remaining item queued.
    Fatal,
    /// Drop the item; retrying can never succeed.
    Permanent,
    /// Leave the item queued and move on to the next one.
    Transient,
}

impl Error {
    #[must_use]
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::AuthorizationExpired(_) => FailureClass::Fatal,
            Self::RemoteRejected { .. } | Self::Orphaned(_) | Self::Malformed(_) => {
                FailureClass::Permanent
            }
            Self::StorageUnavailable(_)
            | Self::NetworkUnavailable(_)
            | Self::UnresolvableReference(_)
            | Self::NotFound(_) => FailureClass::Transient,
        }
    }

    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_))
    }

    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::StorageUnavailable(format!("storage task failed: {err}"))
    }
}
