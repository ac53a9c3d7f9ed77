//! Error types for the sync engine.

use stockroom_storage::StorageError;
use stockroom_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failure reported by a remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote could not be reached or failed temporarily.
    #[error("transient remote error: {0}")]
    Transient(String),

    /// The remote refused the request (constraint violation, bad data).
    #[error("remote rejected request ({status}): {message}")]
    Rejected {
        /// HTTP-style status code.
        status: u16,
        /// Error message.
        message: String,
    },
}

impl RemoteError {
    /// Returns true if repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local store failure.
    #[error("local store error: {0}")]
    Storage(#[from] StorageError),

    /// Record translation or decoding failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Remote call failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A mutation targeted a record that does not exist locally.
    #[error("{kind} record {id} not found")]
    NotFound {
        /// Entity table.
        kind: String,
        /// Entity id.
        id: String,
    },

    /// The persisted cursor could not be parsed.
    #[error("invalid sync cursor: {0}")]
    InvalidCursor(String),
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(remote) => remote.is_retryable(),
            SyncError::Storage(StorageError::Io(_)) => true,
            _ => false,
        }
    }
}
