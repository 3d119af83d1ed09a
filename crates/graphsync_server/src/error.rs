//! Error types for the relay server.

use graphsync_engine::SyncError;
use graphsync_model::ModelError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the relay server.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServerError {
    /// Message from a client that never connected or already left.
    #[error("unknown client: {0}")]
    UnknownClient(String),

    /// Request for a session that does not exist.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// Event the receiving side does not accept.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Synchronization failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Creating a session model failed.
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

impl ServerError {
    /// Returns true if the request was at fault.
    pub fn is_client_error(&self) -> bool {
        match self {
            ServerError::UnknownClient(_)
            | ServerError::UnknownSession(_)
            | ServerError::InvalidRequest(_) => true,
            ServerError::Sync(err) => matches!(
                err,
                SyncError::OutdatedCommit { .. } | SyncError::UnexpectedMessage { .. }
            ),
            ServerError::Model(_) => false,
        }
    }

    /// Returns true if this is a server-side failure.
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}
