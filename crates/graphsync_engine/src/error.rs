//! Error types for the sync engine.

use graphsync_model::ModelError;
use graphsync_protocol::{Gid, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// A commit was based on a version older than any retained history.
    #[error(
        "commit for {gid} has a base version ({base_version}) lower than any commit kept in history ({required_version})"
    )]
    OutdatedCommit {
        /// Gid of the entity the commit targets.
        gid: Gid,
        /// Version the commit was produced at.
        base_version: u64,
        /// Oldest version still in history.
        required_version: u64,
    },

    /// Invalid configuration or wiring.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Encoding or decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The entity model rejected an operation.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Message could not be delivered; the peer is gone.
    #[error("transport error: {0}")]
    Transport(String),

    /// A relay received a message it does not handle.
    #[error("unexpected '{event}' message")]
    UnexpectedMessage {
        /// Wire event name.
        event: String,
    },

    /// Not connected.
    #[error("not connected")]
    NotConnected,
}

impl SyncError {
    /// Creates an outdated commit error.
    pub fn outdated(gid: Gid, base_version: u64, required_version: u64) -> Self {
        Self::OutdatedCommit {
            gid,
            base_version,
            required_version,
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates an unexpected message error.
    pub fn unexpected(event: impl Into<String>) -> Self {
        Self::UnexpectedMessage {
            event: event.into(),
        }
    }

    /// Returns true if the operation can succeed once the link comes back.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::NotConnected)
    }

    /// Returns true if the peer can recover by resynchronizing from a full
    /// state.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::OutdatedCommit { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(!SyncError::transport("channel closed").is_retryable());
        assert!(SyncError::NotConnected.is_retryable());
        assert!(!SyncError::configuration("twice").is_retryable());
    }

    #[test]
    fn outdated_commits_are_recoverable() {
        let err = SyncError::outdated(Gid::from("root"), 2, 7);
        assert!(err.is_recoverable());
        let text = err.to_string();
        assert!(text.contains("(2)"));
        assert!(text.contains("(7)"));
        assert!(!SyncError::NotConnected.is_recoverable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::configuration("cannot switch registry");
        assert_eq!(err.to_string(), "configuration error: cannot switch registry");

        let err: SyncError = ModelError::DuplicateGid(Gid::from("a")).into();
        assert_eq!(err.to_string(), "model error: duplicate gid: a");
    }
}
