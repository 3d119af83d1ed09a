//! Error types for the entity model.

use graphsync_protocol::Gid;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while mutating the entity graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A collection operation was applied to a field that is not a list.
    #[error("field '{property}' of entity {gid} is not a collection")]
    NotACollection {
        /// Entity gid.
        gid: Gid,
        /// Field name.
        property: String,
    },

    /// A collection index was out of bounds.
    #[error("index {index} out of bounds for '{property}' (length {len})")]
    IndexOutOfBounds {
        /// Field name.
        property: String,
        /// Requested index.
        index: usize,
        /// Current collection length.
        len: usize,
    },

    /// An entity with this gid is already registered.
    #[error("duplicate gid: {0}")]
    DuplicateGid(Gid),

    /// The entity has been destroyed.
    #[error("entity {0} has been destroyed")]
    Destroyed(Gid),
}

impl ModelError {
    /// Returns true if the error was caused by invalid input from the caller
    /// rather than by the state of the graph.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ModelError::NotACollection { .. } | ModelError::IndexOutOfBounds { .. }
        )
    }
}
