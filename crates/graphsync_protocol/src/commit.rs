//! Versioned commits.

use crate::gid::Gid;
use crate::value::Changes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A set of commits keyed by the gid of the entity they apply to.
pub type CommitSet = BTreeMap<Gid, Commit>;

/// A versioned, prioritized bundle of field-level changes for one entity.
///
/// # Fields
///
/// - `uuid`: unique per commit, used for idempotent deduplication
/// - `sync_id`: identifies the originating replica
/// - `version`: per-entity version the commit was produced or merged at
/// - `priority`: tie-break for conflicting changes at equal versions
/// - `changes`: field name → new value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Unique commit ID.
    pub uuid: Uuid,
    /// Originating replica.
    #[serde(rename = "syncID")]
    pub sync_id: String,
    /// Entity version.
    pub version: u64,
    /// Conflict priority.
    pub priority: i64,
    /// Field changes.
    #[serde(default)]
    pub changes: Changes,
}

impl Commit {
    /// Creates a commit without changes and a fresh uuid.
    pub fn new(sync_id: impl Into<String>, version: u64, priority: i64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            sync_id: sync_id.into(),
            version,
            priority,
            changes: Changes::new(),
        }
    }

    /// Sets the changes (builder style).
    #[must_use]
    pub fn with_changes(mut self, changes: Changes) -> Self {
        self.changes = changes;
        self
    }

    /// Returns true if the commit carries no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
