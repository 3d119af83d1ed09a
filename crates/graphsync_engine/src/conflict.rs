//! Override-on-conflict resolution.
//!
//! Every change a replica has committed (or still holds pending) protects the
//! fields it touched against incoming commits that were produced without
//! knowledge of it. An incoming commit at version `v` loses a field to a
//! local entry at version `l` when
//!
//! ```text
//! l + advantage > v        advantage = 1 if local priority > incoming priority, else 0
//! ```
//!
//! So a strictly newer local entry always wins, and at equal versions the
//! replica with the higher priority wins. Incoming changes to fields no
//! local entry protects are accepted as-is.

use graphsync_protocol::{Changes, Commit};

/// A local entry that may override incoming changes.
#[derive(Debug, Clone, Copy)]
pub struct Precedent<'a> {
    /// Version of the entry.
    pub version: u64,
    /// Fields the entry changed.
    pub fields: &'a [String],
}

/// A field dropped from an incoming commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldConflict {
    /// Field name.
    pub field: String,
    /// Version of the local entry that won.
    pub local_version: u64,
    /// Version of the incoming commit.
    pub incoming_version: u64,
}

/// Result of resolving an incoming commit against local entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Incoming changes that survived.
    pub changes: Changes,
    /// Fields that were overridden.
    pub conflicts: Vec<FieldConflict>,
}

impl Resolution {
    /// Returns true if any incoming change was dropped.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Version advantage a local entry has over an incoming commit.
pub fn priority_advantage(local_priority: i64, incoming_priority: i64) -> u64 {
    u64::from(local_priority > incoming_priority)
}

/// Returns true if a local entry at `local_version` overrides an incoming
/// commit at `incoming_version`.
pub fn overrides(local_version: u64, advantage: u64, incoming_version: u64) -> bool {
    local_version.saturating_add(advantage) > incoming_version
}

/// Removes from `incoming` every change overridden by one of `precedents`.
pub fn resolve<'a, I>(incoming: &Commit, local_priority: i64, precedents: I) -> Resolution
where
    I: IntoIterator<Item = Precedent<'a>>,
{
    let advantage = priority_advantage(local_priority, incoming.priority);
    let mut changes = incoming.changes.clone();
    let mut conflicts = Vec::new();

    for precedent in precedents {
        if !overrides(precedent.version, advantage, incoming.version) {
            continue;
        }
        for field in precedent.fields {
            if changes.remove(field).is_some() {
                conflicts.push(FieldConflict {
                    field: field.clone(),
                    local_version: precedent.version,
                    incoming_version: incoming.version,
                });
            }
        }
    }

    Resolution { changes, conflicts }
}
