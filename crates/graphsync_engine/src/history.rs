//! Bounded per-entity commit history.

use graphsync_protocol::{Commit, Uuid};
use std::collections::{HashSet, VecDeque};

/// Recent commits of one entity, oldest first.
///
/// The history serves two purposes:
/// - Deduplication: a commit whose uuid is retained is not applied again
/// - Conflict detection: retained commits at or above an incoming commit's
///   version override the fields they touched
///
/// # Invariants
///
/// - Entries are kept in insertion order
/// - At most `max_length` entries are retained; the oldest are evicted first
/// - The uuid index holds exactly the retained entries
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<Commit>,
    by_uuid: HashSet<Uuid>,
    max_length: usize,
}

impl History {
    /// Creates an empty history retaining at most `max_length` commits
    /// (at least one).
    pub fn new(max_length: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            by_uuid: HashSet::new(),
            max_length: max_length.max(1),
        }
    }

    /// Appends a commit, evicting the oldest entries beyond the bound.
    ///
    /// Returns the number of evicted entries.
    pub fn push(&mut self, commit: Commit) -> usize {
        self.by_uuid.insert(commit.uuid);
        self.entries.push_back(commit);

        let mut evicted = 0;
        while self.entries.len() > self.max_length {
            if let Some(oldest) = self.entries.pop_front() {
                self.by_uuid.remove(&oldest.uuid);
                evicted += 1;
            }
        }
        evicted
    }

    /// Returns true if a commit with this uuid is retained.
    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.by_uuid.contains(uuid)
    }

    /// Version of the oldest retained commit, or 0 when empty.
    ///
    /// Commits based on an older version can no longer be checked for
    /// conflicts.
    pub fn min_version(&self) -> u64 {
        self.entries.front().map_or(0, |commit| commit.version)
    }

    /// Returns the most recent commit.
    pub fn last(&self) -> Option<&Commit> {
        self.entries.back()
    }

    /// Iterates over retained commits, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Commit> {
        self.entries.iter()
    }

    /// Returns the retained commits, oldest first.
    pub fn to_vec(&self) -> Vec<Commit> {
        self.entries.iter().cloned().collect()
    }

    /// Returns the number of retained commits.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the retention bound.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}
