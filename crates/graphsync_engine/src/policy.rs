//! Application hooks deciding what gets synchronized.

use graphsync_model::Entity;

/// Decides which entities a [`Synchronizer`](crate::Synchronizer) watches
/// and synchronizes.
pub trait SyncPolicy: Send + Sync {
    /// Whether an entity added to the synced registry gets a watcher.
    fn should_register(&self, _entity: &Entity) -> bool {
        true
    }

    /// Whether commits for `entity` are exchanged with the replica
    /// identified by `sync_id` (the local id for outgoing commits, the
    /// commit's origin for incoming ones).
    fn should_sync(&self, _entity: &Entity, _sync_id: &str) -> bool {
        true
    }
}

/// Synchronizes everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SyncPolicy for AllowAll {}
