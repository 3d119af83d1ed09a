//! Configuration for synchronizers and clients.

use std::time::Duration;

/// Default number of commits kept per entity.
pub const DEFAULT_HISTORY_LENGTH: usize = 20;

/// Default auto-commit delay of relays.
pub const DEFAULT_AUTO_COMMIT: Duration = Duration::from_millis(100);

/// Configuration for a [`Synchronizer`](crate::Synchronizer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Conflict priority of this replica. Higher wins ties.
    pub priority: i64,
    /// Commits kept per entity for conflict detection (at least 1).
    pub history_length: usize,
    /// Trailing-edge throttle for automatic commits. `None` disables them.
    pub auto_commit: Option<Duration>,
    /// Follow the model's registry when created with a model.
    pub sync_registry: bool,
    /// Commit pending changes when stopping.
    pub flush_on_stop: bool,
}

impl SyncConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            priority: 0,
            history_length: DEFAULT_HISTORY_LENGTH,
            auto_commit: None,
            sync_registry: false,
            flush_on_stop: false,
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the history length.
    pub fn with_history_length(mut self, length: usize) -> Self {
        self.history_length = length.max(1);
        self
    }

    /// Enables automatic commits after `delay`.
    pub fn with_auto_commit(mut self, delay: Duration) -> Self {
        self.auto_commit = Some(delay);
        self
    }

    /// Disables automatic commits.
    pub fn without_auto_commit(mut self) -> Self {
        self.auto_commit = None;
        self
    }

    /// Sets whether the model's registry is followed.
    pub fn with_sync_registry(mut self, sync_registry: bool) -> Self {
        self.sync_registry = sync_registry;
        self
    }

    /// Sets whether pending changes are committed on stop.
    pub fn with_flush_on_stop(mut self, flush: bool) -> Self {
        self.flush_on_stop = flush;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a [`SyncClient`](crate::SyncClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Synchronizer settings.
    pub sync: SyncConfig,
}

impl ClientConfig {
    /// Creates a client configuration: priority 0, auto-commit after 100 ms,
    /// following the model's registry.
    pub fn new() -> Self {
        Self {
            sync: SyncConfig::new()
                .with_auto_commit(DEFAULT_AUTO_COMMIT)
                .with_sync_registry(true),
        }
    }

    /// Replaces the synchronizer settings.
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Sets the auto-commit delay.
    pub fn with_auto_commit(mut self, delay: Option<Duration>) -> Self {
        self.sync.auto_commit = delay;
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.sync.priority = priority;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
