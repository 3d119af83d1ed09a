//! Server and hub configuration.

use graphsync_engine::{SyncConfig, DEFAULT_AUTO_COMMIT, DEFAULT_HISTORY_LENGTH};
use std::time::Duration;

/// Priority of server synchronizers: the server wins ties against clients.
pub const SERVER_PRIORITY: i64 = 1;

/// Configuration for a relay server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Conflict priority of the server's synchronizer.
    pub priority: i64,
    /// Delay before the server's own changes are committed, if any.
    pub auto_commit: Option<Duration>,
    /// Commits retained per entity.
    pub history_length: usize,
}

impl ServerConfig {
    /// Creates the default server configuration.
    pub fn new() -> Self {
        Self {
            priority: SERVER_PRIORITY,
            auto_commit: Some(DEFAULT_AUTO_COMMIT),
            history_length: DEFAULT_HISTORY_LENGTH,
        }
    }

    /// Sets the conflict priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets or disables the auto-commit delay.
    pub fn with_auto_commit(mut self, delay: Option<Duration>) -> Self {
        self.auto_commit = delay;
        self
    }

    /// Sets the history length.
    pub fn with_history_length(mut self, length: usize) -> Self {
        self.history_length = length;
        self
    }

    /// Synchronizer configuration for a server: follows the model's
    /// registry.
    pub fn sync_config(&self) -> SyncConfig {
        let config = SyncConfig::new()
            .with_priority(self.priority)
            .with_history_length(self.history_length)
            .with_sync_registry(true);
        match self.auto_commit {
            Some(delay) => config.with_auto_commit(delay),
            None => config.without_auto_commit(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a session hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Seed new sessions from the state sent by the requesting client.
    pub use_client_model: bool,
    /// Gid of each session's root entity.
    pub root_gid: String,
    /// Configuration of each session's server.
    pub server: ServerConfig,
}

impl HubConfig {
    /// Creates the default hub configuration.
    pub fn new() -> Self {
        Self {
            use_client_model: false,
            root_gid: "root".to_string(),
            server: ServerConfig::new(),
        }
    }

    /// Enables seeding sessions from client state.
    pub fn with_client_model(mut self, use_client_model: bool) -> Self {
        self.use_client_model = use_client_model;
        self
    }

    /// Sets the root gid of session models.
    pub fn with_root_gid(mut self, gid: impl Into<String>) -> Self {
        self.root_gid = gid.into();
        self
    }

    /// Sets the configuration of session servers.
    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::new()
    }
}
