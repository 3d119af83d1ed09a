//! # GraphSync Engine
//!
//! Commit-based synchronization of observable entity graphs.
//!
//! This crate provides:
//! - `Watcher`, which records one entity's changes and merges remote commits
//!   into it
//! - `Synchronizer`, which batches watchers into commit sets and routes
//!   incoming ones
//! - Override-on-conflict resolution with version and priority tie-breaks
//! - Bounded commit history for deduplication and staleness detection
//! - Throttled auto-commit on a tokio runtime
//! - `SyncClient` and the `MessageSink` transport abstraction
//!
//! ## Architecture
//!
//! Replicas exchange **commits**: versioned change sets for one entity.
//! Each replica commits its own changes locally and merges the commits of
//! its peers; a relay server merges what clients push and broadcasts the
//! effective result.
//!
//! ## Key Invariants
//!
//! - Commits and merges never lower a watcher's version; only applying a
//!   full state adopts the sender's version as is
//! - A commit is applied at most once per watcher
//! - Merging never records the merged changes as local changes
//! - Given the same history, conflict resolution is deterministic
//! - Commits older than the retained history are rejected, never guessed at

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
pub mod conflict;
mod error;
mod history;
mod policy;
mod synchronizer;
mod throttle;
mod transport;
mod watcher;

pub use client::SyncClient;
pub use config::{ClientConfig, SyncConfig, DEFAULT_AUTO_COMMIT, DEFAULT_HISTORY_LENGTH};
pub use conflict::{FieldConflict, Precedent, Resolution};
pub use error::{SyncError, SyncResult};
pub use history::History;
pub use policy::{AllowAll, SyncPolicy};
pub use synchronizer::Synchronizer;
pub use transport::{MessageSink, MockSink};
pub use watcher::{IncomingEntities, Watcher, WatcherChanged, WatcherOptions};

// Handles are shared with tokio tasks and across threads.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Watcher>();
    assert_send_sync::<Synchronizer>();
    assert_send_sync::<SyncClient>();
    assert_send_sync::<MockSink>();
};
