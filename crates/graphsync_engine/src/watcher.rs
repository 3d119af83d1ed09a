//! Per-entity change tracking, commits and merges.
//!
//! A [`Watcher`] observes one entity. While started it records every
//! property and collection change as a pending change, except changes that
//! merely echo the most recent commit. [`Watcher::commit`] turns the pending
//! changes into a versioned [`Commit`]; [`Watcher::merge`] applies a remote
//! commit after removing the fields local history overrides.
//!
//! # Lock discipline
//!
//! The watcher's lock is never held while the entity is mutated or while
//! `changed` observers run, so model events raised by a merge re-enter the
//! watcher safely.

use crate::config::DEFAULT_HISTORY_LENGTH;
use crate::conflict::{self, Precedent};
use crate::error::{SyncError, SyncResult};
use crate::history::History;
use graphsync_model::{
    Entity, EntityEvent, ExportOptions, Field, Observers, RegistryEvent, Subscription,
};
use graphsync_protocol::{gids_in_changes, Commit, Gid, Value};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Fired whenever a pending change is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherChanged {
    /// Path of the change (`"*"` when seeded with the current state).
    pub path: String,
}

/// Gids of the entities a merge in progress is introducing.
///
/// Shared by the watchers of one replica: entities created while any of
/// them applies a remote commit are known to the remote, so none of the
/// watchers treats them as new.
#[derive(Debug, Clone, Default)]
pub struct IncomingEntities {
    gids: Arc<Mutex<HashSet<Gid>>>,
}

impl IncomingEntities {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a merge in progress introduces `gid`.
    pub fn contains(&self, gid: &Gid) -> bool {
        self.gids.lock().contains(gid)
    }

    /// Adds `gids`; returns the ones that were not present yet.
    fn enter(&self, gids: impl IntoIterator<Item = Gid>) -> Vec<Gid> {
        let mut current = self.gids.lock();
        gids.into_iter()
            .filter(|gid| current.insert(gid.clone()))
            .collect()
    }

    fn leave(&self, gids: &[Gid]) {
        let mut current = self.gids.lock();
        for gid in gids {
            current.remove(gid);
        }
    }
}

/// Options for a [`Watcher`].
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Sync id stamped onto commits.
    pub sync_id: String,
    /// Conflict priority.
    pub priority: i64,
    /// Commits kept for conflict detection.
    pub history_length: usize,
    /// Entities being introduced by merges, shared across the replica.
    pub incoming: IncomingEntities,
}

impl WatcherOptions {
    /// Creates options with a random sync id.
    pub fn new() -> Self {
        Self {
            sync_id: Gid::random().into_string(),
            priority: 0,
            history_length: DEFAULT_HISTORY_LENGTH,
            incoming: IncomingEntities::new(),
        }
    }

    /// Sets the sync id.
    pub fn with_sync_id(mut self, sync_id: impl Into<String>) -> Self {
        self.sync_id = sync_id.into();
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the history length.
    pub fn with_history_length(mut self, length: usize) -> Self {
        self.history_length = length;
        self
    }

    /// Shares a set of incoming entities with other watchers.
    pub fn with_incoming(mut self, incoming: IncomingEntities) -> Self {
        self.incoming = incoming;
        self
    }
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self::new()
    }
}

struct WatcherState {
    started: bool,
    active: bool,
    destroyed: bool,
    sync_id: String,
    priority: i64,
    version: u64,
    history: History,
    changes: BTreeMap<String, Field>,
    new_entities: HashSet<Gid>,
    entity_subscription: Option<Subscription>,
    registry_subscription: Option<Subscription>,
}

impl WatcherState {
    fn tracking(&self) -> bool {
        self.started && self.active && !self.destroyed
    }

    /// True if `current` equals what the last commit set at `path`.
    fn echoes_last_commit(&self, path: &str, current: &Field) -> bool {
        self.history
            .last()
            .and_then(|commit| commit.changes.get(path))
            .is_some_and(|last| current.to_value(true).is_equivalent(last))
    }

    /// New entities are exported in full, known ones as references.
    fn export_change(&self, field: &Field) -> Value {
        match field {
            Field::Scalar(scalar) => Value::Scalar(scalar.clone()),
            Field::Entity(entity) if self.new_entities.contains(entity.gid()) => {
                Value::Entity(entity.export_data(ExportOptions::deep()))
            }
            Field::Entity(entity) => Value::Ref(entity.gid().clone()),
            Field::List(items) => {
                Value::List(items.iter().map(|item| self.export_change(item)).collect())
            }
        }
    }

    fn clear_changes(&mut self) {
        self.changes.clear();
        self.new_entities.clear();
    }
}

struct WatcherInner {
    entity: Entity,
    state: Mutex<WatcherState>,
    changed: Observers<WatcherChanged>,
    incoming: IncomingEntities,
}

/// Tracks changes of one entity and exchanges them as commits.
///
/// Clones share the same watcher.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

impl Watcher {
    /// Creates a stopped watcher for `entity`.
    ///
    /// The watcher destroys itself when the entity is destroyed.
    pub fn new(entity: Entity, options: WatcherOptions) -> Self {
        let watcher = Self {
            inner: Arc::new(WatcherInner {
                entity,
                state: Mutex::new(WatcherState {
                    started: false,
                    active: true,
                    destroyed: false,
                    sync_id: options.sync_id,
                    priority: options.priority,
                    version: 0,
                    history: History::new(options.history_length),
                    changes: BTreeMap::new(),
                    new_entities: HashSet::new(),
                    entity_subscription: None,
                    registry_subscription: None,
                }),
                changed: Observers::new(),
                incoming: options.incoming,
            }),
        };

        let weak = Arc::downgrade(&watcher.inner);
        let subscription = watcher.inner.entity.subscribe(move |event| {
            if let Some(watcher) = Watcher::upgrade(&weak) {
                watcher.on_entity_event(event);
            }
        });
        watcher.inner.state.lock().entity_subscription = Some(subscription);
        watcher
    }

    fn upgrade(weak: &Weak<WatcherInner>) -> Option<Watcher> {
        weak.upgrade().map(|inner| Watcher { inner })
    }

    /// Returns the watched entity.
    pub fn entity(&self) -> &Entity {
        &self.inner.entity
    }

    /// Returns the gid of the watched entity.
    pub fn gid(&self) -> &Gid {
        self.inner.entity.gid()
    }

    /// Returns the sync id stamped onto commits.
    pub fn sync_id(&self) -> String {
        self.inner.state.lock().sync_id.clone()
    }

    /// Changes the sync id stamped onto future commits.
    pub fn set_sync_id(&self, sync_id: impl Into<String>) {
        self.inner.state.lock().sync_id = sync_id.into();
    }

    /// Returns the conflict priority.
    pub fn priority(&self) -> i64 {
        self.inner.state.lock().priority
    }

    /// Returns the current version.
    pub fn version(&self) -> u64 {
        self.inner.state.lock().version
    }

    /// Version of the oldest retained commit (0 when none).
    pub fn history_min_version(&self) -> u64 {
        self.inner.state.lock().history.min_version()
    }

    /// Returns the retained commits, oldest first.
    pub fn history(&self) -> Vec<Commit> {
        self.inner.state.lock().history.to_vec()
    }

    /// Returns the most recent commit, created or merged.
    pub fn last_commit(&self) -> Option<Commit> {
        self.inner.state.lock().history.last().cloned()
    }

    /// Returns true if there are pending changes.
    pub fn has_changes(&self) -> bool {
        !self.inner.state.lock().changes.is_empty()
    }

    /// Returns a snapshot of the pending changes.
    pub fn changes(&self) -> BTreeMap<String, Field> {
        self.inner.state.lock().changes.clone()
    }

    /// Returns true if `gid` was created locally since the last commit.
    pub fn is_new_entity(&self, gid: &Gid) -> bool {
        self.inner.state.lock().new_entities.contains(gid)
    }

    /// Returns true while the watcher records changes.
    pub fn is_started(&self) -> bool {
        self.inner.state.lock().started
    }

    /// Returns true once the watcher has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Subscribes to `changed` events.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&WatcherChanged) + Send + Sync + 'static,
    {
        self.inner.changed.subscribe(callback)
    }

    /// Starts recording changes. Idempotent.
    ///
    /// With `include_current_state`, the pending changes are seeded with
    /// every non-default field and `changed` fires.
    pub fn start(&self, include_current_state: bool) {
        let registry_subscription = self.inner.entity.registry().map(|registry| {
            let weak = Arc::downgrade(&self.inner);
            registry.subscribe(move |event| {
                if let (RegistryEvent::Added(entity), Some(watcher)) =
                    (event, Watcher::upgrade(&weak))
                {
                    watcher.on_entity_added(entity);
                }
            })
        });

        {
            let mut state = self.inner.state.lock();
            if state.started || state.destroyed {
                return;
            }
            state.started = true;
            state.active = true;
            state.registry_subscription = registry_subscription;

            if !include_current_state {
                return;
            }
            state.changes = self
                .inner
                .entity
                .field_names()
                .into_iter()
                .map(|name| {
                    let field = self.inner.entity.get(&name);
                    (name, field)
                })
                .filter(|(_, field)| !field.is_default())
                .collect();
        }

        self.inner.changed.notify(&WatcherChanged { path: "*".into() });
    }

    /// Stops recording changes. Pending changes are kept.
    pub fn stop(&self) {
        let subscription = {
            let mut state = self.inner.state.lock();
            state.started = false;
            state.registry_subscription.take()
        };
        drop(subscription);
    }

    /// Stops and detaches from the entity. A destroyed watcher cannot be
    /// restarted.
    pub fn destroy(&self) {
        let subscriptions = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.started = false;
            (
                state.registry_subscription.take(),
                state.entity_subscription.take(),
            )
        };
        drop(subscriptions);
        self.inner.changed.clear();
        debug!(gid = %self.gid(), "watcher destroyed");
    }

    /// Turns the pending changes into a commit at `version + 1`.
    ///
    /// Returns `None` without side effects when nothing is pending.
    pub fn commit(&self) -> Option<Commit> {
        let mut state = self.inner.state.lock();
        let changes = state
            .changes
            .iter()
            .map(|(path, field)| (path.clone(), state.export_change(field)))
            .collect();

        let commit = Commit::new(state.sync_id.clone(), state.version + 1, state.priority)
            .with_changes(changes);
        if commit.is_empty() {
            return None;
        }

        state.version = commit.version;
        state.history.push(commit.clone());
        state.clear_changes();
        Some(commit)
    }

    /// Merges a remote commit into the entity.
    ///
    /// Fields overridden by local history or pending changes are dropped.
    /// Returns the effective commit: the surviving changes at
    /// `max(commit.version, version)`, with the submitted priority. A commit
    /// already in history is returned unchanged.
    ///
    /// # Errors
    ///
    /// [`SyncError::OutdatedCommit`] if the commit is older than any retained
    /// history.
    pub fn merge(&self, commit: Commit) -> SyncResult<Commit> {
        let (merged, entering) = {
            let mut state = self.inner.state.lock();

            let required = state.history.min_version();
            if commit.version < required {
                return Err(SyncError::outdated(
                    self.gid().clone(),
                    commit.version,
                    required,
                ));
            }
            if state.history.contains(&commit.uuid) {
                return Ok(commit);
            }

            let entries: Vec<(u64, Vec<String>)> = state
                .history
                .iter()
                .map(|entry| (entry.version, entry.changes.keys().cloned().collect()))
                .chain(std::iter::once((
                    state.version,
                    state.changes.keys().cloned().collect(),
                )))
                .collect();
            let precedents = entries.iter().map(|(version, fields)| Precedent {
                version: *version,
                fields,
            });
            let resolution = conflict::resolve(&commit, state.priority, precedents);

            if resolution.has_conflicts() {
                let fields: Vec<&str> = resolution
                    .conflicts
                    .iter()
                    .map(|c| c.field.as_str())
                    .collect();
                warn!(
                    gid = %self.gid(),
                    incoming_version = commit.version,
                    ?fields,
                    "merge conflicts; keeping local values"
                );
            }

            state.version = state.version.max(commit.version);
            let merged = Commit {
                version: state.version,
                changes: resolution.changes,
                ..commit
            };

            let entering = self.inner.incoming.enter(gids_in_changes(&merged.changes));
            state.history.push(merged.clone());
            (merged, entering)
        };

        self.inner.entity.set_data(&merged.changes, true);
        self.inner.incoming.leave(&entering);
        Ok(merged)
    }

    /// Replaces the entity's state with a full-state commit.
    ///
    /// Changes caused by applying it are not recorded, and history is left
    /// alone; only the version is taken over.
    pub fn set_full_state(&self, commit: &Commit) {
        self.inner.state.lock().active = false;
        let entering = self.inner.incoming.enter(gids_in_changes(&commit.changes));
        self.inner.entity.set_data(&commit.changes, false);
        self.inner.incoming.leave(&entering);

        let mut state = self.inner.state.lock();
        state.active = true;
        state.version = commit.version;
    }

    /// Creates a full-state commit: a shallow export at the current version.
    pub fn create_full_state(&self) -> Commit {
        let (sync_id, version, priority) = {
            let state = self.inner.state.lock();
            (state.sync_id.clone(), state.version, state.priority)
        };
        Commit::new(sync_id, version, priority)
            .with_changes(self.inner.entity.export(ExportOptions::shallow()))
    }

    fn on_entity_event(&self, event: &EntityEvent) {
        match event {
            EntityEvent::Property(change) => {
                self.record(&change.path, change.new_value.clone(), &change.path)
            }
            EntityEvent::Collection(change) => {
                let current = self.inner.entity.get(&change.property);
                self.record(&change.property, current, &change.path);
            }
            EntityEvent::Destroyed => self.destroy(),
        }
    }

    /// Records `current` as the pending value of `field`, unless it echoes
    /// the last commit.
    fn record(&self, field: &str, current: Field, path: &str) {
        {
            let mut state = self.inner.state.lock();
            if !state.tracking() {
                return;
            }
            if state.echoes_last_commit(field, &current) {
                state.changes.remove(field);
                return;
            }
            state.changes.insert(field.to_string(), current);
        }

        self.inner.changed.notify(&WatcherChanged {
            path: path.to_string(),
        });
    }

    fn on_entity_added(&self, entity: &Entity) {
        if self.inner.incoming.contains(entity.gid()) {
            return;
        }
        let mut state = self.inner.state.lock();
        if !state.destroyed {
            state.new_entities.insert(entity.gid().clone());
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("gid", self.gid())
            .finish_non_exhaustive()
    }
}
