//! Graph-level synchronization.
//!
//! A [`Synchronizer`] owns one [`Watcher`] per registered entity. It batches
//! the watchers' commits into a [`CommitSet`], and routes incoming commit
//! sets to the watchers in an order that lets entities created by one commit
//! receive the commits addressed to them in the same batch.
//!
//! ## Key Invariants
//!
//! - At most one watcher per gid; `register` is idempotent
//! - Merged commits carry this replica's priority
//! - The synchronizer's lock is never held while watchers or observers run

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::policy::{AllowAll, SyncPolicy};
use crate::throttle::Throttle;
use crate::watcher::{IncomingEntities, Watcher, WatcherOptions};
use graphsync_model::{Entity, EntityEvent, Observers, Registry, RegistryEvent, Subscription};
use graphsync_protocol::{Commit, CommitSet, Gid};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

struct SyncState {
    id: String,
    active: bool,
    watchers: BTreeMap<Gid, Watcher>,
    new_entities: BTreeSet<Gid>,
    registrations: HashMap<Gid, Vec<Subscription>>,
    registry: Option<Registry>,
    registry_subscription: Option<Subscription>,
    model: Option<Entity>,
}

struct SyncInner {
    config: SyncConfig,
    policy: Arc<dyn SyncPolicy>,
    state: RwLock<SyncState>,
    new_commits: Observers<CommitSet>,
    throttle: Throttle,
    incoming: IncomingEntities,
}

/// Keeps a graph of entities in sync through commits.
///
/// Clones share the same synchronizer.
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<SyncInner>,
}

impl Synchronizer {
    /// Creates a stopped synchronizer with a random id.
    pub fn new(config: SyncConfig) -> Self {
        Self::with_policy(config, AllowAll)
    }

    /// Creates a stopped synchronizer with a custom policy.
    pub fn with_policy(config: SyncConfig, policy: impl SyncPolicy + 'static) -> Self {
        let throttle = Throttle::new(config.auto_commit);
        Self {
            inner: Arc::new(SyncInner {
                config,
                policy: Arc::new(policy),
                state: RwLock::new(SyncState {
                    id: Gid::random().into_string(),
                    active: false,
                    watchers: BTreeMap::new(),
                    new_entities: BTreeSet::new(),
                    registrations: HashMap::new(),
                    registry: None,
                    registry_subscription: None,
                    model: None,
                }),
                new_commits: Observers::new(),
                throttle,
                incoming: IncomingEntities::new(),
            }),
        }
    }

    /// Creates a synchronizer for a model: registers the root entity and,
    /// with `sync_registry` configured, follows the model's registry.
    pub fn with_model(model: &Entity, config: SyncConfig) -> SyncResult<Self> {
        let sync = Self::new(config);
        sync.attach_model(model)?;
        Ok(sync)
    }

    /// Like [`with_model`](Self::with_model), with a custom policy.
    pub fn with_model_and_policy(
        model: &Entity,
        config: SyncConfig,
        policy: impl SyncPolicy + 'static,
    ) -> SyncResult<Self> {
        let sync = Self::with_policy(config, policy);
        sync.attach_model(model)?;
        Ok(sync)
    }

    fn attach_model(&self, model: &Entity) -> SyncResult<()> {
        self.inner.state.write().model = Some(model.clone());
        self.register(model);
        if self.inner.config.sync_registry {
            let registry = model.registry().ok_or_else(|| {
                SyncError::configuration("model entity is not attached to a registry")
            })?;
            self.sync_registry(&registry)?;
        }
        Ok(())
    }

    fn upgrade(weak: &Weak<SyncInner>) -> Option<Synchronizer> {
        weak.upgrade().map(|inner| Synchronizer { inner })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the conflict priority stamped onto merged commits.
    pub fn priority(&self) -> i64 {
        self.inner.config.priority
    }

    /// Returns the model root, if created with one.
    pub fn model(&self) -> Option<Entity> {
        self.inner.state.read().model.clone()
    }

    /// Returns the synced registry, if any.
    pub fn registry(&self) -> Option<Registry> {
        self.inner.state.read().registry.clone()
    }

    /// Returns this replica's sync id.
    pub fn id(&self) -> String {
        self.inner.state.read().id.clone()
    }

    /// Changes the sync id, for this synchronizer and all its watchers.
    pub fn set_id(&self, id: impl Into<String>) {
        let id = id.into();
        let watchers = {
            let mut state = self.inner.state.write();
            state.id = id.clone();
            Self::collect_watchers(&state)
        };
        for watcher in watchers {
            watcher.set_sync_id(id.clone());
        }
    }

    /// Returns true while started.
    pub fn is_active(&self) -> bool {
        self.inner.state.read().active
    }

    /// Returns the watcher of `gid`.
    pub fn watcher(&self, gid: &Gid) -> Option<Watcher> {
        self.inner.state.read().watchers.get(gid).cloned()
    }

    /// Returns all watchers, ordered by gid.
    pub fn watchers(&self) -> Vec<Watcher> {
        Self::collect_watchers(&self.inner.state.read())
    }

    fn collect_watchers(state: &SyncState) -> Vec<Watcher> {
        state.watchers.values().cloned().collect()
    }

    /// Returns true if the entity is registered.
    pub fn has(&self, entity: &Entity) -> bool {
        self.inner.state.read().watchers.contains_key(entity.gid())
    }

    /// Returns true if `gid` was registered since the last commit, is not a
    /// root entity and was not introduced by a merge.
    pub fn is_new(&self, gid: &Gid) -> bool {
        self.inner.state.read().new_entities.contains(gid)
    }

    /// Subscribes to non-empty commit sets produced by [`commit`](Self::commit).
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CommitSet) + Send + Sync + 'static,
    {
        self.inner.new_commits.subscribe(callback)
    }

    /// Creates a watcher for `entity`. Registering a known gid is a no-op.
    ///
    /// The entity is unregistered automatically when destroyed. When
    /// auto-commit is configured, the watcher's changes schedule a commit.
    pub fn register(&self, entity: &Entity) {
        let gid = entity.gid().clone();
        let (watcher, active) = {
            let mut state = self.inner.state.write();
            if state.watchers.contains_key(&gid) {
                return;
            }

            let watcher = Watcher::new(
                entity.clone(),
                WatcherOptions::new()
                    .with_sync_id(state.id.clone())
                    .with_priority(self.inner.config.priority)
                    .with_history_length(self.inner.config.history_length)
                    .with_incoming(self.inner.incoming.clone()),
            );

            let weak = Arc::downgrade(&self.inner);
            let destroyed_gid = gid.clone();
            let destroyed = entity.subscribe(move |event| {
                if !matches!(event, EntityEvent::Destroyed) {
                    return;
                }
                if let Some(sync) = Self::upgrade(&weak) {
                    sync.unregister_gid(&destroyed_gid);
                }
            });
            let weak = Arc::downgrade(&self.inner);
            let changed = watcher.subscribe(move |_| {
                if let Some(sync) = Self::upgrade(&weak) {
                    sync.schedule_commit();
                }
            });

            if !entity.is_root() && !self.inner.incoming.contains(&gid) {
                state.new_entities.insert(gid.clone());
            }
            state.watchers.insert(gid.clone(), watcher.clone());
            state.registrations.insert(gid.clone(), vec![destroyed, changed]);
            (watcher, state.active)
        };

        debug!(gid = %gid, "entity registered");
        if active {
            watcher.start(false);
        }
    }

    /// Destroys the watcher of `entity`.
    pub fn unregister(&self, entity: &Entity) {
        self.unregister_gid(entity.gid());
    }

    fn unregister_gid(&self, gid: &Gid) {
        let removed = {
            let mut state = self.inner.state.write();
            state.new_entities.remove(gid);
            let subscriptions = state.registrations.remove(gid);
            state.watchers.remove(gid).map(|watcher| (watcher, subscriptions))
        };

        if let Some((watcher, subscriptions)) = removed {
            watcher.destroy();
            drop(subscriptions);
            debug!(gid = %gid, "entity unregistered");
        }
    }

    /// Follows a registry: entities added to it are registered (subject to
    /// [`SyncPolicy::should_register`]), removed ones unregistered. Entities
    /// already present are registered immediately.
    ///
    /// # Errors
    ///
    /// [`SyncError::Configuration`] if a registry is already synced.
    pub fn sync_registry(&self, registry: &Registry) -> SyncResult<()> {
        {
            let mut state = self.inner.state.write();
            if state.registry.is_some() {
                return Err(SyncError::configuration(
                    "cannot switch the registry of a synchronizer",
                ));
            }
            state.registry = Some(registry.clone());
        }

        let weak = Arc::downgrade(&self.inner);
        let subscription = registry.subscribe(move |event| {
            let Some(sync) = Self::upgrade(&weak) else {
                return;
            };
            match event {
                RegistryEvent::Added(entity) => {
                    if sync.inner.policy.should_register(entity) {
                        sync.register(entity);
                    }
                }
                RegistryEvent::Removed(entity) => sync.unregister(entity),
            }
        });
        self.inner.state.write().registry_subscription = Some(subscription);

        for entity in registry.all() {
            if self.inner.policy.should_register(&entity) {
                self.register(&entity);
            }
        }
        Ok(())
    }

    /// Starts every watcher; entities registered later start immediately.
    pub fn start(&self) {
        let watchers = {
            let mut state = self.inner.state.write();
            state.active = true;
            Self::collect_watchers(&state)
        };
        for watcher in watchers {
            watcher.start(false);
        }
        info!(id = %self.id(), "synchronizer started");
    }

    /// Stops every watcher and cancels a scheduled automatic commit. With
    /// `flush_on_stop`, pending changes are committed first.
    pub fn stop(&self) {
        if self.inner.config.flush_on_stop {
            self.commit();
        }
        self.inner.throttle.cancel();

        let watchers = {
            let mut state = self.inner.state.write();
            state.active = false;
            Self::collect_watchers(&state)
        };
        for watcher in watchers {
            watcher.stop();
        }
        info!(id = %self.id(), "synchronizer stopped");
    }

    /// Detaches from the registry and unregisters every entity, optionally
    /// destroying them.
    pub fn destroy(&self, destroy_entities: bool) {
        self.inner.throttle.cancel();
        let subscription = self.inner.state.write().registry_subscription.take();
        drop(subscription);

        for watcher in self.watchers() {
            self.unregister_gid(watcher.gid());
            if destroy_entities {
                watcher.entity().destroy();
            }
        }
        self.inner.new_commits.clear();
    }

    /// Returns true if any synced watcher has pending changes.
    pub fn has_changes(&self) -> bool {
        let id = self.id();
        self.watchers().iter().any(|watcher| {
            self.inner.policy.should_sync(watcher.entity(), &id) && watcher.has_changes()
        })
    }

    /// Commits every synced watcher with pending changes.
    ///
    /// Non-empty sets are also delivered to the observers registered with
    /// [`subscribe`](Self::subscribe).
    pub fn commit(&self) -> CommitSet {
        let id = self.id();
        let mut commits = CommitSet::new();
        for watcher in self.watchers() {
            if !self.inner.policy.should_sync(watcher.entity(), &id) {
                continue;
            }
            if let Some(commit) = watcher.commit() {
                commits.insert(watcher.gid().clone(), commit);
            }
        }
        self.inner.state.write().new_entities.clear();

        if !commits.is_empty() {
            let gids: Vec<&str> = commits.keys().map(Gid::as_str).collect();
            debug!(?gids, "committing changes");
            self.inner.new_commits.notify(&commits);
        }
        commits
    }

    /// Merges incoming commits and returns the effective ones, re-stamped
    /// with this replica's priority.
    ///
    /// # Errors
    ///
    /// The first [`SyncError::OutdatedCommit`]; commits routed before it
    /// stay merged.
    pub fn merge(&self, commits: CommitSet) -> SyncResult<CommitSet> {
        let gids: Vec<&str> = commits.keys().map(Gid::as_str).collect();
        debug!(?gids, "merging commits");

        let mut merged = CommitSet::new();
        self.route(commits, |watcher, commit| {
            if !self.inner.policy.should_sync(watcher.entity(), &commit.sync_id) {
                return Ok(());
            }
            let mut result = watcher.merge(commit)?;
            result.priority = self.priority();
            merged.insert(watcher.gid().clone(), result);
            Ok(())
        })?;
        Ok(merged)
    }

    /// Applies full-state commits to their watchers.
    pub fn set_full_state(&self, commits: CommitSet) -> SyncResult<()> {
        let gids: Vec<&str> = commits.keys().map(Gid::as_str).collect();
        debug!(?gids, "setting full state");

        self.route(commits, |watcher, commit| {
            if self.inner.policy.should_sync(watcher.entity(), &commit.sync_id) {
                watcher.set_full_state(&commit);
            }
            Ok(())
        })
    }

    /// Creates a full-state commit for every synced watcher.
    pub fn create_full_state(&self) -> CommitSet {
        let id = self.id();
        self.watchers()
            .into_iter()
            .filter(|watcher| self.inner.policy.should_sync(watcher.entity(), &id))
            .map(|watcher| (watcher.gid().clone(), watcher.create_full_state()))
            .collect()
    }

    /// Delivers each commit to its watcher, retrying commits whose watcher
    /// does not exist yet until a pass makes no progress.
    fn route<F>(&self, commits: CommitSet, mut apply: F) -> SyncResult<()>
    where
        F: FnMut(&Watcher, Commit) -> SyncResult<()>,
    {
        let mut queue: Vec<(Gid, Commit)> = commits.into_iter().collect();
        while !queue.is_empty() {
            let before = queue.len();
            let mut deferred = Vec::new();
            for (gid, commit) in queue {
                match self.watcher(&gid) {
                    Some(watcher) => apply(&watcher, commit)?,
                    None => deferred.push((gid, commit)),
                }
            }

            if deferred.len() == before {
                let gids: Vec<&str> = deferred.iter().map(|(gid, _)| gid.as_str()).collect();
                debug!(?gids, "skipping commits for unregistered gids");
                break;
            }
            queue = deferred;
        }
        Ok(())
    }

    fn schedule_commit(&self) {
        if !self.inner.throttle.is_enabled() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.throttle.schedule(move || async move {
            if let Some(sync) = Self::upgrade(&weak) {
                sync.inner.throttle.begin_run();
                sync.commit();
            }
        });
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Synchronizer")
            .field("id", &state.id)
            .field("active", &state.active)
            .field("watchers", &state.watchers.len())
            .finish()
    }
}
