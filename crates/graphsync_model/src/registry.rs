//! Registry of live entities, keyed by gid.

use crate::entity::Entity;
use crate::error::{ModelError, ModelResult};
use crate::field::Field;
use crate::observers::{Observers, Subscription};
use graphsync_protocol::Gid;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Registry membership events.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// An entity was registered. Its initial fields are already populated.
    Added(Entity),
    /// An entity was removed (usually because it was destroyed).
    Removed(Entity),
}

pub(crate) struct RegistryInner {
    entities: RwLock<HashMap<Gid, Entity>>,
    observers: Observers<RegistryEvent>,
}

/// Index of every live entity of a graph.
///
/// Clones share the same registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entities: RwLock::new(HashMap::new()),
                observers: Observers::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryInner> {
        Arc::downgrade(&self.inner)
    }

    /// Starts building an entity.
    pub fn builder(&self, gid: impl Into<Gid>) -> EntityBuilder {
        EntityBuilder {
            registry: self.clone(),
            gid: gid.into(),
            root: false,
            fields: BTreeMap::new(),
        }
    }

    /// Creates and registers an empty entity.
    pub fn create(&self, gid: impl Into<Gid>) -> ModelResult<Entity> {
        self.builder(gid).create()
    }

    /// Creates and registers an empty root entity.
    pub fn create_root(&self, gid: impl Into<Gid>) -> ModelResult<Entity> {
        self.builder(gid).root().create()
    }

    /// Looks up an entity.
    pub fn get(&self, gid: &str) -> Option<Entity> {
        self.inner.entities.read().get(gid).cloned()
    }

    /// Returns true if an entity with this gid is registered.
    pub fn contains(&self, gid: &str) -> bool {
        self.inner.entities.read().contains_key(gid)
    }

    /// Returns every registered entity, ordered by gid.
    pub fn all(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.inner.entities.read().values().cloned().collect();
        entities.sort_by(|a, b| a.gid().cmp(b.gid()));
        entities
    }

    /// Returns the number of registered entities.
    pub fn len(&self) -> usize {
        self.inner.entities.read().len()
    }

    /// Returns true if no entity is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes an entity without destroying it.
    pub fn remove(&self, gid: &str) -> Option<Entity> {
        let removed = self.inner.entities.write().remove(gid);
        if let Some(entity) = &removed {
            debug!(gid = %entity.gid(), "entity removed from registry");
            self.inner
                .observers
                .notify(&RegistryEvent::Removed(entity.clone()));
        }
        removed
    }

    /// Subscribes to membership events.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(callback)
    }

    fn insert(&self, entity: Entity) -> ModelResult<Entity> {
        {
            let mut entities = self.inner.entities.write();
            if entities.contains_key(entity.gid()) {
                return Err(ModelError::DuplicateGid(entity.gid().clone()));
            }
            entities.insert(entity.gid().clone(), entity.clone());
        }

        self.inner
            .observers
            .notify(&RegistryEvent::Added(entity.clone()));
        Ok(entity)
    }

    /// Registers an entity created while importing data. An entity that
    /// appeared under the same gid in the meantime wins.
    pub(crate) fn adopt(&self, entity: Entity) {
        if let Err(err) = self.insert(entity) {
            debug!(error = %err, "imported entity already registered");
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entities", &self.len())
            .finish()
    }
}

/// Builder for entities with initial fields.
///
/// The entity is registered (and `Added` fired) only once every initial field
/// is in place.
#[derive(Debug)]
pub struct EntityBuilder {
    registry: Registry,
    gid: Gid,
    root: bool,
    fields: BTreeMap<String, Field>,
}

impl EntityBuilder {
    /// Marks the entity as a root entity.
    #[must_use]
    pub fn root(mut self) -> Self {
        self.root = true;
        self
    }

    /// Sets an initial field. Null values and the reserved `gid` key are
    /// ignored.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Field>) -> Self {
        let name = name.into();
        let value = value.into();
        if name != graphsync_protocol::GID_KEY && !value.is_null() {
            self.fields.insert(name, value);
        }
        self
    }

    /// Creates and registers the entity.
    pub fn create(self) -> ModelResult<Entity> {
        if self.registry.contains(self.gid.as_str()) {
            return Err(ModelError::DuplicateGid(self.gid));
        }
        let entity = Entity::new(self.gid, self.root, self.fields, self.registry.downgrade());
        self.registry.insert(entity)
    }
}
