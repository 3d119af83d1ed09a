//! Observable entities.
//!
//! An [`Entity`] is a cheap, clonable handle to a node of the graph. Every
//! mutation is reported to the entity's observers as an [`EntityEvent`]:
//!
//! - `set` fires [`EntityEvent::Property`] when the value actually changed
//! - `push`, `set_at` and `remove_at` fire [`EntityEvent::Collection`]
//! - `destroy` fires [`EntityEvent::Destroyed`] once
//!
//! Events are delivered after the entity's internal lock is released, in
//! mutation order.

use crate::error::{ModelError, ModelResult};
use crate::field::Field;
use crate::observers::{Observers, Subscription};
use crate::registry::{Registry, RegistryInner};
use graphsync_protocol::{Changes, EntityData, Gid, Value, GID_KEY};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A property was assigned.
#[derive(Debug, Clone)]
pub struct PropertyChange {
    /// Property name.
    pub path: String,
    /// Value after the change.
    pub new_value: Field,
    /// Value before the change.
    pub old_value: Field,
}

/// An item of a collection was added, replaced or removed.
#[derive(Debug, Clone)]
pub struct CollectionChange {
    /// Collection property name.
    pub property: String,
    /// Affected index.
    pub index: usize,
    /// `"<property>.<index>"`.
    pub path: String,
    /// Item after the change (null on removal).
    pub new_value: Field,
    /// Item before the change (null on insertion).
    pub old_value: Field,
}

/// Events emitted by an entity.
#[derive(Debug, Clone)]
pub enum EntityEvent {
    /// A property was assigned a different value.
    Property(PropertyChange),
    /// A collection item changed.
    Collection(CollectionChange),
    /// The entity was destroyed.
    Destroyed,
}

/// Options for [`Entity::export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportOptions {
    /// Export referenced entities as gid-only references.
    pub shallow: bool,
    /// Skip fields holding default values (null or empty collections).
    pub non_default: bool,
}

impl ExportOptions {
    /// Full recursive export.
    pub fn deep() -> Self {
        Self::default()
    }

    /// Export with nested entities as references.
    pub fn shallow() -> Self {
        Self {
            shallow: true,
            non_default: false,
        }
    }

    /// Sets whether default-valued fields are skipped.
    #[must_use]
    pub fn with_non_default(mut self, non_default: bool) -> Self {
        self.non_default = non_default;
        self
    }
}

pub(crate) struct EntityInner {
    gid: Gid,
    root: bool,
    fields: RwLock<BTreeMap<String, Field>>,
    observers: Observers<EntityEvent>,
    registry: Weak<RegistryInner>,
    destroyed: AtomicBool,
}

/// Handle to an observable entity.
///
/// Clones share the same entity. Equality is by gid.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

impl Entity {
    pub(crate) fn new(
        gid: Gid,
        root: bool,
        fields: BTreeMap<String, Field>,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                gid,
                root,
                fields: RwLock::new(fields),
                observers: Observers::new(),
                registry,
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the entity's gid.
    pub fn gid(&self) -> &Gid {
        &self.inner.gid
    }

    /// Returns true for root entities, which live as long as the session.
    pub fn is_root(&self) -> bool {
        self.inner.root
    }

    /// Returns true once [`destroy`](Self::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Returns the registry this entity belongs to, if it still exists.
    pub fn registry(&self) -> Option<Registry> {
        self.inner.registry.upgrade().map(Registry::from_inner)
    }

    /// Returns true if both handles point to the same entity instance.
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Reads a field. Absent fields read as null.
    pub fn get(&self, name: &str) -> Field {
        self.inner
            .fields
            .read()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns true if the field holds a value.
    pub fn has(&self, name: &str) -> bool {
        self.inner.fields.read().contains_key(name)
    }

    /// Returns the names of all fields holding a value.
    pub fn field_names(&self) -> Vec<String> {
        self.inner.fields.read().keys().cloned().collect()
    }

    /// Returns the length of a collection field.
    pub fn collection_len(&self, name: &str) -> Option<usize> {
        self.inner
            .fields
            .read()
            .get(name)
            .and_then(Field::as_list)
            .map(<[Field]>::len)
    }

    /// Assigns a field. Assigning null clears it.
    ///
    /// Fires [`EntityEvent::Property`] if the value changed.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Field>) {
        let name = name.into();
        let value = value.into();
        if name == GID_KEY {
            return;
        }

        let old_value = {
            let mut fields = self.inner.fields.write();
            let old = fields.get(&name).cloned().unwrap_or_default();
            if old == value {
                return;
            }
            if value.is_null() {
                fields.remove(&name);
            } else {
                fields.insert(name.clone(), value.clone());
            }
            old
        };

        self.inner
            .observers
            .notify(&EntityEvent::Property(PropertyChange {
                path: name,
                new_value: value,
                old_value,
            }));
    }

    /// Appends an item to a collection, creating the collection if the field
    /// is empty. Returns the index of the new item.
    pub fn push(&self, name: &str, item: impl Into<Field>) -> ModelResult<usize> {
        let item = item.into();
        let index = {
            let mut fields = self.inner.fields.write();
            let field = fields
                .entry(name.to_string())
                .or_insert_with(|| Field::List(Vec::new()));
            let items = self.list_mut(name, field)?;
            items.push(item.clone());
            items.len() - 1
        };

        self.notify_collection(name, index, item, Field::NULL);
        Ok(index)
    }

    /// Replaces a collection item.
    pub fn set_at(&self, name: &str, index: usize, item: impl Into<Field>) -> ModelResult<()> {
        let item = item.into();
        let old_value = {
            let mut fields = self.inner.fields.write();
            let field = self.existing_mut(name, &mut fields)?;
            let items = self.list_mut(name, field)?;
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or_else(|| ModelError::IndexOutOfBounds {
                    property: name.to_string(),
                    index,
                    len,
                })?;
            if *slot == item {
                return Ok(());
            }
            std::mem::replace(slot, item.clone())
        };

        self.notify_collection(name, index, item, old_value);
        Ok(())
    }

    /// Removes a collection item and returns it.
    pub fn remove_at(&self, name: &str, index: usize) -> ModelResult<Field> {
        let removed = {
            let mut fields = self.inner.fields.write();
            let field = self.existing_mut(name, &mut fields)?;
            let items = self.list_mut(name, field)?;
            if index >= items.len() {
                return Err(ModelError::IndexOutOfBounds {
                    property: name.to_string(),
                    index,
                    len: items.len(),
                });
            }
            items.remove(index)
        };

        self.notify_collection(name, index, Field::NULL, removed.clone());
        Ok(removed)
    }

    fn existing_mut<'a>(
        &self,
        name: &str,
        fields: &'a mut BTreeMap<String, Field>,
    ) -> ModelResult<&'a mut Field> {
        fields.get_mut(name).ok_or_else(|| ModelError::IndexOutOfBounds {
            property: name.to_string(),
            index: 0,
            len: 0,
        })
    }

    fn list_mut<'a>(&self, name: &str, field: &'a mut Field) -> ModelResult<&'a mut Vec<Field>> {
        match field {
            Field::List(items) => Ok(items),
            _ => Err(ModelError::NotACollection {
                gid: self.inner.gid.clone(),
                property: name.to_string(),
            }),
        }
    }

    fn notify_collection(&self, property: &str, index: usize, new_value: Field, old_value: Field) {
        self.inner
            .observers
            .notify(&EntityEvent::Collection(CollectionChange {
                property: property.to_string(),
                index,
                path: format!("{property}.{index}"),
                new_value,
                old_value,
            }));
    }

    /// Exports the entity's fields.
    pub fn export(&self, options: ExportOptions) -> Changes {
        let mut visited = HashSet::new();
        visited.insert(self.inner.gid.clone());
        self.export_fields(options, &mut visited)
    }

    /// Exports the entity, gid included.
    pub fn export_data(&self, options: ExportOptions) -> EntityData {
        EntityData {
            gid: self.inner.gid.clone(),
            fields: self.export(options),
        }
    }

    fn export_fields(&self, options: ExportOptions, visited: &mut HashSet<Gid>) -> Changes {
        let fields = self.inner.fields.read().clone();
        fields
            .iter()
            .filter(|(_, field)| !options.non_default || !field.is_default())
            .map(|(name, field)| (name.clone(), export_field(field, options, visited)))
            .collect()
    }

    /// Applies exported data to this entity.
    ///
    /// References to unknown gids create empty entities, full exports of
    /// unknown gids create populated ones; both are registered before any
    /// field of this entity is assigned. Full exports of known entities
    /// update them with the same `merge` mode.
    ///
    /// With `merge`, fields absent from `data` are left untouched; without
    /// it they are cleared.
    pub fn set_data(&self, data: &Changes, merge: bool) {
        let mut import = Import::new(self.registry());
        let resolved = import.resolve_fields(data, merge);
        import.register_created();
        import.assign(self, resolved, merge);
    }

    /// Subscribes to this entity's events.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EntityEvent) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(callback)
    }

    /// Destroys the entity: notifies observers, removes it from its registry
    /// and drops its fields. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.observers.notify(&EntityEvent::Destroyed);
        if let Some(registry) = self.registry() {
            registry.remove(self.inner.gid.as_str());
        }
        self.inner.fields.write().clear();
        self.inner.observers.clear();
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.inner.gid == other.inner.gid
    }
}

impl Eq for Entity {}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("gid", &self.inner.gid)
            .field("root", &self.inner.root)
            .finish()
    }
}

pub(crate) fn export_field(
    field: &Field,
    options: ExportOptions,
    visited: &mut HashSet<Gid>,
) -> Value {
    match field {
        Field::Scalar(scalar) => Value::Scalar(scalar.clone()),
        Field::List(items) => Value::List(
            items
                .iter()
                .map(|item| export_field(item, options, visited))
                .collect(),
        ),
        Field::Entity(entity) => {
            if options.shallow || !visited.insert(entity.gid().clone()) {
                return Value::Ref(entity.gid().clone());
            }
            Value::Entity(EntityData {
                gid: entity.gid().clone(),
                fields: entity.export_fields(options, visited),
            })
        }
    }
}

/// Resolves exported values into live fields.
struct Import {
    registry: Option<Registry>,
    pending: HashMap<Gid, Entity>,
    updated: HashSet<Gid>,
    created: Vec<Entity>,
}

impl Import {
    fn new(registry: Option<Registry>) -> Self {
        Self {
            registry,
            pending: HashMap::new(),
            updated: HashSet::new(),
            created: Vec::new(),
        }
    }

    fn resolve_fields(&mut self, data: &Changes, merge: bool) -> Vec<(String, Field)> {
        data.iter()
            .filter(|(name, _)| name.as_str() != GID_KEY)
            .map(|(name, value)| (name.clone(), self.resolve(value, merge)))
            .collect()
    }

    fn resolve(&mut self, value: &Value, merge: bool) -> Field {
        match value {
            Value::Scalar(scalar) => Field::Scalar(scalar.clone()),
            Value::List(items) => {
                Field::List(items.iter().map(|item| self.resolve(item, merge)).collect())
            }
            Value::Ref(gid) => Field::Entity(self.lookup_or_create(gid)),
            Value::Entity(data) => {
                if let Some(entity) = self.pending.get(&data.gid) {
                    return Field::Entity(entity.clone());
                }
                if let Some(entity) = self.registered(&data.gid) {
                    if self.updated.insert(data.gid.clone()) {
                        let resolved = self.resolve_fields(&data.fields, merge);
                        self.assign(&entity, resolved, merge);
                    }
                    return Field::Entity(entity);
                }

                let entity = self.detached(&data.gid);
                let resolved = self.resolve_fields(&data.fields, merge);
                {
                    let mut fields = entity.inner.fields.write();
                    for (name, field) in resolved {
                        if !field.is_null() {
                            fields.insert(name, field);
                        }
                    }
                }
                Field::Entity(entity)
            }
        }
    }

    fn registered(&self, gid: &Gid) -> Option<Entity> {
        self.registry
            .as_ref()
            .and_then(|registry| registry.get(gid.as_str()))
    }

    fn lookup_or_create(&mut self, gid: &Gid) -> Entity {
        if let Some(entity) = self.pending.get(gid) {
            return entity.clone();
        }
        if let Some(entity) = self.registered(gid) {
            return entity;
        }
        self.detached(gid)
    }

    fn detached(&mut self, gid: &Gid) -> Entity {
        let registry = self
            .registry
            .as_ref()
            .map(Registry::downgrade)
            .unwrap_or_default();
        let entity = Entity::new(gid.clone(), false, BTreeMap::new(), registry);
        self.pending.insert(gid.clone(), entity.clone());
        self.created.push(entity.clone());
        entity
    }

    fn register_created(&mut self) {
        let Some(registry) = self.registry.as_ref() else {
            return;
        };
        for entity in self.created.drain(..) {
            registry.adopt(entity);
        }
    }

    fn assign(&self, target: &Entity, resolved: Vec<(String, Field)>, merge: bool) {
        if !merge {
            let keep: HashSet<&str> = resolved.iter().map(|(name, _)| name.as_str()).collect();
            for name in target.field_names() {
                if !keep.contains(name.as_str()) {
                    target.set(name, Field::NULL);
                }
            }
        }
        for (name, field) in resolved {
            target.set(name, field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphsync_protocol::Scalar;
    use parking_lot::Mutex;

    fn record(entity: &Entity) -> (Arc<Mutex<Vec<String>>>, Subscription) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let sub = entity.subscribe(move |event| {
            let line = match event {
                EntityEvent::Property(change) => format!("set {}", change.path),
                EntityEvent::Collection(change) => format!("item {}", change.path),
                EntityEvent::Destroyed => "destroyed".to_string(),
            };
            sink.lock().push(line);
        });
        (log, sub)
    }

    #[test]
    fn set_fires_only_on_change() {
        let registry = Registry::new();
        let entity = registry.create("a").unwrap();
        let (log, _sub) = record(&entity);

        entity.set("name", "x");
        entity.set("name", "x");
        entity.set("name", "y");
        entity.set("name", Field::NULL);

        assert_eq!(*log.lock(), vec!["set name", "set name", "set name"]);
        assert!(!entity.has("name"));
        assert!(entity.get("name").is_null());
    }

    #[test]
    fn gid_cannot_be_assigned() {
        let registry = Registry::new();
        let entity = registry.create("a").unwrap();
        entity.set(GID_KEY, "b");
        assert!(entity.field_names().is_empty());
    }

    #[test]
    fn collection_operations() {
        let registry = Registry::new();
        let entity = registry.create("a").unwrap();
        let (log, _sub) = record(&entity);

        assert_eq!(entity.push("items", 1).unwrap(), 0);
        assert_eq!(entity.push("items", 2).unwrap(), 1);
        entity.set_at("items", 0, 5).unwrap();
        let removed = entity.remove_at("items", 1).unwrap();

        assert_eq!(removed, Field::from(2));
        assert_eq!(entity.collection_len("items"), Some(1));
        assert_eq!(
            *log.lock(),
            vec!["item items.0", "item items.1", "item items.0", "item items.1"]
        );
    }

    #[test]
    fn collection_errors() {
        let registry = Registry::new();
        let entity = registry.create("a").unwrap();
        entity.set("name", "x");

        let err = entity.push("name", 1).unwrap_err();
        assert!(matches!(err, ModelError::NotACollection { .. }));

        entity.push("items", 1).unwrap();
        let err = entity.set_at("items", 3, 1).unwrap_err();
        assert_eq!(
            err,
            ModelError::IndexOutOfBounds {
                property: "items".into(),
                index: 3,
                len: 1,
            }
        );
        assert!(entity.remove_at("missing", 0).is_err());
    }

    #[test]
    fn export_modes() {
        let registry = Registry::new();
        let child = registry.builder("child").field("n", 1).create().unwrap();
        let parent = registry.create("parent").unwrap();
        parent.set("child", &child);
        parent.set("title", "p");
        parent.set("tags", Field::List(Vec::new()));

        let shallow = parent.export(ExportOptions::shallow());
        assert_eq!(shallow["child"], Value::reference("child"));
        assert!(shallow.contains_key("tags"));

        let non_default = parent.export(ExportOptions::shallow().with_non_default(true));
        assert!(!non_default.contains_key("tags"));

        let deep = parent.export(ExportOptions::deep());
        let data = deep["child"].as_entity().unwrap();
        assert_eq!(data.get("n"), Some(&Value::from(1)));
    }

    #[test]
    fn deep_export_cuts_cycles() {
        let registry = Registry::new();
        let a = registry.create("a").unwrap();
        let b = registry.create("b").unwrap();
        a.set("next", &b);
        b.set("next", &a);

        let export = a.export(ExportOptions::deep());
        let b_data = export["next"].as_entity().unwrap();
        assert_eq!(b_data.get("next"), Some(&Value::reference("a")));
    }

    #[test]
    fn set_data_merges_and_replaces() {
        let registry = Registry::new();
        let entity = registry.create("a").unwrap();
        entity.set("x", 1);
        entity.set("y", 2);

        let mut data = Changes::new();
        data.insert("y".into(), Value::from(3));
        entity.set_data(&data, true);
        assert_eq!(entity.get("x"), Field::from(1));
        assert_eq!(entity.get("y"), Field::from(3));

        entity.set_data(&data, false);
        assert!(entity.get("x").is_null());
        assert_eq!(entity.get("y"), Field::from(3));
    }

    #[test]
    fn set_data_creates_referenced_entities() {
        let registry = Registry::new();
        let root = registry.create_root("root").unwrap();

        let mut data = Changes::new();
        data.insert(
            "child".into(),
            Value::Entity(EntityData::new("c").with("name", "C")),
        );
        data.insert(
            "friends".into(),
            Value::List(vec![Value::reference("f"), Value::reference("c")]),
        );
        root.set_data(&data, true);

        let child = registry.get("c").unwrap();
        assert_eq!(child.get("name"), Field::from("C"));
        assert!(!child.is_root());
        assert!(registry.get("f").unwrap().field_names().is_empty());

        let friends = root.get("friends");
        let items = friends.as_list().unwrap();
        assert!(items[1].as_entity().unwrap().ptr_eq(&child));
    }

    #[test]
    fn created_entities_are_registered_populated() {
        let registry = Registry::new();
        let root = registry.create_root("root").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = registry.subscribe(move |event| {
            if let crate::RegistryEvent::Added(entity) = event {
                sink.lock().push(entity.get("name"));
            }
        });

        let mut data = Changes::new();
        data.insert(
            "child".into(),
            Value::Entity(EntityData::new("c").with("name", "C")),
        );
        root.set_data(&data, true);

        assert_eq!(*seen.lock(), vec![Field::from("C")]);
    }

    #[test]
    fn set_data_updates_known_entities_from_full_exports() {
        let registry = Registry::new();
        let root = registry.create_root("root").unwrap();
        let child = registry.builder("c").field("name", "old").create().unwrap();

        let mut data = Changes::new();
        data.insert(
            "child".into(),
            Value::Entity(EntityData::new("c").with("name", "new")),
        );
        root.set_data(&data, true);

        assert_eq!(child.get("name"), Field::from("new"));
        assert!(root.get("child").as_entity().unwrap().ptr_eq(&child));
    }

    #[test]
    fn destroy_notifies_and_unregisters() {
        let registry = Registry::new();
        let entity = registry.create("a").unwrap();
        let (log, _sub) = record(&entity);

        entity.destroy();
        entity.destroy();

        assert_eq!(*log.lock(), vec!["destroyed"]);
        assert!(entity.is_destroyed());
        assert!(!registry.contains("a"));
    }

    #[test]
    fn property_event_carries_old_value() {
        let registry = Registry::new();
        let entity = registry.create("a").unwrap();
        entity.set("n", 1);

        let old = Arc::new(Mutex::new(None));
        let sink = old.clone();
        let _sub = entity.subscribe(move |event| {
            if let EntityEvent::Property(change) = event {
                *sink.lock() = Some(change.old_value.clone());
            }
        });
        entity.set("n", 2);

        assert_eq!(*old.lock(), Some(Field::Scalar(Scalar::Integer(1))));
    }
}
