//! # GraphSync Model
//!
//! Schema-less observable entity graph.
//!
//! This crate provides:
//! - `Registry`, the gid-keyed index of live entities with `Added`/`Removed`
//!   events
//! - `Entity`, an observable node with scalar, reference and collection
//!   fields
//! - `export` / `set_data` to convert between live entities and protocol
//!   `Value`s
//! - `Observers` / `Subscription`, the notification primitive everything
//!   else is built on
//!
//! ## Event Ordering
//!
//! - Events fire after internal locks are released
//! - Observers run in subscription order
//! - Entities created by `set_data` or a builder are registered only once
//!   their initial fields are in place

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod field;
mod observers;
mod registry;

pub use entity::{CollectionChange, Entity, EntityEvent, ExportOptions, PropertyChange};
pub use error::{ModelError, ModelResult};
pub use field::Field;
pub use observers::{Observers, Subscription};
pub use registry::{EntityBuilder, Registry, RegistryEvent};
