//! # GraphSync Protocol
//!
//! Commit, value and wire message types for GraphSync.
//!
//! This crate provides:
//! - `Gid` entity identifiers
//! - `Value`, the tagged union every entity export is made of
//! - `Commit` / `CommitSet` for versioned field-level changes
//! - `SyncMessage` relay messages
//! - JSON (wire shape) and CBOR codecs
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod commit;
mod error;
mod gid;
mod messages;
mod value;

pub use codec::{
    from_cbor, from_json, to_cbor, to_json, CborDecode, CborEncode, JsonDecode, JsonEncode,
};
pub use commit::{Commit, CommitSet};
pub use error::{ProtocolError, ProtocolResult};
pub use gid::Gid;
pub use messages::{ConnectedInfo, HubInfo, SessionInfo, SessionRequest, SyncMessage};
pub use value::{gids_in_changes, Changes, EntityData, Scalar, Value, GID_KEY};
pub use uuid::Uuid;
