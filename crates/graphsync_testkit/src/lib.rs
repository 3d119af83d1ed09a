//! # GraphSync Testkit
//!
//! Test utilities for GraphSync.
//!
//! This crate provides:
//! - Replica fixtures and tracing setup
//! - An in-memory relay network with explicit message pumping
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use graphsync_testkit::prelude::*;
//!
//! #[test]
//! fn edits_converge() {
//!     let mut network = Network::new().unwrap();
//!     let a = network.add_client().unwrap();
//!     network.pump();
//!
//!     network.model(a).set("title", "hello");
//!     network.settle();
//!     assert!(network.converged());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::{init_tracing, Network, Peer, Replica};
    pub use crate::generators::{
        edit_strategy, field_name_strategy, scalar_strategy, settled_script_strategy, Edit,
    };
}
