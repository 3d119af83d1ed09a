//! # GraphSync Server
//!
//! Relay server and session hub for GraphSync.
//!
//! This crate provides:
//! - `SyncServer`, which merges the commits clients push into its own replica
//!   and relays the effective result to the other clients
//! - `SessionHub`, which hosts isolated sessions, each with its own model and
//!   server
//! - Server and hub configuration
//!
//! # Architecture
//!
//! The server is transport-agnostic. Whatever accepts connections (a
//! WebSocket endpoint, an in-memory channel in tests) registers each
//! client's `MessageSink` with the server and feeds the messages it receives
//! to `SyncServer::handle`. All replies and broadcasts go through the sinks.
//!
//! # Protocol
//!
//! 1. On connect the server sends `connected` with the client's id, then
//!    `full-state`
//! 2. Clients `push` their commits; the server merges them and relays the
//!    merged commits to the other clients
//! 3. A client whose commits are too old to merge receives `full-state`
//! 4. The server's own commits are pushed to every client

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod config;
mod error;
mod hub;
mod server;

pub use config::{HubConfig, ServerConfig, SERVER_PRIORITY};
pub use error::{ServerError, ServerResult};
pub use hub::{HubEvent, ModelFactory, SessionHub};
pub use server::{ServerEvent, SyncServer};

// Servers and hubs are driven from connection tasks on any thread.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<SyncServer>();
    assert_send_sync::<SessionHub>();
};
