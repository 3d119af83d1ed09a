//! Client side of the relay protocol.

use crate::config::ClientConfig;
use crate::error::{SyncError, SyncResult};
use crate::synchronizer::Synchronizer;
use crate::transport::MessageSink;
use graphsync_model::{Entity, Observers, Subscription};
use graphsync_protocol::{CommitSet, SessionRequest, SyncMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

struct ClientInner {
    sync: Synchronizer,
    sink: Arc<dyn MessageSink>,
    server_sync_id: Mutex<Option<String>>,
    messages: Observers<serde_json::Value>,
    subscription: Mutex<Option<Subscription>>,
}

/// Keeps a local model in sync with a relay server.
///
/// Local commits are pushed to the server as they are produced; messages
/// received from the server are fed to [`handle`](Self::handle) by whatever
/// owns the connection.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<ClientInner>,
}

impl SyncClient {
    /// Creates a client for `model`, sending through `sink`.
    pub fn new(
        model: &Entity,
        sink: impl MessageSink + 'static,
        config: ClientConfig,
    ) -> SyncResult<Self> {
        let sync = Synchronizer::with_model(model, config.sync)?;
        let sink: Arc<dyn MessageSink> = Arc::new(sink);

        let outgoing = sink.clone();
        let subscription = sync.subscribe(move |commits| {
            let gids: Vec<&str> = commits.keys().map(|gid| gid.as_str()).collect();
            debug!(?gids, "pushing new commits");
            match outgoing.send(SyncMessage::Push(commits.clone())) {
                Ok(()) => {}
                Err(err) if err.is_retryable() => {
                    warn!(error = %err, "not connected; commits not pushed");
                }
                Err(err) => error!(error = %err, "failed to push commits"),
            }
        });

        Ok(Self {
            inner: Arc::new(ClientInner {
                sync,
                sink,
                server_sync_id: Mutex::new(None),
                messages: Observers::new(),
                subscription: Mutex::new(Some(subscription)),
            }),
        })
    }

    /// Returns the underlying synchronizer.
    pub fn synchronizer(&self) -> &Synchronizer {
        &self.inner.sync
    }

    /// Returns the server's sync id, once connected.
    pub fn server_sync_id(&self) -> Option<String> {
        self.inner.server_sync_id.lock().clone()
    }

    /// Returns true once the server has accepted the connection.
    pub fn is_connected(&self) -> bool {
        self.inner.server_sync_id.lock().is_some()
    }

    /// Starts synchronizing.
    pub fn start(&self) {
        self.inner.sync.start();
        info!("sync client started");
    }

    /// Handles a message received from the server.
    ///
    /// # Errors
    ///
    /// [`SyncError::OutdatedCommit`] from merging, or
    /// [`SyncError::UnexpectedMessage`] for events a client does not accept.
    pub fn handle(&self, message: SyncMessage) -> SyncResult<()> {
        match message {
            SyncMessage::Connected(info) => {
                info!(id = %info.id, server = %info.server_sync_id, "connected to server");
                self.inner.sync.set_id(info.id);
                *self.inner.server_sync_id.lock() = Some(info.server_sync_id);
                Ok(())
            }
            SyncMessage::Push(commits) => self.handle_push(commits),
            SyncMessage::FullState(state) => {
                debug!(entities = state.len(), "received full state");
                self.inner.sync.merge(state)?;
                Ok(())
            }
            SyncMessage::Message(payload) => {
                self.inner.messages.notify(&payload);
                Ok(())
            }
            other => Err(SyncError::unexpected(other.event_name())),
        }
    }

    fn handle_push(&self, mut commits: CommitSet) -> SyncResult<()> {
        let id = self.inner.sync.id();
        commits.retain(|_, commit| commit.sync_id != id);
        if commits.is_empty() {
            return Ok(());
        }

        let gids: Vec<&str> = commits.keys().map(|gid| gid.as_str()).collect();
        debug!(?gids, "received new commits");
        self.inner.sync.merge(commits)?;
        Ok(())
    }

    /// Sends an application message to the other clients.
    pub fn message(&self, payload: serde_json::Value) -> SyncResult<()> {
        self.inner.sink.send(SyncMessage::Message(payload))
    }

    /// Sends the complete local state, replacing the server's.
    pub fn send_full_state(&self) -> SyncResult<()> {
        let state = self.inner.sync.create_full_state();
        self.inner.sink.send(SyncMessage::FullState(state))
    }

    /// Asks a session hub for a new session, optionally offering the local
    /// state as its seed.
    pub fn request_session(&self, include_state: bool) -> SyncResult<()> {
        let state = include_state.then(|| self.inner.sync.create_full_state());
        self.inner
            .sink
            .send(SyncMessage::CreateSession(SessionRequest { state }))
    }

    /// Subscribes to application messages relayed by the server.
    pub fn subscribe_messages<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.inner.messages.subscribe(callback)
    }

    /// Stops pushing commits and detaches the synchronizer. The model is
    /// left intact.
    pub fn destroy(&self) {
        let subscription = self.inner.subscription.lock().take();
        drop(subscription);
        self.inner.messages.clear();
        self.inner.sync.destroy(false);
        info!("sync client destroyed");
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("sync", &self.inner.sync)
            .field("server_sync_id", &*self.inner.server_sync_id.lock())
            .finish()
    }
}
