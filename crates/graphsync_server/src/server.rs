//! Relay server for one shared model.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use graphsync_engine::{MessageSink, Synchronizer};
use graphsync_model::{Entity, Observers, Subscription};
use graphsync_protocol::{CommitSet, ConnectedInfo, SyncMessage, Uuid};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Something that happened on a [`SyncServer`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A client connected and received the full state.
    UserConnected(String),
    /// A client disconnected.
    UserDisconnected(String),
    /// A client replaced the server's state.
    FullStateUpdated(CommitSet),
}

struct ServerInner {
    model: Entity,
    sync: Synchronizer,
    clients: RwLock<BTreeMap<String, Arc<dyn MessageSink>>>,
    owner: RwLock<Option<String>>,
    events: Observers<ServerEvent>,
    subscription: Mutex<Option<Subscription>>,
}

/// Relays commits between the clients of one model.
///
/// The server holds its own replica of the model. Pushed commits are merged
/// into it first, and only the effective result is passed on to the other
/// clients, so every client converges on the server's view. Its
/// synchronizer has priority 1 by default, so the server wins ties.
///
/// Connections are owned by the caller: it registers each client's
/// [`MessageSink`] with [`connect`](Self::connect) and feeds received
/// messages to [`handle`](Self::handle).
///
/// # Example
///
/// ```
/// use graphsync_engine::MockSink;
/// use graphsync_model::Registry;
/// use graphsync_server::{ServerConfig, SyncServer};
/// use std::sync::Arc;
///
/// let registry = Registry::new();
/// let model = registry.create_root("root").unwrap();
/// let server = SyncServer::new(&model, ServerConfig::new().with_auto_commit(None)).unwrap();
/// server.start();
///
/// let sink = Arc::new(MockSink::new());
/// let id = server.connect(sink.clone()).unwrap();
/// assert_eq!(server.session_owner(), Some(id));
/// // connected + full-state
/// assert_eq!(sink.sent().len(), 2);
/// ```
#[derive(Clone)]
pub struct SyncServer {
    inner: Arc<ServerInner>,
}

impl SyncServer {
    /// Creates a server for `model`, following its registry.
    pub fn new(model: &Entity, config: ServerConfig) -> ServerResult<Self> {
        let sync = Synchronizer::with_model(model, config.sync_config())?;
        let server = Self {
            inner: Arc::new(ServerInner {
                model: model.clone(),
                sync,
                clients: RwLock::new(BTreeMap::new()),
                owner: RwLock::new(None),
                events: Observers::new(),
                subscription: Mutex::new(None),
            }),
        };

        let weak = Arc::downgrade(&server.inner);
        let subscription = server.inner.sync.subscribe(move |commits| {
            if let Some(server) = Self::upgrade(&weak) {
                let gids: Vec<&str> = commits.keys().map(|gid| gid.as_str()).collect();
                debug!(?gids, "pushing new commits to all clients");
                server.broadcast(None, &SyncMessage::Push(commits.clone()));
            }
        });
        *server.inner.subscription.lock() = Some(subscription);
        Ok(server)
    }

    fn upgrade(weak: &Weak<ServerInner>) -> Option<SyncServer> {
        weak.upgrade().map(|inner| SyncServer { inner })
    }

    /// Returns the server's model.
    pub fn model(&self) -> &Entity {
        &self.inner.model
    }

    /// Returns the server's synchronizer.
    pub fn synchronizer(&self) -> &Synchronizer {
        &self.inner.sync
    }

    /// Returns the first client that connected.
    pub fn session_owner(&self) -> Option<String> {
        self.inner.owner.read().clone()
    }

    /// Returns the ids of connected clients.
    pub fn clients(&self) -> Vec<String> {
        self.inner.clients.read().keys().cloned().collect()
    }

    /// Returns the number of connected clients.
    pub fn client_count(&self) -> usize {
        self.inner.clients.read().len()
    }

    /// Subscribes to server events.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    /// Starts synchronizing the model.
    pub fn start(&self) {
        self.inner.sync.start();
        info!(id = %self.inner.sync.id(), "sync server started");
    }

    /// Stops synchronizing the model. Clients stay connected.
    pub fn stop(&self) {
        self.inner.sync.stop();
        info!(id = %self.inner.sync.id(), "sync server stopped");
    }

    /// Stops the server, disconnects everyone and destroys the model.
    pub fn destroy(&self) {
        let subscription = self.inner.subscription.lock().take();
        drop(subscription);
        self.stop();
        self.inner.sync.destroy(true);
        self.inner.clients.write().clear();
        self.inner.events.clear();
    }

    /// Accepts a client: assigns it an id and sends it `connected` followed
    /// by the full state. The first client becomes the session owner.
    pub fn connect(&self, sink: impl MessageSink + 'static) -> ServerResult<String> {
        let id = Uuid::new_v4().to_string();
        let sink: Arc<dyn MessageSink> = Arc::new(sink);
        {
            let mut clients = self.inner.clients.write();
            clients.insert(id.clone(), sink.clone());
            let mut owner = self.inner.owner.write();
            if owner.is_none() {
                *owner = Some(id.clone());
            }
        }
        info!(client = %id, "client connected");

        sink.send(SyncMessage::Connected(ConnectedInfo {
            id: id.clone(),
            server_sync_id: self.inner.sync.id(),
        }))?;
        sink.send(SyncMessage::FullState(self.inner.sync.create_full_state()))?;

        self.inner
            .events
            .notify(&ServerEvent::UserConnected(id.clone()));
        Ok(id)
    }

    /// Forgets a client.
    pub fn disconnect(&self, client: &str) -> ServerResult<()> {
        if self.inner.clients.write().remove(client).is_none() {
            return Err(ServerError::UnknownClient(client.to_string()));
        }
        info!(client, "client disconnected");
        self.inner
            .events
            .notify(&ServerEvent::UserDisconnected(client.to_string()));
        Ok(())
    }

    /// Handles a message received from a client.
    pub fn handle(&self, client: &str, message: SyncMessage) -> ServerResult<()> {
        match message {
            SyncMessage::Push(commits) => self.handle_push(client, commits),
            SyncMessage::FullState(state) => self.handle_full_state(client, state),
            SyncMessage::Message(payload) => self.handle_message(client, payload),
            other => Err(ServerError::InvalidRequest(format!(
                "'{}' is not accepted by a sync server",
                other.event_name()
            ))),
        }
    }

    /// Merges pushed commits and passes the effective ones on to the other
    /// clients.
    ///
    /// A client pushing outdated commits is sent the full state instead; it
    /// is not treated as an error.
    pub fn handle_push(&self, client: &str, commits: CommitSet) -> ServerResult<()> {
        let sink = self.sink(client)?;
        let gids: Vec<&str> = commits.keys().map(|gid| gid.as_str()).collect();
        debug!(client, ?gids, "received commits");

        match self.inner.sync.merge(commits) {
            Ok(merged) => {
                if !merged.is_empty() {
                    self.broadcast(Some(client), &SyncMessage::Push(merged));
                }
                Ok(())
            }
            Err(err) if err.is_recoverable() => {
                warn!(client, error = %err, "sending full state after failed merge");
                sink.send(SyncMessage::FullState(self.inner.sync.create_full_state()))?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Replaces the server's state with a client's and passes it on to the
    /// other clients.
    pub fn handle_full_state(&self, client: &str, state: CommitSet) -> ServerResult<()> {
        self.sink(client)?;
        debug!(client, "received full state");

        self.inner.sync.set_full_state(state.clone())?;
        self.inner
            .events
            .notify(&ServerEvent::FullStateUpdated(state.clone()));
        self.broadcast(Some(client), &SyncMessage::FullState(state));
        Ok(())
    }

    /// Passes an application message on to the other clients.
    pub fn handle_message(&self, client: &str, payload: serde_json::Value) -> ServerResult<()> {
        self.sink(client)?;
        debug!(client, "relaying message");
        self.broadcast(Some(client), &SyncMessage::Message(payload));
        Ok(())
    }

    fn sink(&self, client: &str) -> ServerResult<Arc<dyn MessageSink>> {
        self.inner
            .clients
            .read()
            .get(client)
            .cloned()
            .ok_or_else(|| ServerError::UnknownClient(client.to_string()))
    }

    /// Sends `message` to every client but `except`. Failed sends are logged;
    /// one broken connection does not stop the others.
    fn broadcast(&self, except: Option<&str>, message: &SyncMessage) {
        let targets: Vec<(String, Arc<dyn MessageSink>)> = self
            .inner
            .clients
            .read()
            .iter()
            .filter(|(id, _)| Some(id.as_str()) != except)
            .map(|(id, sink)| (id.clone(), sink.clone()))
            .collect();

        for (id, sink) in targets {
            if let Err(err) = sink.send(message.clone()) {
                warn!(client = %id, error = %err, event = message.event_name(), "send failed");
            }
        }
    }
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("sync", &self.inner.sync)
            .field("clients", &self.client_count())
            .finish()
    }
}
