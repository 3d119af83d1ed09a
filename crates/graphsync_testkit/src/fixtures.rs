//! Test fixtures: replicas and an in-memory relay network.
//!
//! [`Network`] wires a [`SyncServer`] and any number of [`SyncClient`]s
//! together over unbounded tokio channels. Nothing is delivered until
//! [`Network::pump`] is called, so tests control the interleaving exactly.
//! Auto-commit is disabled everywhere; commits happen when the test says so.

use graphsync_engine::{ClientConfig, MessageSink, SyncClient, SyncError, SyncResult};
use graphsync_model::{Entity, ExportOptions, Registry};
use graphsync_protocol::{from_json, to_json, Changes, ProtocolResult, SyncMessage};
use graphsync_server::{ServerConfig, ServerResult, SyncServer};
use std::sync::Once;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::warn;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// The filter is read from `RUST_LOG` and defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A model replica: a registry and its root entity.
#[derive(Debug, Clone)]
pub struct Replica {
    /// The replica's registry.
    pub registry: Registry,
    /// The root entity.
    pub root: Entity,
}

impl Replica {
    /// Creates a replica with an empty root entity named `root`.
    pub fn new() -> Self {
        Self::with_root("root")
    }

    /// Creates a replica with an empty root entity.
    pub fn with_root(gid: &str) -> Self {
        let registry = Registry::new();
        let root = registry
            .create_root(gid)
            .expect("fresh registry has no entities");
        Self { registry, root }
    }

    /// Deep export of the root, for comparing replicas.
    pub fn snapshot(&self) -> Changes {
        self.root.export(ExportOptions::deep())
    }
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}

/// Client → server link, tagging messages with the sending peer.
struct Uplink {
    peer: usize,
    tx: UnboundedSender<(usize, SyncMessage)>,
}

impl MessageSink for Uplink {
    fn send(&self, message: SyncMessage) -> SyncResult<()> {
        self.tx
            .send((self.peer, message))
            .map_err(|_| SyncError::transport("network dropped"))
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// A client attached to a [`Network`].
pub struct Peer {
    /// The client's replica.
    pub replica: Replica,
    /// The client.
    pub client: SyncClient,
    id: String,
    connected: bool,
    downlink: UnboundedReceiver<SyncMessage>,
}

impl Peer {
    /// Id the server assigned to this client.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// An in-memory relay network.
pub struct Network {
    server_replica: Replica,
    server: SyncServer,
    uplink_tx: UnboundedSender<(usize, SyncMessage)>,
    uplink_rx: UnboundedReceiver<(usize, SyncMessage)>,
    peers: Vec<Peer>,
    errors: Vec<String>,
    json_wire: bool,
}

impl Network {
    /// Creates a network around a server for a fresh replica.
    pub fn new() -> ServerResult<Self> {
        Self::with_replica(Replica::new(), ServerConfig::new())
    }

    /// Creates a network around a server for `replica`.
    ///
    /// Auto-commit is disabled regardless of `config`.
    pub fn with_replica(replica: Replica, config: ServerConfig) -> ServerResult<Self> {
        let server = SyncServer::new(&replica.root, config.with_auto_commit(None))?;
        server.start();
        let (uplink_tx, uplink_rx) = mpsc::unbounded_channel();
        Ok(Self {
            server_replica: replica,
            server,
            uplink_tx,
            uplink_rx,
            peers: Vec::new(),
            errors: Vec::new(),
            json_wire: false,
        })
    }

    /// Sends every delivered message through its JSON wire form.
    pub fn with_json_wire(mut self) -> Self {
        self.json_wire = true;
        self
    }

    /// Connects a client with a fresh replica. Returns the peer's index.
    pub fn add_client(&mut self) -> ServerResult<usize> {
        self.add_client_with(Replica::new(), ClientConfig::new())
    }

    /// Connects a client for `replica`. Auto-commit is disabled regardless
    /// of `config`.
    ///
    /// The server's greeting is queued; call [`pump`](Self::pump) to
    /// deliver it.
    pub fn add_client_with(&mut self, replica: Replica, config: ClientConfig) -> ServerResult<usize> {
        let index = self.peers.len();
        let uplink = Uplink {
            peer: index,
            tx: self.uplink_tx.clone(),
        };
        let client = SyncClient::new(&replica.root, uplink, config.with_auto_commit(None))?;
        client.start();

        let (down_tx, downlink) = mpsc::unbounded_channel();
        let id = self.server.connect(down_tx)?;
        self.peers.push(Peer {
            replica,
            client,
            id,
            connected: true,
            downlink,
        });
        Ok(index)
    }

    /// Disconnects a client from the server. Messages already queued in
    /// either direction are dropped when next pumped.
    pub fn disconnect(&mut self, index: usize) -> ServerResult<()> {
        let peer = &mut self.peers[index];
        peer.connected = false;
        self.server.disconnect(&peer.id)
    }

    /// Returns the server.
    pub fn server(&self) -> &SyncServer {
        &self.server
    }

    /// Returns the server's replica.
    pub fn server_replica(&self) -> &Replica {
        &self.server_replica
    }

    /// Returns the server's root entity.
    pub fn server_model(&self) -> &Entity {
        &self.server_replica.root
    }

    /// Returns a peer.
    pub fn peer(&self, index: usize) -> &Peer {
        &self.peers[index]
    }

    /// Returns a peer's root entity.
    pub fn model(&self, index: usize) -> &Entity {
        &self.peers[index].replica.root
    }

    /// Returns a peer's client.
    pub fn client(&self, index: usize) -> &SyncClient {
        &self.peers[index].client
    }

    /// Returns the number of peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Errors returned by `handle` calls while pumping.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Delivers queued messages until every channel is empty. Returns the
    /// number of delivered messages.
    ///
    /// Client → server traffic is drained first, in send order; then each
    /// peer's inbox, in peer order. Errors are recorded, not raised.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let mut progressed = false;

            while let Ok((index, message)) = self.uplink_rx.try_recv() {
                progressed = true;
                let peer = &self.peers[index];
                if !peer.connected {
                    continue;
                }
                delivered += 1;
                let message = match transmit(self.json_wire, message) {
                    Ok(message) => message,
                    Err(err) => {
                        self.errors.push(err.to_string());
                        continue;
                    }
                };
                if let Err(err) = self.server.handle(&peer.id, message) {
                    warn!(peer = index, error = %err, "server rejected message");
                    self.errors.push(err.to_string());
                }
            }

            for (index, peer) in self.peers.iter_mut().enumerate() {
                while let Ok(message) = peer.downlink.try_recv() {
                    progressed = true;
                    if !peer.connected {
                        continue;
                    }
                    delivered += 1;
                    let message = match transmit(self.json_wire, message) {
                        Ok(message) => message,
                        Err(err) => {
                            self.errors.push(err.to_string());
                            continue;
                        }
                    };
                    if let Err(err) = peer.client.handle(message) {
                        warn!(peer = index, error = %err, "client rejected message");
                        self.errors.push(err.to_string());
                    }
                }
            }

            if !progressed {
                return delivered;
            }
        }
    }

    /// Commits every replica, server first.
    pub fn commit_all(&self) {
        self.server.synchronizer().commit();
        for peer in self.peers.iter().filter(|peer| peer.connected) {
            peer.client.synchronizer().commit();
        }
    }

    /// Commits and pumps until no replica has anything left to say.
    pub fn settle(&mut self) {
        loop {
            self.commit_all();
            if self.pump() == 0 {
                return;
            }
        }
    }

    /// Returns true if every connected replica exports the same state as
    /// the server.
    pub fn converged(&self) -> bool {
        let expected = self.server_replica.snapshot();
        self.peers
            .iter()
            .filter(|peer| peer.connected)
            .all(|peer| peer.replica.snapshot() == expected)
    }
}

fn transmit(json_wire: bool, message: SyncMessage) -> ProtocolResult<SyncMessage> {
    if !json_wire {
        return Ok(message);
    }
    from_json(&to_json(&message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphsync_model::Field;

    #[test]
    fn greeting_is_delivered_on_pump() {
        init_tracing();
        let mut network = Network::new().unwrap();
        let a = network.add_client().unwrap();
        assert!(!network.client(a).is_connected());

        assert_eq!(network.pump(), 2);
        assert!(network.client(a).is_connected());
        assert_eq!(network.client(a).synchronizer().id(), network.peer(a).id());
    }

    #[test]
    fn edits_reach_everyone() {
        let mut network = Network::new().unwrap();
        let a = network.add_client().unwrap();
        let b = network.add_client().unwrap();
        network.pump();

        network.model(a).set("title", "hello");
        network.settle();

        assert_eq!(network.server_model().get("title"), Field::from("hello"));
        assert_eq!(network.model(b).get("title"), Field::from("hello"));
        assert!(network.converged());
        assert!(network.errors().is_empty());
    }

    #[test]
    fn json_wire_carries_nested_entities() {
        let mut network = Network::new().unwrap().with_json_wire();
        let a = network.add_client().unwrap();
        let b = network.add_client().unwrap();
        network.pump();

        let replica = &network.peer(a).replica;
        let child = replica
            .registry
            .builder("child")
            .field("n", 4)
            .create()
            .unwrap();
        replica.root.set("child", &child);
        network.settle();

        assert!(network.errors().is_empty());
        assert!(network.converged());
        let b_child = network.model(b).get("child");
        assert_eq!(b_child.as_entity().unwrap().get("n"), Field::from(4));
    }

    #[test]
    fn disconnected_peers_miss_updates() {
        let mut network = Network::new().unwrap();
        let a = network.add_client().unwrap();
        let b = network.add_client().unwrap();
        network.pump();
        network.disconnect(b).unwrap();

        network.model(a).set("title", "hello");
        network.settle();
        assert!(network.model(b).get("title").is_null());
        assert!(network.converged());
    }
}
