//! Session hub: one relay server per session.

use crate::config::HubConfig;
use crate::error::{ServerError, ServerResult};
use crate::server::SyncServer;
use graphsync_engine::MessageSink;
use graphsync_model::{Entity, ModelResult, Observers, Registry, Subscription};
use graphsync_protocol::{HubInfo, SessionInfo, SessionRequest, SyncMessage, Uuid};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Creates the model of a new session in the session's registry, given the
/// session id.
pub type ModelFactory = dyn Fn(&str, &Registry) -> ModelResult<Entity> + Send + Sync;

/// Something that happened on a [`SessionHub`].
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A session was created and its server started.
    SessionCreated {
        /// Session id.
        id: String,
        /// The session's model.
        model: Entity,
    },
    /// A session was closed and its model destroyed.
    SessionClosed(String),
}

/// Hosts isolated sessions, each with its own model and [`SyncServer`].
pub struct SessionHub {
    config: HubConfig,
    factory: Arc<ModelFactory>,
    sessions: RwLock<BTreeMap<String, SyncServer>>,
    events: Observers<HubEvent>,
}

impl SessionHub {
    /// Creates a hub whose sessions start from an empty root entity.
    pub fn new(config: HubConfig) -> Self {
        let root_gid = config.root_gid.clone();
        Self::with_factory(config, move |_session, registry| {
            registry.create_root(root_gid.as_str())
        })
    }

    /// Creates a hub with a custom session model factory.
    pub fn with_factory<F>(config: HubConfig, factory: F) -> Self
    where
        F: Fn(&str, &Registry) -> ModelResult<Entity> + Send + Sync + 'static,
    {
        Self {
            config,
            factory: Arc::new(factory),
            sessions: RwLock::new(BTreeMap::new()),
            events: Observers::new(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Subscribes to hub events.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&HubEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    /// Greets a client connecting to the hub.
    pub fn connect(&self, sink: &dyn MessageSink) -> ServerResult<()> {
        sink.send(SyncMessage::ConnectionHub(HubInfo {
            use_client_model: self.config.use_client_model,
        }))?;
        Ok(())
    }

    /// Handles a message sent to the hub, replying through `sink`.
    pub fn handle(&self, sink: &dyn MessageSink, message: SyncMessage) -> ServerResult<()> {
        match message {
            SyncMessage::CreateSession(request) => {
                let id = self.create_session(request)?;
                sink.send(SyncMessage::SessionCreated(SessionInfo { id }))?;
                Ok(())
            }
            other => Err(ServerError::InvalidRequest(format!(
                "'{}' is not accepted by a session hub",
                other.event_name()
            ))),
        }
    }

    /// Creates and starts a session. With `use_client_model`, state offered
    /// in the request replaces the fresh model's state.
    pub fn create_session(&self, request: SessionRequest) -> ServerResult<String> {
        let id = Uuid::new_v4().to_string();
        info!(session = %id, "creating session");

        let registry = Registry::new();
        let model = (self.factory)(&id, &registry)?;
        let server = SyncServer::new(&model, self.config.server.clone())?;
        if self.config.use_client_model {
            if let Some(state) = request.state {
                server.synchronizer().set_full_state(state)?;
            }
        }
        server.start();

        self.sessions.write().insert(id.clone(), server);
        self.events.notify(&HubEvent::SessionCreated {
            id: id.clone(),
            model,
        });
        Ok(id)
    }

    /// Returns the server of a session.
    pub fn server(&self, session: &str) -> Option<SyncServer> {
        self.sessions.read().get(session).cloned()
    }

    /// Returns the ids of open sessions.
    pub fn sessions(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Disconnects a client from a session, closing the session when it was
    /// the last one.
    pub fn disconnect(&self, session: &str, client: &str) -> ServerResult<()> {
        let server = self
            .server(session)
            .ok_or_else(|| ServerError::UnknownSession(session.to_string()))?;
        server.disconnect(client)?;
        if server.client_count() == 0 {
            self.close_session(session)?;
        }
        Ok(())
    }

    /// Destroys a session's server and model.
    pub fn close_session(&self, session: &str) -> ServerResult<()> {
        let server = self
            .sessions
            .write()
            .remove(session)
            .ok_or_else(|| ServerError::UnknownSession(session.to_string()))?;
        info!(session, "closing session");
        server.destroy();
        self.events
            .notify(&HubEvent::SessionClosed(session.to_string()));
        Ok(())
    }

    /// Stops every session's server.
    pub fn stop(&self) {
        let servers: Vec<SyncServer> = self.sessions.read().values().cloned().collect();
        for server in servers {
            server.stop();
        }
    }

    /// Stops and destroys every session.
    pub fn destroy(&self) {
        self.stop();
        let sessions = std::mem::take(&mut *self.sessions.write());
        for server in sessions.into_values() {
            server.destroy();
        }
    }
}

impl std::fmt::Debug for SessionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHub")
            .field("config", &self.config)
            .field("sessions", &self.sessions.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use graphsync_engine::MockSink;
    use graphsync_model::Field;
    use graphsync_protocol::{Changes, Commit, CommitSet, Gid, Value};

    fn config() -> HubConfig {
        HubConfig::new().with_server(ServerConfig::new().with_auto_commit(None))
    }

    fn seed(title: &str) -> CommitSet {
        let mut changes = Changes::new();
        changes.insert("title".to_string(), Value::from(title));
        let mut state = CommitSet::new();
        state.insert(
            Gid::from("root"),
            Commit::new("client", 0, 0).with_changes(changes),
        );
        state
    }

    #[test]
    fn greets_with_hub_info() {
        let hub = SessionHub::new(config().with_client_model(true));
        let sink = MockSink::new();
        hub.connect(&sink).unwrap();
        assert_eq!(
            sink.take(),
            vec![SyncMessage::ConnectionHub(HubInfo {
                use_client_model: true
            })]
        );
    }

    #[test]
    fn create_session_replies_with_id() {
        let hub = SessionHub::new(config());
        let sink = MockSink::new();
        hub.handle(&sink, SyncMessage::CreateSession(SessionRequest::default()))
            .unwrap();

        let sent = sink.take();
        let SyncMessage::SessionCreated(info) = &sent[0] else {
            panic!("expected session-created, got {:?}", sent[0]);
        };
        let server = hub.server(&info.id).unwrap();
        assert_eq!(server.model().gid().as_str(), "root");
        assert!(server.synchronizer().is_active());
    }

    #[test]
    fn sessions_are_isolated() {
        let hub = SessionHub::new(config());
        let a = hub.create_session(SessionRequest::default()).unwrap();
        let b = hub.create_session(SessionRequest::default()).unwrap();
        assert_ne!(a, b);

        hub.server(&a).unwrap().model().set("title", "a");
        assert!(hub.server(&b).unwrap().model().get("title").is_null());
    }

    #[test]
    fn client_model_seeds_the_session() {
        let hub = SessionHub::new(config().with_client_model(true));
        let id = hub
            .create_session(SessionRequest {
                state: Some(seed("from client")),
            })
            .unwrap();
        assert_eq!(
            hub.server(&id).unwrap().model().get("title"),
            Field::from("from client")
        );

        let hub = SessionHub::new(config());
        let id = hub
            .create_session(SessionRequest {
                state: Some(seed("ignored")),
            })
            .unwrap();
        assert!(hub.server(&id).unwrap().model().get("title").is_null());
    }

    #[test]
    fn last_client_leaving_closes_the_session() {
        let hub = SessionHub::new(config());
        let closed = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let store = closed.clone();
        let _sub = hub.subscribe(move |event| {
            if let HubEvent::SessionClosed(id) = event {
                store.lock().push(id.clone());
            }
        });

        let id = hub.create_session(SessionRequest::default()).unwrap();
        let server = hub.server(&id).unwrap();
        let first = server.connect(MockSink::new()).unwrap();
        let second = server.connect(MockSink::new()).unwrap();

        hub.disconnect(&id, &first).unwrap();
        assert!(hub.server(&id).is_some());
        hub.disconnect(&id, &second).unwrap();
        assert!(hub.server(&id).is_none());
        assert!(server.model().is_destroyed());
        assert_eq!(*closed.lock(), vec![id.clone()]);

        assert!(matches!(
            hub.close_session(&id),
            Err(ServerError::UnknownSession(_))
        ));
    }

    #[test]
    fn custom_factory() {
        let hub = SessionHub::with_factory(config(), |session, registry| {
            registry
                .builder("scene")
                .root()
                .field("session", session)
                .create()
        });
        let id = hub.create_session(SessionRequest::default()).unwrap();
        let model = hub.server(&id).unwrap().model().clone();
        assert_eq!(model.get("session"), Field::from(id.as_str()));
    }

    #[test]
    fn destroy_closes_everything() {
        let hub = SessionHub::new(config());
        let id = hub.create_session(SessionRequest::default()).unwrap();
        let model = hub.server(&id).unwrap().model().clone();

        hub.destroy();
        assert!(hub.sessions().is_empty());
        assert!(model.is_destroyed());
    }
}
