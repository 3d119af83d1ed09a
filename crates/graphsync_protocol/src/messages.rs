//! Relay messages exchanged between clients, servers and session hubs.

use crate::commit::CommitSet;
use serde::{Deserialize, Serialize};

/// A relay protocol message.
///
/// Serialized as `{"event": "<kebab-case name>", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SyncMessage {
    /// Server → client: connection accepted.
    Connected(ConnectedInfo),
    /// New or merged commits.
    Push(CommitSet),
    /// Complete state of every synced entity.
    FullState(CommitSet),
    /// Opaque application payload relayed to the other clients.
    Message(serde_json::Value),
    /// Hub → client: hub greeting.
    ConnectionHub(HubInfo),
    /// Client → hub: request a new session.
    CreateSession(SessionRequest),
    /// Hub → client: session created.
    SessionCreated(SessionInfo),
}

impl SyncMessage {
    /// Returns the wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            SyncMessage::Connected(_) => "connected",
            SyncMessage::Push(_) => "push",
            SyncMessage::FullState(_) => "full-state",
            SyncMessage::Message(_) => "message",
            SyncMessage::ConnectionHub(_) => "connection-hub",
            SyncMessage::CreateSession(_) => "create-session",
            SyncMessage::SessionCreated(_) => "session-created",
        }
    }
}

/// Connection info sent to a newly connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedInfo {
    /// Id assigned to the client; the client adopts it as its sync id.
    pub id: String,
    /// Sync id of the server's synchronizer.
    #[serde(rename = "serverSyncID")]
    pub server_sync_id: String,
}

/// Hub greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubInfo {
    /// Whether new sessions are seeded from the first client's state.
    #[serde(rename = "useClientModel")]
    pub use_client_model: bool,
}

/// Request for a new session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Initial state, used when the hub seeds sessions from clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<CommitSet>,
}

/// A created session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session id.
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::Commit;
    use crate::gid::Gid;

    #[test]
    fn event_names_match_wire_tags() {
        let messages = vec![
            SyncMessage::Connected(ConnectedInfo {
                id: "c1".into(),
                server_sync_id: "s".into(),
            }),
            SyncMessage::Push(CommitSet::new()),
            SyncMessage::FullState(CommitSet::new()),
            SyncMessage::Message(serde_json::json!("hi")),
            SyncMessage::ConnectionHub(HubInfo {
                use_client_model: true,
            }),
            SyncMessage::CreateSession(SessionRequest::default()),
            SyncMessage::SessionCreated(SessionInfo { id: "x".into() }),
        ];

        for message in messages {
            let json = serde_json::to_value(&message).unwrap();
            assert_eq!(json["event"], message.event_name());
        }
    }

    #[test]
    fn push_payload_is_keyed_by_gid() {
        let mut commits = CommitSet::new();
        commits.insert(Gid::from("root"), Commit::new("s", 1, 0));
        let json = serde_json::to_value(SyncMessage::Push(commits)).unwrap();
        assert_eq!(json["data"]["root"]["version"], 1);
    }

    #[test]
    fn connected_uses_wire_field_names() {
        let json = serde_json::to_value(SyncMessage::Connected(ConnectedInfo {
            id: "c1".into(),
            server_sync_id: "srv".into(),
        }))
        .unwrap();
        assert_eq!(json["data"]["serverSyncID"], "srv");
    }
}
