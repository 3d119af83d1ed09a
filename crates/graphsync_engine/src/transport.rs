//! Transport abstraction for relay messages.

use crate::error::{SyncError, SyncResult};
use graphsync_protocol::SyncMessage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// The sending half of a connection to a peer.
///
/// Clients and servers only ever push messages out; incoming messages are
/// fed to their `handle` methods by whatever owns the connection. This keeps
/// the engine independent of sockets, so a WebSocket, an in-memory channel
/// or a mock can sit behind it.
pub trait MessageSink: Send + Sync {
    /// Sends a message to the peer.
    fn send(&self, message: SyncMessage) -> SyncResult<()>;

    /// Checks if the peer can still receive messages.
    fn is_open(&self) -> bool {
        true
    }
}

impl MessageSink for UnboundedSender<SyncMessage> {
    fn send(&self, message: SyncMessage) -> SyncResult<()> {
        UnboundedSender::send(self, message)
            .map_err(|err| SyncError::transport(format!("peer went away: {err}")))
    }

    fn is_open(&self) -> bool {
        !self.is_closed()
    }
}

impl<T: MessageSink + ?Sized> MessageSink for Arc<T> {
    fn send(&self, message: SyncMessage) -> SyncResult<()> {
        (**self).send(message)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// A sink recording sent messages, for testing.
#[derive(Debug)]
pub struct MockSink {
    connected: AtomicBool,
    sent: Mutex<Vec<SyncMessage>>,
}

impl MockSink {
    /// Creates a connected mock sink.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns a copy of the messages sent so far.
    pub fn sent(&self) -> Vec<SyncMessage> {
        self.sent.lock().clone()
    }

    /// Drains the messages sent so far.
    pub fn take(&self) -> Vec<SyncMessage> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSink for MockSink {
    fn send(&self, message: SyncMessage) -> SyncResult<()> {
        if !self.is_open() {
            return Err(SyncError::NotConnected);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
