//! Lifecycle signals emitted by a session store.

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::Error;

/// Number of undelivered events a slow subscriber may lag behind.
const EVENT_CAPACITY: usize = 64;

/// A lifecycle signal.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// The database answered a connection check.
    Connect,
    /// A connection check failed.
    Disconnect,
    /// An operation failed; the same error was returned to its caller.
    Error(Error),
}

/// Last observed reachability of the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

/// Per-store event channel.
#[derive(Debug)]
pub(crate) struct EventHub {
    tx: broadcast::Sender<StoreEvent>,
    state: Mutex<ConnectionState>,
}

impl EventHub {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tx,
            state: Mutex::new(ConnectionState::Unknown),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        match &event {
            StoreEvent::Connect => *self.state.lock() = ConnectionState::Connected,
            StoreEvent::Disconnect => *self.state.lock() = ConnectionState::Disconnected,
            StoreEvent::Error(_) => {}
        }
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}
