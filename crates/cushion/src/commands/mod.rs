//! CLI command handlers.

pub mod check;
pub mod cleanup;
pub mod destroy;
pub mod show;

use anyhow::Result;
use cushion_session::{SessionStore, StoreEvent};
use tokio::sync::broadcast::error::RecvError;

use crate::config::CliConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Loaded configuration.
    pub config: CliConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Open the configured store and forward its events to the log.
    pub fn store(&self) -> Result<SessionStore> {
        let store = self.config.open_store()?;
        spawn_event_logger(&store);
        Ok(store)
    }
}

fn spawn_event_logger(store: &SessionStore) {
    let mut events = store.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StoreEvent::Connect) => tracing::debug!("store connected"),
                Ok(StoreEvent::Disconnect) => tracing::debug!("store disconnected"),
                Ok(StoreEvent::Error(e)) => tracing::debug!(error = %e, "store error event"),
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
