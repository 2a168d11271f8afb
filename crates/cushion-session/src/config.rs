//! Configuration for the session store.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default id namespace.
pub const DEFAULT_PREFIX: &str = "sess:";

/// Default number of expired sessions removed per cleanup run.
pub const DEFAULT_CLEANUP_BATCH_SIZE: usize = 100;

/// Default name of the expired-session view.
pub const DEFAULT_INDEX_NAME: &str = "express_expired_sessions";

/// Default name of the design document holding the view.
pub const DEFAULT_INDEX_DESIGN_NAME: &str = "expired_sessions";

/// Configuration for a [`crate::SessionStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prefix prepended to every session id.
    pub prefix: String,

    /// TTL in seconds applied to every write, overriding the cookie max age.
    pub ttl: Option<u64>,

    /// Make `touch` a no-op.
    pub disable_ttl_refresh: bool,

    /// Maximum sessions deleted per cleanup run.
    pub cleanup_batch_size: usize,

    /// View listing expired sessions.
    pub index_name: String,

    /// Design document holding the view.
    pub index_design_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            ttl: None,
            disable_ttl_refresh: false,
            cleanup_batch_size: DEFAULT_CLEANUP_BATCH_SIZE,
            index_name: DEFAULT_INDEX_NAME.to_string(),
            index_design_name: DEFAULT_INDEX_DESIGN_NAME.to_string(),
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the id prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set a TTL override in seconds.
    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.ttl = Some(seconds);
        self
    }

    /// Derive the TTL from the session cookie again.
    pub fn without_ttl(mut self) -> Self {
        self.ttl = None;
        self
    }

    /// Enable or disable TTL refresh on `touch`.
    pub fn with_ttl_refresh(mut self, enabled: bool) -> Self {
        self.disable_ttl_refresh = !enabled;
        self
    }

    /// Set the cleanup batch size.
    pub fn with_cleanup_batch_size(mut self, size: usize) -> Self {
        self.cleanup_batch_size = size;
        self
    }

    /// Set the design document and view used for cleanup.
    pub fn with_index(mut self, design: impl Into<String>, index: impl Into<String>) -> Self {
        self.index_design_name = design.into();
        self.index_name = index.into();
        self
    }

    /// Reject configurations the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(Error::Config("prefix must not be empty".to_string()));
        }
        if self.ttl == Some(0) {
            return Err(Error::Config("ttl override must be positive".to_string()));
        }
        if self.cleanup_batch_size == 0 {
            return Err(Error::Config(
                "cleanup_batch_size must be positive".to_string(),
            ));
        }
        if self.index_name.trim().is_empty() || self.index_design_name.trim().is_empty() {
            return Err(Error::Config(
                "index_name and index_design_name must not be empty".to_string(),
            ));
        }
        if self.index_design_name.contains('/') {
            return Err(Error::Config(format!(
                "index_design_name '{}' must not contain '/'",
                self.index_design_name
            )));
        }
        Ok(())
    }
}
