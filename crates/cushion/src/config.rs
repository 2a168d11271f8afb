//! CLI configuration file.
//!
//! ```toml
//! [database]
//! url = "https://account.cloudant.com"
//! name = "sessions"
//! username = "admin"
//! password = "secret"
//! timeout_secs = 30
//!
//! [store]
//! prefix = "sess:"
//! cleanup_batch_size = 100
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use cushion_couch::{CouchDatabase, DEFAULT_DATABASE};
use cushion_session::{SessionStore, StoreConfig};
use serde::Deserialize;

/// File read when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "cushion.toml";

/// Environment variable overriding the database URL.
pub const DB_URL_ENV: &str = "CUSHION_DB_URL";

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub database: DatabaseSection,
    pub store: StoreConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSection {
    /// Server URL, optionally with credentials.
    pub url: Option<String>,
    /// Database name.
    pub name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: None,
            name: DEFAULT_DATABASE.to_string(),
            username: None,
            password: None,
            timeout_secs: 30,
        }
    }
}

impl CliConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid configuration")
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `cushion.toml` in the
    /// working directory is used when present and defaults otherwise.
    /// `CUSHION_DB_URL` replaces the configured URL.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::load_file(&default)?
                } else {
                    tracing::debug!("No configuration file, using defaults");
                    Self::default()
                }
            }
        };

        if let Ok(url) = std::env::var(DB_URL_ENV)
            && !url.is_empty()
        {
            config.database.url = Some(url);
        }

        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Self::from_toml(&contents).with_context(|| format!("In {}", path.display()))
    }

    /// Build the database client described by `[database]`.
    pub fn database(&self) -> Result<CouchDatabase> {
        let Some(url) = &self.database.url else {
            bail!("No database URL configured (set [database].url or {DB_URL_ENV})");
        };

        let mut builder = CouchDatabase::builder()
            .url(url)
            .database(&self.database.name)
            .timeout(Duration::from_secs(self.database.timeout_secs));
        if let Some(username) = &self.database.username {
            builder = builder.username(username);
        }
        if let Some(password) = &self.database.password {
            builder = builder.password(password);
        }

        builder.build().context("Invalid database settings")
    }

    /// Build a session store over the configured database.
    pub fn open_store(&self) -> Result<SessionStore> {
        let db = self.database()?;
        SessionStore::new(Arc::new(db), self.store.clone()).context("Invalid store settings")
    }
}
