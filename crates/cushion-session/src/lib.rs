//! Session persistence and expiration over a revisioned document database.
//!
//! This crate stores web session payloads as documents, with:
//! - Optimistic concurrency: every write carries the revision it was based on
//! - TTL policy derived from a store override or the session cookie
//! - Lazy expiry: expired sessions are hidden on read and destroyed in the
//!   background
//! - Batch cleanup of expired sessions through a secondary index
//!
//! The database itself is a collaborator behind [`DocumentDatabase`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cushion_session::{MemoryDatabase, Session, SessionStore, StoreConfig};
//!
//! let store = SessionStore::new(Arc::new(MemoryDatabase::new()), StoreConfig::default())?;
//!
//! let mut session = Session::new().with_cookie_max_age(3_600_000);
//! store.set("abc", &mut session).await?;
//! let record = store.get("abc").await?;
//! ```

pub mod cleanup;
pub mod clock;
pub mod codec;
mod config;
mod database;
mod error;
mod events;
pub mod expiry;
mod memory;
pub mod revision;
mod session;
mod store;
pub mod ttl;

pub use cleanup::{CleanupReport, CleanupScheduler};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DEFAULT_CLEANUP_BATCH_SIZE, DEFAULT_INDEX_DESIGN_NAME, DEFAULT_INDEX_NAME, DEFAULT_PREFIX,
    StoreConfig,
};
pub use database::{
    BulkItemResult, BulkOp, DatabaseError, DbResult, Document, DocumentDatabase, IndexPage,
    IndexRow, Revision,
};
pub use error::{Error, ErrorKind, Result};
pub use events::{ConnectionState, StoreEvent};
pub use expiry::Liveness;
pub use memory::{DbCall, DbOp, MemoryDatabase};
pub use session::{Session, SessionRecord};
pub use store::{SessionBackend, SessionStore, StoreBuilder};
