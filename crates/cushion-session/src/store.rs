//! The session store facade.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::cleanup::{CleanupReport, CleanupScheduler};
use crate::clock::{Clock, SystemClock};
use crate::codec;
use crate::config::StoreConfig;
use crate::database::{DatabaseError, DocumentDatabase, Revision};
use crate::error::{Error, Result};
use crate::events::{ConnectionState, EventHub, StoreEvent};
use crate::expiry::{self, Liveness};
use crate::revision;
use crate::session::{Session, SessionRecord};
use crate::ttl;

/// The operations a session middleware needs from its store.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Fetch a live session. `Ok(None)` means there is no valid session.
    async fn get(&self, sid: &str) -> Result<Option<SessionRecord>>;

    /// Write a session.
    async fn set(&self, sid: &str, session: &mut Session) -> Result<()>;

    /// Remove a session.
    async fn destroy(&self, sid: &str) -> Result<()>;

    /// Refresh a session's TTL.
    async fn touch(&self, sid: &str, session: &mut Session) -> Result<()>;
}

/// State shared by all clones of a store.
struct StoreInner {
    db: Arc<dyn DocumentDatabase>,
    config: StoreConfig,
    cleanup: CleanupScheduler,
    events: EventHub,
    clock: Arc<dyn Clock>,
}

/// Session store over a [`DocumentDatabase`].
///
/// The store keeps no session state of its own: every operation reads from
/// and writes to the database. Clones share configuration and the event
/// channel; separate stores are fully independent.
///
/// Failures other than not-found are returned to the caller and also sent to
/// subscribers as [`StoreEvent::Error`].
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("config", &self.inner.config)
            .field("connection", &self.inner.events.state())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Create a store. Fails if `config` is invalid; no I/O is performed.
    pub fn new(db: Arc<dyn DocumentDatabase>, config: StoreConfig) -> Result<Self> {
        Self::builder(db).config(config).build()
    }

    /// Start building a store.
    pub fn builder(db: Arc<dyn DocumentDatabase>) -> StoreBuilder {
        StoreBuilder::new(db)
    }

    /// The store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Subscribe to lifecycle events from this store.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// Outcome of the most recent connection check.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.events.state()
    }

    /// Namespaced document id for a session id.
    pub fn key(&self, sid: &str) -> String {
        format!("{}{}", self.inner.config.prefix, sid)
    }

    fn db(&self) -> &dyn DocumentDatabase {
        self.inner.db.as_ref()
    }

    fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    /// Log a failed operation, raise it as an event and hand it back.
    fn fail(&self, op: &str, sid: &str, err: impl Into<Error>) -> Error {
        let err = err.into();
        warn!(op, session_id = %sid, error = %err, "Session operation failed");
        self.inner.events.emit(StoreEvent::Error(err.clone()));
        err
    }

    /// Fetch a live session.
    ///
    /// An expired session is reported as absent and destroyed in a detached
    /// task. That task's failures only surface as error events.
    pub async fn get(&self, sid: &str) -> Result<Option<SessionRecord>> {
        debug!(session_id = %sid, "GET session");

        match self.fetch("get", sid).await? {
            Liveness::Live(record) => {
                trace!(
                    session_id = %sid,
                    rev = record.revision().map(|r| r.as_str()).unwrap_or(""),
                    "Session found"
                );
                Ok(Some(record))
            }
            Liveness::Expired(record) => {
                debug!(
                    session_id = %sid,
                    expired_at = record.expires_at_millis(),
                    "Session expired, destroying in background"
                );
                self.spawn_destroy(sid, record.revision().cloned());
                Ok(None)
            }
            Liveness::Absent => Ok(None),
        }
    }

    /// Fetch a session and classify it without side effects.
    ///
    /// Unlike [`get`](Self::get), an expired record is returned as
    /// [`Liveness::Expired`] and left in place.
    pub async fn inspect(&self, sid: &str) -> Result<Liveness> {
        debug!(session_id = %sid, "INSPECT session");
        self.fetch("inspect", sid).await
    }

    async fn fetch(&self, op: &str, sid: &str) -> Result<Liveness> {
        let id = self.key(sid);

        let doc = match self.db().get(&id).await {
            Ok(doc) => doc,
            Err(DatabaseError::NotFound(_)) => {
                debug!(session_id = %sid, "Session not found");
                return Ok(Liveness::Absent);
            }
            Err(e) => return Err(self.fail(op, sid, e)),
        };

        let record = codec::decode(doc).map_err(|e| self.fail(op, sid, e))?;
        Ok(expiry::evaluate(Some(record), self.now()))
    }

    /// Destroy an expired session in a detached task, unless it has been
    /// rewritten since it was read.
    fn spawn_destroy(&self, sid: &str, expired_rev: Option<Revision>) {
        let store = self.clone();
        let sid = sid.to_string();
        tokio::spawn(async move {
            // Failures were already emitted by remove itself.
            let _ = store.remove(&sid, expired_rev.as_ref()).await;
        });
    }

    /// Write a session with optimistic concurrency.
    ///
    /// The current revision is probed and attached to the write; the
    /// caller's `session.revision` is set to the probed revision (cleared
    /// when the session is new). A concurrent writer that lands between the
    /// probe and the write makes this fail with [`Error::Conflict`].
    pub async fn set(&self, sid: &str, session: &mut Session) -> Result<()> {
        let id = self.key(sid);

        let probe = revision::probe(self.db(), &id)
            .await
            .map_err(|e| self.fail("set", sid, e))?;
        session.revision = probe.hint().cloned();

        debug!(
            session_id = %sid,
            rev = probe.hint().map(|r| r.as_str()).unwrap_or("<new>"),
            "SET session"
        );

        let ttl = ttl::compute_ttl(session.cookie_max_age_millis(), self.inner.config.ttl);
        let doc = codec::encode(&id, session, ttl, self.now());

        revision::write(self.db(), &doc, probe.hint())
            .await
            .map_err(|e| self.fail("set", sid, e))?;
        Ok(())
    }

    /// Remove a session.
    ///
    /// The session is fetched first to learn its revision. A session that is
    /// already gone is not an error, but a delete that finds nothing after
    /// the fetch succeeded is: something else removed it in between.
    pub async fn destroy(&self, sid: &str) -> Result<()> {
        debug!(session_id = %sid, "DESTROY session");
        self.remove(sid, None).await
    }

    /// Remove a session only while its stored revision is still `rev`.
    ///
    /// A session that is gone or has been rewritten since is left alone and
    /// is not an error.
    pub async fn destroy_revision(&self, sid: &str, rev: &Revision) -> Result<()> {
        debug!(session_id = %sid, rev = %rev, "DESTROY session revision");
        self.remove(sid, Some(rev)).await
    }

    /// Fetch-then-delete. With `expected`, a session whose stored revision
    /// differs is left alone.
    async fn remove(&self, sid: &str, expected: Option<&Revision>) -> Result<()> {
        let id = self.key(sid);

        let doc = match self.db().get(&id).await {
            Ok(doc) => doc,
            Err(DatabaseError::NotFound(_)) => {
                debug!(session_id = %sid, "Session already absent");
                return Ok(());
            }
            Err(e) => return Err(self.fail("destroy", sid, e)),
        };

        let Some(rev) = doc.rev else {
            return Err(self.fail(
                "destroy",
                sid,
                DatabaseError::Malformed(format!("document '{id}' has no revision")),
            ));
        };

        if let Some(expected) = expected
            && *expected != rev
        {
            debug!(
                session_id = %sid,
                expected = %expected,
                current = %rev,
                "Session rewritten since it expired, keeping it"
            );
            return Ok(());
        }

        self.db()
            .delete(&id, &rev)
            .await
            .map_err(|e| self.fail("destroy", sid, e))
    }

    /// Refresh a session's TTL.
    ///
    /// Rewrites the stored payload with a TTL computed from the caller's
    /// cookie and a fresh modification time, and copies the stored revision
    /// onto `session`. Does nothing at all when TTL refresh is disabled, or
    /// when the session no longer exists.
    pub async fn touch(&self, sid: &str, session: &mut Session) -> Result<()> {
        if self.inner.config.disable_ttl_refresh {
            trace!(session_id = %sid, "TOUCH skipped, TTL refresh disabled");
            return Ok(());
        }

        debug!(session_id = %sid, "TOUCH session");
        let id = self.key(sid);

        let doc = match self.db().get(&id).await {
            Ok(doc) => doc,
            Err(DatabaseError::NotFound(_)) => {
                debug!(session_id = %sid, "Nothing to touch");
                return Ok(());
            }
            Err(e) => return Err(self.fail("touch", sid, e)),
        };

        let stored = codec::decode(doc).map_err(|e| self.fail("touch", sid, e))?;
        session.revision = stored.session.revision.clone();

        let ttl = ttl::compute_ttl(session.cookie_max_age_millis(), self.inner.config.ttl);
        let doc = codec::encode(&id, &stored.session, ttl, self.now());

        revision::write(self.db(), &doc, stored.revision())
            .await
            .map_err(|e| self.fail("touch", sid, e))?;
        Ok(())
    }

    /// Delete up to `max_batch` expired sessions in one bulk write.
    pub async fn cleanup_expired(&self, max_batch: usize) -> Result<CleanupReport> {
        self.inner
            .cleanup
            .cleanup_expired(self.db(), max_batch)
            .await
            .map_err(|e| self.fail("cleanup", "*", e))
    }

    /// [`cleanup_expired`](Self::cleanup_expired) with the configured batch size.
    pub async fn cleanup_expired_default(&self) -> Result<CleanupReport> {
        self.cleanup_expired(self.inner.config.cleanup_batch_size)
            .await
    }

    /// Make sure the expired-session index exists.
    pub async fn ensure_index(&self) -> Result<()> {
        self.inner
            .cleanup
            .ensure_index(self.db())
            .await
            .map_err(|e| self.fail("ensure_index", "*", e))
    }

    /// Check that the database is reachable.
    ///
    /// Emits [`StoreEvent::Connect`] or [`StoreEvent::Disconnect`]. An
    /// unreachable database is reported through the returned state, not as
    /// an error.
    pub async fn check_connection(&self) -> ConnectionState {
        match self.db().info().await {
            Ok(()) => {
                debug!("Database reachable");
                self.inner.events.emit(StoreEvent::Connect);
                ConnectionState::Connected
            }
            Err(e) => {
                warn!(error = %e, "Database not reachable");
                self.inner.events.emit(StoreEvent::Disconnect);
                ConnectionState::Disconnected
            }
        }
    }
}

#[async_trait]
impl SessionBackend for SessionStore {
    async fn get(&self, sid: &str) -> Result<Option<SessionRecord>> {
        SessionStore::get(self, sid).await
    }

    async fn set(&self, sid: &str, session: &mut Session) -> Result<()> {
        SessionStore::set(self, sid, session).await
    }

    async fn destroy(&self, sid: &str) -> Result<()> {
        SessionStore::destroy(self, sid).await
    }

    async fn touch(&self, sid: &str, session: &mut Session) -> Result<()> {
        SessionStore::touch(self, sid, session).await
    }
}

/// Builder for a [`SessionStore`].
pub struct StoreBuilder {
    db: Arc<dyn DocumentDatabase>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
}

impl StoreBuilder {
    /// Create a builder with default configuration and the system clock.
    pub fn new(db: Arc<dyn DocumentDatabase>) -> Self {
        Self {
            db,
            config: StoreConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the clock used for modification times and expiry checks.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and build the store.
    pub fn build(self) -> Result<SessionStore> {
        self.config.validate()?;
        let cleanup = CleanupScheduler::from_config(&self.config);
        Ok(SessionStore {
            inner: Arc::new(StoreInner {
                db: self.db,
                config: self.config,
                cleanup,
                events: EventHub::new(),
                clock: self.clock,
            }),
        })
    }
}
