//! Optimistic concurrency for session writes.
//!
//! A write is preceded by a cheap `head` probe whose revision becomes the
//! compare-and-swap hint. The probe and the write are two round trips, so the
//! probed revision may already be stale when the write lands; only the
//! database's answer to the write decides the outcome.

use tracing::{debug, trace};

use crate::database::{DatabaseError, Document, DocumentDatabase, Revision};
use crate::error::{Error, Result};

/// Result of probing the current revision of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// The document exists at this revision.
    Found(Revision),

    /// The document does not exist.
    NotFound,
}

impl Probe {
    /// The revision hint to attach to the next write.
    pub fn hint(&self) -> Option<&Revision> {
        match self {
            Probe::Found(rev) => Some(rev),
            Probe::NotFound => None,
        }
    }

    /// Consume the probe, keeping the revision if one was found.
    pub fn into_revision(self) -> Option<Revision> {
        match self {
            Probe::Found(rev) => Some(rev),
            Probe::NotFound => None,
        }
    }
}

/// Probe the current revision of `id`.
///
/// Not-found is a normal outcome; any other failure is returned as an error
/// and the caller must not write.
pub async fn probe(db: &dyn DocumentDatabase, id: &str) -> Result<Probe> {
    match db.head(id).await {
        Ok(rev) => {
            trace!(id = %id, rev = %rev, "Probe found revision");
            Ok(Probe::Found(rev))
        }
        Err(DatabaseError::NotFound(_)) => {
            trace!(id = %id, "Probe found no document");
            Ok(Probe::NotFound)
        }
        Err(e) => Err(e.into()),
    }
}

/// Write `doc` with the given revision hint.
///
/// A stale hint comes back as [`Error::Conflict`].
pub async fn write(db: &dyn DocumentDatabase, doc: &Document, hint: Option<&Revision>) -> Result<Revision> {
    match db.insert(doc, hint).await {
        Ok(rev) => {
            debug!(id = %doc.id, rev = %rev, "Document written");
            Ok(rev)
        }
        Err(DatabaseError::Conflict(_)) => {
            debug!(
                id = %doc.id,
                hint = hint.map(Revision::as_str).unwrap_or("<none>"),
                "Write lost revision race"
            );
            Err(Error::Conflict(doc.id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}
