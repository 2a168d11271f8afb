//! The document database contract consumed by the session store.
//!
//! The store never talks to a database directly. Everything it needs is
//! expressed by [`DocumentDatabase`]: single-document CRUD with revision
//! tokens, a bulk write, and a query against a secondary index. The HTTP
//! implementation lives in `cushion-couch`; [`crate::MemoryDatabase`] is an
//! in-process implementation for tests and embedding.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved field carrying the document id.
pub const ID_FIELD: &str = "_id";

/// Reserved field carrying the document revision.
pub const REV_FIELD: &str = "_rev";

/// Reserved field marking a deleted document in bulk writes.
pub const DELETED_FIELD: &str = "_deleted";

/// Opaque revision token assigned by the database on every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Wrap a raw revision string.
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    /// Borrow the raw revision string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Revision {
    fn from(rev: &str) -> Self {
        Self::new(rev)
    }
}

/// A stored document: id, revision and the remaining JSON body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    /// Document id (already namespaced by the caller).
    pub id: String,

    /// Current revision, if the document came from the database.
    pub rev: Option<Revision>,

    /// Body without the reserved `_id` / `_rev` fields.
    pub body: Map<String, Value>,
}

impl Document {
    /// Create a document without a revision.
    pub fn new(id: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            body,
        }
    }

    /// Attach a revision.
    pub fn with_rev(mut self, rev: Revision) -> Self {
        self.rev = Some(rev);
        self
    }

    /// Render as a single JSON object with `_id` (and `_rev` when known).
    pub fn to_json(&self) -> Value {
        let mut obj = self.body.clone();
        obj.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        if let Some(rev) = &self.rev {
            obj.insert(REV_FIELD.to_string(), Value::String(rev.0.clone()));
        }
        Value::Object(obj)
    }

    /// Parse a JSON object carrying `_id` and optionally `_rev`.
    pub fn from_json(value: Value) -> DbResult<Self> {
        let Value::Object(mut body) = value else {
            return Err(DatabaseError::Malformed(
                "document is not a JSON object".to_string(),
            ));
        };

        let id = match body.remove(ID_FIELD) {
            Some(Value::String(id)) => id,
            _ => {
                return Err(DatabaseError::Malformed(
                    "document has no string _id".to_string(),
                ));
            }
        };

        let rev = match body.remove(REV_FIELD) {
            Some(Value::String(rev)) => Some(Revision(rev)),
            Some(_) => {
                return Err(DatabaseError::Malformed(format!(
                    "document '{id}' has a non-string _rev"
                )));
            }
            None => None,
        };

        Ok(Self { id, rev, body })
    }
}

/// One entry of a bulk write request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOp {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_rev")]
    pub rev: Revision,

    #[serde(rename = "_deleted", default)]
    pub deleted: bool,
}

impl BulkOp {
    /// A deletion marker for `(id, rev)`.
    pub fn delete(id: impl Into<String>, rev: Revision) -> Self {
        Self {
            id: id.into(),
            rev,
            deleted: true,
        }
    }
}

/// Per-document outcome of a bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BulkItemResult {
    /// Successful outcome with the new revision.
    pub fn ok(id: impl Into<String>, rev: Revision) -> Self {
        Self {
            id: id.into(),
            rev: Some(rev),
            error: None,
            reason: None,
        }
    }

    /// Failed outcome.
    pub fn failed(id: impl Into<String>, error: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            error: Some(error.into()),
            reason: Some(reason.into()),
        }
    }

    /// Whether this item was written.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A row returned by a secondary index query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub key: Value,

    #[serde(default)]
    pub value: Value,
}

/// A page of index rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexPage {
    /// Total matching rows in the index, regardless of the limit.
    #[serde(default)]
    pub total_rows: u64,

    #[serde(default)]
    pub rows: Vec<IndexRow>,
}

/// Errors reported by a [`DocumentDatabase`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseError {
    /// The document (or index) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The supplied revision is not the current one.
    #[error("document update conflict: {0}")]
    Conflict(String),

    /// Rate limiting or a server-side failure.
    #[error("transient failure ({status}): {message}")]
    Transient { status: u16, message: String },

    /// The database could not be reached.
    #[error("database unavailable: {0}")]
    Unavailable(String),

    /// The database refused the request.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The database answered with something that could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl DatabaseError {
    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound(_))
    }

    /// Check if this is a revision conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DatabaseError::Conflict(_))
    }

    /// Check if this is a network, rate-limit or server-side failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DatabaseError::Transient { .. } | DatabaseError::Unavailable(_)
        )
    }
}

/// Result type for database operations.
pub type DbResult<T> = std::result::Result<T, DatabaseError>;

/// A revisioned document database.
///
/// Implementations must keep not-found distinguishable from every other
/// failure, and must enforce the revision hint on [`insert`](Self::insert)
/// as a compare-and-swap: a stale or missing hint for an existing document
/// is a [`DatabaseError::Conflict`].
#[async_trait]
pub trait DocumentDatabase: Send + Sync {
    /// Check that the database exists and is reachable.
    async fn info(&self) -> DbResult<()>;

    /// Fetch a document with its body.
    async fn get(&self, id: &str) -> DbResult<Document>;

    /// Fetch only the current revision of a document.
    async fn head(&self, id: &str) -> DbResult<Revision>;

    /// Create or replace a document, returning the new revision.
    ///
    /// `rev` is the revision the caller believes is current; `None` means
    /// the document is expected not to exist yet.
    async fn insert(&self, doc: &Document, rev: Option<&Revision>) -> DbResult<Revision>;

    /// Delete a document at the given revision.
    async fn delete(&self, id: &str, rev: &Revision) -> DbResult<()>;

    /// Apply several writes in one request.
    async fn bulk_write(&self, ops: &[BulkOp]) -> DbResult<Vec<BulkItemResult>>;

    /// Query a secondary index, returning at most `limit` rows.
    async fn query_index(&self, design: &str, index: &str, limit: usize) -> DbResult<IndexPage>;
}
