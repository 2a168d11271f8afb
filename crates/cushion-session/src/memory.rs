//! In-process [`DocumentDatabase`] with real revision semantics.
//!
//! Revisions are enforced the same way a CouchDB server enforces them, so the
//! store's optimistic concurrency can be exercised without a network. Every
//! call is logged, and failures can be injected per operation.
//!
//! Secondary indexes cannot run JavaScript here. A design document is only
//! recorded; querying any of its views evaluates the session-expiry
//! predicate against the database clock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::codec::{MODIFIED_FIELD, TTL_FIELD};
use crate::database::{
    BulkItemResult, BulkOp, DatabaseError, DbResult, Document, DocumentDatabase, IndexPage,
    IndexRow, Revision,
};
use crate::expiry::is_expired;

/// Prefix of design document ids.
const DESIGN_PREFIX: &str = "_design/";

/// Operations that can have failures injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbOp {
    Info,
    Get,
    Head,
    Insert,
    Delete,
    BulkWrite,
    QueryIndex,
}

/// A logged call.
#[derive(Debug, Clone, PartialEq)]
pub enum DbCall {
    Info,
    Get(String),
    Head(String),
    Insert { id: String, rev: Option<Revision> },
    Delete { id: String, rev: Revision },
    BulkWrite(Vec<BulkOp>),
    QueryIndex { design: String, index: String, limit: usize },
}

impl DbCall {
    fn op(&self) -> DbOp {
        match self {
            DbCall::Info => DbOp::Info,
            DbCall::Get(_) => DbOp::Get,
            DbCall::Head(_) => DbOp::Head,
            DbCall::Insert { .. } => DbOp::Insert,
            DbCall::Delete { .. } => DbOp::Delete,
            DbCall::BulkWrite(_) => DbOp::BulkWrite,
            DbCall::QueryIndex { .. } => DbOp::QueryIndex,
        }
    }
}

/// Stored state of one document.
#[derive(Debug, Clone)]
struct Stored {
    rev: Revision,
    generation: u64,
    body: serde_json::Map<String, Value>,
}

/// In-memory document database.
#[derive(Debug)]
pub struct MemoryDatabase {
    docs: Mutex<BTreeMap<String, Stored>>,
    calls: Mutex<Vec<DbCall>>,
    failures: Mutex<HashMap<DbOp, VecDeque<DatabaseError>>>,
    clock: Arc<dyn Clock>,
    seq: AtomicU64,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    /// Create an empty database on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty database whose index queries use `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            docs: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            clock,
            seq: AtomicU64::new(0),
        }
    }

    /// Store a document directly, bypassing revision checks and the call log.
    ///
    /// Returns the new revision.
    pub fn put_raw(&self, doc: Document) -> Revision {
        let mut docs = self.docs.lock();
        let generation = docs.get(&doc.id).map_or(1, |s| s.generation + 1);
        let rev = self.next_rev(generation);
        docs.insert(
            doc.id,
            Stored {
                rev: rev.clone(),
                generation,
                body: doc.body,
            },
        );
        rev
    }

    /// Read a document without logging the call.
    pub fn document(&self, id: &str) -> Option<Document> {
        self.docs.lock().get(id).map(|s| Document {
            id: id.to_string(),
            rev: Some(s.rev.clone()),
            body: s.body.clone(),
        })
    }

    /// Whether a document is stored under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.docs.lock().contains_key(id)
    }

    /// Number of stored documents, design documents included.
    pub fn len(&self) -> usize {
        self.docs.lock().len()
    }

    /// Check if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.docs.lock().is_empty()
    }

    /// Make the next call of `op` fail with `err`. Injected failures queue.
    pub fn fail_next(&self, op: DbOp, err: DatabaseError) {
        self.failures.lock().entry(op).or_default().push_back(err);
    }

    /// All calls made through the [`DocumentDatabase`] interface.
    pub fn calls(&self) -> Vec<DbCall> {
        self.calls.lock().clone()
    }

    /// Calls of a single operation.
    pub fn calls_of(&self, op: DbOp) -> Vec<DbCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.op() == op)
            .cloned()
            .collect()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Forget the call log.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn next_rev(&self, generation: u64) -> Revision {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        Revision::new(format!("{generation}-{seq:08x}"))
    }

    /// Log the call and pop an injected failure, if any.
    fn enter(&self, call: DbCall) -> DbResult<()> {
        let op = call.op();
        self.calls.lock().push(call);
        match self.failures.lock().get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn delete_locked(
        docs: &mut BTreeMap<String, Stored>,
        id: &str,
        rev: &Revision,
    ) -> DbResult<()> {
        match docs.get(id) {
            None => Err(DatabaseError::NotFound(id.to_string())),
            Some(stored) if stored.rev != *rev => Err(DatabaseError::Conflict(id.to_string())),
            Some(_) => {
                docs.remove(id);
                Ok(())
            }
        }
    }

    fn expired_rows(&self, docs: &BTreeMap<String, Stored>) -> Vec<IndexRow> {
        let now = self.clock.now_millis();
        docs.iter()
            .filter(|(id, _)| !id.starts_with(DESIGN_PREFIX))
            .filter(|(_, stored)| {
                let ttl = stored.body.get(TTL_FIELD).and_then(Value::as_u64);
                let modified = stored.body.get(MODIFIED_FIELD).and_then(Value::as_i64);
                match (ttl, modified) {
                    (Some(ttl), Some(modified)) if ttl > 0 => is_expired(modified, ttl, now),
                    _ => false,
                }
            })
            .map(|(id, stored)| IndexRow {
                key: Value::String(id.clone()),
                value: Value::String(stored.rev.as_str().to_string()),
            })
            .collect()
    }
}

#[async_trait]
impl DocumentDatabase for MemoryDatabase {
    async fn info(&self) -> DbResult<()> {
        self.enter(DbCall::Info)
    }

    async fn get(&self, id: &str) -> DbResult<Document> {
        self.enter(DbCall::Get(id.to_string()))?;
        self.document(id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))
    }

    async fn head(&self, id: &str) -> DbResult<Revision> {
        self.enter(DbCall::Head(id.to_string()))?;
        self.docs
            .lock()
            .get(id)
            .map(|s| s.rev.clone())
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))
    }

    async fn insert(&self, doc: &Document, rev: Option<&Revision>) -> DbResult<Revision> {
        self.enter(DbCall::Insert {
            id: doc.id.clone(),
            rev: rev.cloned(),
        })?;

        let mut docs = self.docs.lock();
        let generation = match (docs.get(&doc.id), rev) {
            (None, None) => 1,
            (Some(stored), Some(hint)) if stored.rev == *hint => stored.generation + 1,
            _ => return Err(DatabaseError::Conflict(doc.id.clone())),
        };

        let new_rev = self.next_rev(generation);
        docs.insert(
            doc.id.clone(),
            Stored {
                rev: new_rev.clone(),
                generation,
                body: doc.body.clone(),
            },
        );
        Ok(new_rev)
    }

    async fn delete(&self, id: &str, rev: &Revision) -> DbResult<()> {
        self.enter(DbCall::Delete {
            id: id.to_string(),
            rev: rev.clone(),
        })?;
        Self::delete_locked(&mut self.docs.lock(), id, rev)
    }

    async fn bulk_write(&self, ops: &[BulkOp]) -> DbResult<Vec<BulkItemResult>> {
        self.enter(DbCall::BulkWrite(ops.to_vec()))?;

        let mut docs = self.docs.lock();
        let results = ops
            .iter()
            .map(|op| {
                if !op.deleted {
                    return BulkItemResult::failed(
                        &op.id,
                        "bad_request",
                        "only deletions are supported",
                    );
                }
                match Self::delete_locked(&mut docs, &op.id, &op.rev) {
                    Ok(()) => BulkItemResult::ok(&op.id, self.next_rev(0)),
                    Err(DatabaseError::Conflict(_)) => {
                        BulkItemResult::failed(&op.id, "conflict", "Document update conflict.")
                    }
                    Err(_) => BulkItemResult::failed(&op.id, "not_found", "missing"),
                }
            })
            .collect();
        Ok(results)
    }

    async fn query_index(&self, design: &str, index: &str, limit: usize) -> DbResult<IndexPage> {
        self.enter(DbCall::QueryIndex {
            design: design.to_string(),
            index: index.to_string(),
            limit,
        })?;

        let docs = self.docs.lock();
        let design_id = format!("{DESIGN_PREFIX}{design}");
        let has_view = docs
            .get(&design_id)
            .and_then(|d| d.body.get("views"))
            .and_then(|views| views.get(index))
            .is_some();
        if !has_view {
            return Err(DatabaseError::NotFound(format!("{design_id}/_view/{index}")));
        }

        let rows = self.expired_rows(&docs);
        Ok(IndexPage {
            total_rows: rows.len() as u64,
            rows: rows.into_iter().take(limit).collect(),
        })
    }
}
