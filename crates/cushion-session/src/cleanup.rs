//! Batch reclamation of expired sessions.
//!
//! Expired sessions are already invisible to readers, so this is purely about
//! bounding storage. A design document defines a view that emits
//! `(_id, _rev)` for every expired session; each run reads up to one batch
//! from the view and deletes it with a single bulk write.

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::codec::{MODIFIED_FIELD, TTL_FIELD};
use crate::config::StoreConfig;
use crate::database::{BulkOp, DatabaseError, Document, DocumentDatabase, IndexRow, Revision};
use crate::error::{Error, Result};

/// Design document writes attempted before giving up on a contended index.
const MAX_INDEX_ATTEMPTS: usize = 3;

/// Outcome of one cleanup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CleanupReport {
    /// Rows returned by the index (at most the batch size).
    pub matched: usize,

    /// Sessions the bulk write removed.
    pub deleted: usize,

    /// Sessions the bulk write reported as failed.
    pub failed: usize,
}

/// Maintains the expiry index and reaps expired sessions through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupScheduler {
    design_name: String,
    index_name: String,
}

impl CleanupScheduler {
    /// Create a scheduler for the given design document and view names.
    pub fn new(design_name: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            design_name: design_name.into(),
            index_name: index_name.into(),
        }
    }

    /// Create a scheduler using the names in `config`.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(&config.index_design_name, &config.index_name)
    }

    /// Name of the design document, without the `_design/` prefix.
    pub fn design_name(&self) -> &str {
        &self.design_name
    }

    /// Name of the view inside the design document.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// The view's map function.
    pub fn map_function() -> String {
        format!(
            "function (doc) {{ if (doc.{TTL_FIELD} && doc.{MODIFIED_FIELD} && \
             Date.now() >= doc.{MODIFIED_FIELD} + doc.{TTL_FIELD} * 1000) \
             {{ emit(doc._id, doc._rev); }} }}"
        )
    }

    /// The design document defining the expiry view.
    pub fn design_document(&self) -> Document {
        let mut views = Map::new();
        views.insert(
            self.index_name.clone(),
            json!({ "map": Self::map_function() }),
        );

        let mut body = Map::new();
        body.insert("language".to_string(), json!("javascript"));
        body.insert("views".to_string(), Value::Object(views));

        Document::new(self.design_id(), body)
    }

    /// Make sure the expiry view exists.
    ///
    /// Probes with an empty query. When the view is missing, the design
    /// document is fetched and the view added to it, keeping any other views
    /// it holds, or created from scratch if it does not exist. A write that
    /// loses a race against another writer checks the view again before
    /// retrying.
    pub async fn ensure_index(&self, db: &dyn DocumentDatabase) -> Result<()> {
        if self.index_exists(db).await? {
            return Ok(());
        }

        info!(
            design = %self.design_name,
            index = %self.index_name,
            "Expired-session index missing, creating it"
        );

        let design_id = self.design_id();
        for attempt in 1..=MAX_INDEX_ATTEMPTS {
            let existing = match db.get(&design_id).await {
                Ok(doc) => Some(doc),
                Err(DatabaseError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            };
            let rev = existing.as_ref().and_then(|d| d.rev.clone());
            let doc = self.with_view(existing);

            match db.insert(&doc, rev.as_ref()).await {
                Ok(_) => return Ok(()),
                Err(DatabaseError::Conflict(_)) => {
                    debug!(design = %self.design_name, attempt, "Design document changed concurrently");
                    if self.index_exists(db).await? {
                        return Ok(());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::Conflict(design_id))
    }

    async fn index_exists(&self, db: &dyn DocumentDatabase) -> Result<bool> {
        match db.query_index(&self.design_name, &self.index_name, 0).await {
            Ok(_) => Ok(true),
            Err(DatabaseError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn design_id(&self) -> String {
        format!("_design/{}", self.design_name)
    }

    /// `existing` with the expiry view set, or a fresh design document.
    fn with_view(&self, existing: Option<Document>) -> Document {
        let Some(mut doc) = existing else {
            return self.design_document();
        };
        doc.rev = None;

        let views = doc
            .body
            .entry("views")
            .or_insert_with(|| Value::Object(Map::new()));
        if !views.is_object() {
            *views = Value::Object(Map::new());
        }
        if let Value::Object(views) = views {
            views.insert(
                self.index_name.clone(),
                json!({ "map": Self::map_function() }),
            );
        }
        doc.body
            .entry("language")
            .or_insert_with(|| json!("javascript"));
        doc
    }

    /// Delete up to `max_batch` expired sessions.
    ///
    /// The bulk write is a single request and its failure fails the whole
    /// run; nothing is retried here. Items the database rejects individually
    /// are counted in [`CleanupReport::failed`].
    pub async fn cleanup_expired(
        &self,
        db: &dyn DocumentDatabase,
        max_batch: usize,
    ) -> Result<CleanupReport> {
        if max_batch == 0 {
            return Err(Error::Config("cleanup batch size must be positive".to_string()));
        }

        self.ensure_index(db).await?;

        let page = db
            .query_index(&self.design_name, &self.index_name, max_batch)
            .await?;

        let ops: Vec<BulkOp> = page.rows.iter().filter_map(deletion_marker).collect();
        if ops.is_empty() {
            debug!("No expired sessions to delete");
            return Ok(CleanupReport {
                matched: page.rows.len(),
                ..CleanupReport::default()
            });
        }

        debug!(count = ops.len(), total = page.total_rows, "Bulk deleting expired sessions");
        let results = db.bulk_write(&ops).await?;

        let deleted = results.iter().filter(|r| r.is_ok()).count();
        let failed = results.len() - deleted;
        for item in results.iter().filter(|r| !r.is_ok()) {
            warn!(
                id = %item.id,
                error = item.error.as_deref().unwrap_or("unknown"),
                "Expired session not deleted"
            );
        }

        info!(deleted, failed, "Expired session cleanup finished");
        Ok(CleanupReport {
            matched: page.rows.len(),
            deleted,
            failed,
        })
    }
}

/// Build the deletion marker for an index row.
fn deletion_marker(row: &IndexRow) -> Option<BulkOp> {
    match (row.key.as_str(), row.value.as_str()) {
        (Some(id), Some(rev)) => Some(BulkOp::delete(id, Revision::new(rev))),
        _ => {
            warn!(key = %row.key, "Skipping index row without string id and revision");
            None
        }
    }
}
