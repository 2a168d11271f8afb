//! Wire types of the CouchDB HTTP API.

use cushion_session::{BulkOp, Revision};
use serde::{Deserialize, Serialize};

/// Response to a document write.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WriteResponse {
    #[allow(dead_code)]
    #[serde(default)]
    pub id: String,
    pub rev: Revision,
}

/// Error body returned with non-success statuses.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub reason: String,
}

/// Body of `POST /{db}/_bulk_docs`.
#[derive(Debug, Serialize)]
pub(crate) struct BulkDocsRequest<'a> {
    pub docs: &'a [BulkOp],
}

/// Query string of a view request.
#[derive(Debug, Serialize)]
pub(crate) struct ViewQuery {
    pub limit: usize,
}
