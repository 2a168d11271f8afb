//! Conversion between session payloads and stored documents.

use serde_json::Value;

use crate::database::{DELETED_FIELD, Document, ID_FIELD, REV_FIELD};
use crate::error::{Error, Result};
use crate::session::{Session, SessionRecord};

/// Stored field holding the TTL in seconds.
pub const TTL_FIELD: &str = "session_ttl";

/// Stored field holding the epoch-millisecond time of the last write.
pub const MODIFIED_FIELD: &str = "session_modified";

/// Build the document written for `session`.
///
/// The body is a copy of the caller's fields, so later mutation of the
/// session cannot leak into the outgoing write. Reserved fields supplied by
/// the caller are dropped; the revision travels separately as the write
/// hint.
pub fn encode(id: &str, session: &Session, ttl_seconds: u64, now_millis: i64) -> Document {
    let mut body = session.fields.clone();
    for reserved in [ID_FIELD, REV_FIELD, DELETED_FIELD] {
        body.remove(reserved);
    }
    body.insert(TTL_FIELD.to_string(), Value::from(ttl_seconds));
    body.insert(MODIFIED_FIELD.to_string(), Value::from(now_millis));

    Document::new(id, body)
}

/// Read a stored document back into a [`SessionRecord`].
///
/// Store metadata is removed from the payload and reported in the record's
/// own fields; the document revision ends up in `session.revision`.
pub fn decode(doc: Document) -> Result<SessionRecord> {
    let Document { id, rev, mut body } = doc;

    let ttl_seconds = body
        .remove(TTL_FIELD)
        .as_ref()
        .and_then(read_u64)
        .ok_or_else(|| Error::Codec {
            id: id.clone(),
            reason: format!("missing or invalid '{TTL_FIELD}'"),
        })?;

    let modified_at_millis = body
        .remove(MODIFIED_FIELD)
        .as_ref()
        .and_then(read_i64)
        .ok_or_else(|| Error::Codec {
            id: id.clone(),
            reason: format!("missing or invalid '{MODIFIED_FIELD}'"),
        })?;

    body.remove(DELETED_FIELD);

    Ok(SessionRecord {
        id,
        session: Session {
            fields: body,
            revision: rev,
        },
        ttl_seconds,
        modified_at_millis,
    })
}

fn read_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
}

fn read_i64(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|v| v as i64))
}
