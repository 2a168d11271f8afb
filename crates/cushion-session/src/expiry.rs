//! Liveness of fetched session records.
//!
//! Expiry is lazy: a record whose TTL has elapsed may still be stored, but
//! readers never see it. The store reacts to [`Liveness::Expired`] by
//! scheduling a destroy in the background.

use crate::session::SessionRecord;

/// Outcome of checking a fetched record.
#[derive(Debug, Clone, PartialEq)]
pub enum Liveness {
    /// Nothing was stored under the id.
    Absent,

    /// The record exists but its TTL has elapsed.
    Expired(SessionRecord),

    /// The record is live.
    Live(SessionRecord),
}

impl Liveness {
    /// The record a reader should see, if any.
    pub fn into_live(self) -> Option<SessionRecord> {
        match self {
            Liveness::Live(record) => Some(record),
            Liveness::Absent | Liveness::Expired(_) => None,
        }
    }
}

/// Whether a record written at `modified_at_millis` with `ttl_seconds` is
/// expired at `now_millis`. The expiry instant itself counts as expired.
pub fn is_expired(modified_at_millis: i64, ttl_seconds: u64, now_millis: i64) -> bool {
    let ttl_millis = i64::try_from(ttl_seconds)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000);
    now_millis >= modified_at_millis.saturating_add(ttl_millis)
}

/// Classify a fetched record at `now_millis`.
pub fn evaluate(record: Option<SessionRecord>, now_millis: i64) -> Liveness {
    match record {
        None => Liveness::Absent,
        Some(record) if is_expired(record.modified_at_millis, record.ttl_seconds, now_millis) => {
            Liveness::Expired(record)
        }
        Some(record) => Liveness::Live(record),
    }
}
