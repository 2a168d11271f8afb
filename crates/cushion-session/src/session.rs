//! Caller-visible session payloads and stored session records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::database::Revision;

/// Session state as seen by the middleware.
///
/// `fields` is opaque to the store except for `cookie.maxAge`, which feeds
/// the TTL policy. `revision` is written back by `set` and `touch` so the
/// caller can see which revision its write was based on.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Session {
    #[serde(flatten)]
    pub fields: Map<String, Value>,

    #[serde(skip)]
    pub revision: Option<Revision>,
}

impl Session {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session from an existing field map.
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            revision: None,
        }
    }

    /// Set a field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Set `cookie.maxAge`, keeping any other cookie fields.
    pub fn with_cookie_max_age(mut self, millis: i64) -> Self {
        let cookie = self
            .fields
            .entry("cookie")
            .or_insert_with(|| Value::Object(Map::new()));
        if !cookie.is_object() {
            *cookie = Value::Object(Map::new());
        }
        if let Value::Object(cookie) = cookie {
            cookie.insert("maxAge".to_string(), Value::from(millis));
        }
        self
    }

    /// Read a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The cookie's max age in milliseconds, when it is a number.
    pub fn cookie_max_age_millis(&self) -> Option<i64> {
        let max_age = self.fields.get("cookie")?.get("maxAge")?;
        max_age
            .as_i64()
            .or_else(|| max_age.as_f64().map(|ms| ms.floor() as i64))
    }
}

/// A session as stored, with its store metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// Namespaced document id.
    pub id: String,

    /// Payload; `session.revision` carries the stored revision.
    pub session: Session,

    /// Seconds after the last write at which the record expires.
    pub ttl_seconds: u64,

    /// Epoch milliseconds of the last write.
    pub modified_at_millis: i64,
}

impl SessionRecord {
    /// The stored revision.
    pub fn revision(&self) -> Option<&Revision> {
        self.session.revision.as_ref()
    }

    /// Epoch milliseconds at which this record stops being live.
    pub fn expires_at_millis(&self) -> i64 {
        let ttl_millis = i64::try_from(self.ttl_seconds)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        self.modified_at_millis.saturating_add(ttl_millis)
    }
}
