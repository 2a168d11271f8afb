//! TTL policy for session writes.

/// One day, used when neither the store nor the cookie sets a lifetime.
pub const DEFAULT_TTL_SECS: u64 = 86_400;

/// Smallest TTL ever written. A record always outlives its own write.
pub const MIN_TTL_SECS: u64 = 1;

/// Compute the TTL in seconds for a session write.
///
/// A store-level override wins. Otherwise the cookie's max age (in
/// milliseconds) is floored to whole seconds. Zero counts as "not set" for
/// both inputs; a negative or sub-second max age clamps to
/// [`MIN_TTL_SECS`].
pub fn compute_ttl(cookie_max_age_millis: Option<i64>, store_ttl: Option<u64>) -> u64 {
    if let Some(ttl) = store_ttl.filter(|ttl| *ttl > 0) {
        return ttl;
    }

    match cookie_max_age_millis.filter(|ms| *ms != 0) {
        Some(ms) => u64::try_from(ms.div_euclid(1000))
            .unwrap_or(0)
            .max(MIN_TTL_SECS),
        None => DEFAULT_TTL_SECS,
    }
}
