//! Utility functions for Slotlock
//!
//! Expiration instants are Unix epoch milliseconds. `None` means the entry
//! never expires.

use std::time::Duration;

use crate::error::{LockError, Result};

/// Current Unix time in milliseconds
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Latest storable expiration instant (year 5138)
///
/// Fourteen decimal digits, so the instant survives a round trip through
/// Lua numbers and the JSON encoder of the document store unchanged.
pub const MAX_EXPIRATION: i64 = 99_999_999_999_999;

/// Largest slot limit, bounded by the relational `limit` column
pub const MAX_LIMIT: u32 = i32::MAX as u32;

/// Absolute expiration instant `ttl` after `now`, clamped to `MAX_EXPIRATION`
pub fn expiration_after(ttl: Duration, now: i64) -> i64 {
    let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now.saturating_add(ttl).min(MAX_EXPIRATION)
}

/// Convert an optional TTL into an absolute expiration instant
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use slotlock_common::expiration_from_ttl;
///
/// assert_eq!(expiration_from_ttl(Some(Duration::from_millis(50)), 1_000), Some(1_050));
/// assert_eq!(expiration_from_ttl(None, 1_000), None);
/// ```
pub fn expiration_from_ttl(ttl: Option<Duration>, now: i64) -> Option<i64> {
    ttl.map(|ttl| expiration_after(ttl, now))
}

/// Whether an entry with the given expiration is still logically present
///
/// An entry whose expiration is at or before `now` is treated as absent.
pub fn is_active(expiration: Option<i64>, now: i64) -> bool {
    expiration.is_none_or(|expiration| expiration > now)
}

/// Reject a zero slot limit or one above `MAX_LIMIT`
pub fn validate_limit(limit: u32) -> Result<()> {
    if limit == 0 {
        return Err(LockError::configuration("limit must be at least 1"));
    }
    if limit > MAX_LIMIT {
        return Err(LockError::configuration(format!(
            "limit must be at most {}",
            MAX_LIMIT
        )));
    }
    Ok(())
}

/// Reject empty keys and slot/lock ids
pub fn validate_id(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(LockError::configuration(format!("{} must not be empty", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_active() {
        assert!(is_active(None, 1_000));
        assert!(is_active(Some(1_001), 1_000));
        assert!(!is_active(Some(1_000), 1_000));
        assert!(!is_active(Some(999), 1_000));
    }

    #[test]
    fn test_expiration_is_clamped() {
        assert_eq!(
            expiration_from_ttl(Some(Duration::MAX), 1_000),
            Some(MAX_EXPIRATION)
        );
        assert_eq!(
            expiration_after(Duration::from_secs(u64::MAX / 2), 1_760_000_000_000),
            MAX_EXPIRATION
        );
        assert_eq!(expiration_after(Duration::from_secs(1), i64::MAX - 10), MAX_EXPIRATION);
        assert_eq!(expiration_after(Duration::from_millis(5), 1_000), 1_005);
    }

    #[test]
    fn test_max_expiration_is_exact_as_f64() {
        // Lua numbers are doubles
        assert_eq!(MAX_EXPIRATION as f64 as i64, MAX_EXPIRATION);
        assert_eq!(MAX_EXPIRATION.to_string().len(), 14);
    }

    #[test]
    fn test_validation() {
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(1).is_ok());
        assert!(validate_limit(MAX_LIMIT).is_ok());
        assert!(matches!(
            validate_limit(MAX_LIMIT + 1),
            Err(LockError::Configuration(_))
        ));
        assert!(validate_limit(u32::MAX).is_err());
        assert!(validate_id("key", "").is_err());
        assert!(validate_id("key", "orders").is_ok());
    }

    #[test]
    fn test_current_timestamp_is_millis() {
        let now = current_timestamp();
        // After 2020-01-01 and before 2100-01-01
        assert!(now > 1_577_836_800_000);
        assert!(now < 4_102_444_800_000);
    }
}
