//! Error types for Slotlock
//!
//! Every "did the requested state change happen" outcome is a `bool`, never an
//! error. `LockError` is reserved for invalid input, broken invariants and
//! backend failures.

/// Boxed driver error carried unchanged inside `LockError::Storage`
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used by all adapter operations
pub type Result<T> = std::result::Result<T, LockError>;

/// Lock and semaphore error taxonomy
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    /// Invalid settings or arguments, e.g. a zero slot limit
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A writer and at least one reader were observed active on the same key
    #[error("unexpected invariant violation on key '{key}': {message}")]
    UnexpectedInvariant { key: String, message: String },

    /// Network or driver failure from the backing store
    #[error("storage error: {0}")]
    Storage(#[source] BoxError),
}

impl LockError {
    /// Wrap a driver error
    pub fn storage(err: impl Into<BoxError>) -> Self {
        LockError::Storage(err.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        LockError::Configuration(message.into())
    }

    /// Writer and readers observed together on `key`
    pub fn both_sides_active(key: impl Into<String>) -> Self {
        LockError::UnexpectedInvariant {
            key: key.into(),
            message: "writer and readers are both active".to_string(),
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, LockError::Storage(_))
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, LockError::UnexpectedInvariant { .. })
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_storage_error_keeps_source() {
        let err = LockError::storage(std::io::Error::other("connection reset"));
        assert!(err.is_storage());
        assert_eq!(err.to_string(), "storage error: connection reset");

        let source = err.source().expect("storage error must expose its source");
        assert!(source.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_invariant_error_display() {
        let err = LockError::both_sides_active("orders");
        assert!(err.is_invariant_violation());
        assert_eq!(
            err.to_string(),
            "unexpected invariant violation on key 'orders': writer and readers are both active"
        );
    }

    #[test]
    fn test_converts_into_anyhow() {
        let err: anyhow::Error = LockError::configuration("limit must be positive").into();
        assert!(err.downcast_ref::<LockError>().is_some());
    }
}
