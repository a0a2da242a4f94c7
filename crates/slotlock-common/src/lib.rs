//! Slotlock Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all Slotlock components:
//! - Error taxonomy shared by every storage backend
//! - Timestamp and TTL helpers (expirations are Unix epoch milliseconds)
//! - Request validation helpers
//! - Common constants

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{BoxError, LockError, Result};
pub use utils::{
    MAX_EXPIRATION, MAX_LIMIT, current_timestamp, expiration_after, expiration_from_ttl, is_active,
    validate_id, validate_limit,
};

/// Default prefix applied to every key written by the remote backends
pub const DEFAULT_KEY_PREFIX: &str = "slotlock:";

/// Default interval for background reclamation sweeps (milliseconds)
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 30_000;

/// Default connection pool size for the relational backend
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
