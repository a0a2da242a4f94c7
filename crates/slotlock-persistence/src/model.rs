//! Domain model types for the lock adapters
//!
//! These types are used as arguments and return values of the adapter traits,
//! decoupled from the layout each storage backend persists.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use slotlock_common::{Result, validate_id, validate_limit};

/// Semaphore acquisition request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemaphoreAcquireRequest {
    /// Semaphore key
    pub key: String,
    /// Caller-chosen slot identifier
    pub slot_id: String,
    /// Maximum number of unexpired slots (pinned while slots are held)
    pub limit: u32,
    /// Slot time-to-live, `None` for a slot that never expires
    #[serde(default)]
    pub ttl: Option<Duration>,
}

impl SemaphoreAcquireRequest {
    pub fn new(key: impl Into<String>, slot_id: impl Into<String>, limit: u32) -> Self {
        Self {
            key: key.into(),
            slot_id: slot_id.into(),
            limit,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_id("key", &self.key)?;
        validate_id("slot_id", &self.slot_id)?;
        validate_limit(self.limit)
    }
}

/// Reader acquisition request for a shared lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderAcquireRequest {
    /// Shared lock key
    pub key: String,
    /// Caller-chosen reader identifier
    pub lock_id: String,
    /// Maximum number of concurrent readers
    pub limit: u32,
    /// Reader time-to-live, `None` for a reader that never expires
    #[serde(default)]
    pub ttl: Option<Duration>,
}

impl ReaderAcquireRequest {
    pub fn new(key: impl Into<String>, lock_id: impl Into<String>, limit: u32) -> Self {
        Self {
            key: key.into(),
            lock_id: lock_id.into(),
            limit,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_id("key", &self.key)?;
        validate_id("lock_id", &self.lock_id)?;
        validate_limit(self.limit)
    }
}

/// Observable semaphore state (only unexpired slots)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemaphoreState {
    pub limit: u32,
    /// Slot id to expiration (Unix millis, `None` = never expires)
    pub acquired_slots: HashMap<String, Option<i64>>,
}

/// Observable writer lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterLockState {
    pub owner: String,
    /// Unix millis, `None` = never expires
    pub expiration: Option<i64>,
}

/// Observable shared lock state
///
/// At most one side is ever `Some`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedLockState {
    pub writer: Option<WriterLockState>,
    pub reader: Option<SemaphoreState>,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// In-process maps, single process only
    #[default]
    Memory,
    /// MySQL/PostgreSQL/SQLite via SeaORM, one serializable transaction per operation
    Relational,
    /// Redis documents, one server-side script per operation
    Document,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Memory => write!(f, "memory"),
            StorageMode::Relational => write!(f, "relational"),
            StorageMode::Document => write!(f, "document"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "memory" => Ok(StorageMode::Memory),
            "relational" => Ok(StorageMode::Relational),
            "document" => Ok(StorageMode::Document),
            _ => Err(format!("Invalid storage mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(SemaphoreAcquireRequest::new("a", "1", 2).validate().is_ok());
        assert!(SemaphoreAcquireRequest::new("a", "1", 0).validate().is_err());
        assert!(SemaphoreAcquireRequest::new("", "1", 1).validate().is_err());
        assert!(ReaderAcquireRequest::new("k", "", 1).validate().is_err());
        assert!(
            ReaderAcquireRequest::new("k", "r1", 3)
                .with_ttl(Duration::from_secs(1))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_storage_mode_round_trip() {
        for mode in [
            StorageMode::Memory,
            StorageMode::Relational,
            StorageMode::Document,
        ] {
            assert_eq!(mode.to_string().parse::<StorageMode>().unwrap(), mode);
        }
        assert!("rocksdb".parse::<StorageMode>().is_err());
    }
}
