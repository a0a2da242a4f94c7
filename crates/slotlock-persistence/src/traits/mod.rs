//! Adapter traits for the lock storage abstraction layer
//!
//! Every backend (in-process memory, relational database, document store)
//! implements the same two contracts. All exclusion is delegated to the backing
//! store: each operation is one atomic unit of work against it, so there is no
//! in-process mutex layered on top.

pub mod semaphore;
pub mod shared_lock;

pub use semaphore::SemaphoreAdapter;
pub use shared_lock::SharedLockAdapter;

use async_trait::async_trait;

use slotlock_common::Result;

use crate::model::StorageMode;

/// Unified lock service trait
///
/// This is the main interface handed to application code. Implementations
/// provide both contracts on top of one storage backend.
#[async_trait]
pub trait LockService: SemaphoreAdapter + SharedLockAdapter + Send + Sync {
    /// Get the storage mode backing this service
    fn storage_mode(&self) -> StorageMode;

    /// Health check for the storage backend
    async fn health_check(&self) -> Result<()>;
}
