//! Counting semaphore contract

use std::time::Duration;

use async_trait::async_trait;

use slotlock_common::Result;

use crate::model::{SemaphoreAcquireRequest, SemaphoreState};

/// Counting semaphore operations
///
/// A key holds at most `limit` unexpired slots. The limit is fixed when the
/// record is created and ignored on later acquisitions until every slot has
/// been released or has expired.
///
/// A caller that loses a race for the same key normally gets `false`. On the
/// relational backend with a serializable MySQL or PostgreSQL connection the
/// database may instead abort the losing transaction, which surfaces as
/// `LockError::Storage`; nothing was changed and the call can be retried.
/// Expirations are clamped to `slotlock_common::MAX_EXPIRATION` and limits
/// above `slotlock_common::MAX_LIMIT` are rejected.
#[async_trait]
pub trait SemaphoreAdapter: Send + Sync {
    /// Acquire a slot
    ///
    /// Returns `true` when the slot is held after the call. Re-acquiring an
    /// unexpired slot succeeds without renewing its expiration.
    async fn acquire(&self, request: SemaphoreAcquireRequest) -> Result<bool>;

    /// Release an unexpired slot, returning whether one was removed
    async fn release(&self, key: &str, slot_id: &str) -> Result<bool>;

    /// Remove every slot of a key, returning whether any unexpired slot existed
    async fn force_release_all(&self, key: &str) -> Result<bool>;

    /// Extend an unexpired, expiring slot to `now + ttl`
    ///
    /// Slots that never expire, missing slots and expired slots are left
    /// unchanged and yield `false`.
    async fn refresh(&self, key: &str, slot_id: &str, ttl: Duration) -> Result<bool>;

    /// Current unexpired slots, `None` when there are none
    async fn get_state(&self, key: &str) -> Result<Option<SemaphoreState>>;
}
