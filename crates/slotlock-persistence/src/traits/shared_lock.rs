//! Reader/writer shared lock contract

use std::time::Duration;

use async_trait::async_trait;

use slotlock_common::Result;

use crate::model::{ReaderAcquireRequest, SharedLockState};

/// Shared lock operations
///
/// A key is either empty, held by one writer, or held by up to `limit`
/// readers. Writer and readers are never active together; observing both is
/// reported as `LockError::UnexpectedInvariant`.
///
/// A caller that loses a race for the same key normally gets `false`. On the
/// relational backend with a serializable MySQL or PostgreSQL connection the
/// database may instead abort the losing transaction, which surfaces as
/// `LockError::Storage`; nothing was changed and the call can be retried.
/// Expirations are clamped to `slotlock_common::MAX_EXPIRATION` and limits
/// above `slotlock_common::MAX_LIMIT` are rejected.
#[async_trait]
pub trait SharedLockAdapter: Send + Sync {
    /// Acquire the writer side
    ///
    /// Fails while any reader is active. Succeeds when no writer is held, the
    /// held writer has expired, or `lock_id` already owns it (no renewal).
    async fn acquire_writer(&self, key: &str, lock_id: &str, ttl: Option<Duration>)
    -> Result<bool>;

    /// Release the writer if `lock_id` owns it and it has not expired
    async fn release_writer(&self, key: &str, lock_id: &str) -> Result<bool>;

    /// Release the writer regardless of owner, returning whether it was active
    async fn force_release_writer(&self, key: &str) -> Result<bool>;

    /// Extend an unexpired, expiring writer owned by `lock_id`
    async fn refresh_writer(&self, key: &str, lock_id: &str, ttl: Duration) -> Result<bool>;

    /// Acquire a reader slot; fails while a writer is active
    async fn acquire_reader(&self, request: ReaderAcquireRequest) -> Result<bool>;

    /// Release an unexpired reader slot
    async fn release_reader(&self, key: &str, lock_id: &str) -> Result<bool>;

    /// Remove every reader slot, returning whether any was active
    async fn force_release_all_readers(&self, key: &str) -> Result<bool>;

    /// Extend an unexpired, expiring reader slot
    async fn refresh_reader(&self, key: &str, lock_id: &str, ttl: Duration) -> Result<bool>;

    /// Clear whichever side is held, returning whether anything active was cleared
    async fn force_release(&self, key: &str) -> Result<bool>;

    /// Current state, `None` when neither side is active
    async fn get_state(&self, key: &str) -> Result<Option<SharedLockState>>;
}
