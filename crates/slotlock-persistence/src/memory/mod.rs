//! In-memory lock backend
//!
//! Records live in `DashMap`s; each operation runs entirely under the shard
//! lock of its key, which makes it atomic within this process. Nothing is
//! shared across processes, so this backend is only suitable for tests and
//! single-instance deployments.

mod record;

pub use record::{SemaphoreRecord, SharedLockRecord, WriterRecord};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::interval;

use slotlock_common::{
    Result, current_timestamp, expiration_after, expiration_from_ttl, validate_id,
};

use crate::metrics::{record_outcome, set_memory_records};
use crate::model::{
    ReaderAcquireRequest, SemaphoreAcquireRequest, SemaphoreState, SharedLockState, StorageMode,
};
use crate::traits::{LockService, SemaphoreAdapter, SharedLockAdapter};

/// In-memory lock service implementation
pub struct MemoryLockService {
    semaphores: Arc<DashMap<String, SemaphoreRecord>>,
    shared_locks: Arc<DashMap<String, SharedLockRecord>>,
    /// Background sweep task, aborted on drop
    cleanup_handle: Option<JoinHandle<()>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self {
            semaphores: Arc::new(DashMap::new()),
            shared_locks: Arc::new(DashMap::new()),
            cleanup_handle: None,
        }
    }

    /// Start with a background sweep that reclaims expired entries
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_cleanup(mut self, period: Duration) -> Self {
        let semaphores = self.semaphores.clone();
        let shared_locks = self.shared_locks.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                Self::cleanup_expired(&semaphores, &shared_locks);
            }
        });
        tracing::info!(period_ms = period.as_millis() as u64, "memory lock sweeper started");

        if let Some(previous) = self.cleanup_handle.replace(handle) {
            previous.abort();
        }
        self
    }

    fn cleanup_expired(
        semaphores: &DashMap<String, SemaphoreRecord>,
        shared_locks: &DashMap<String, SharedLockRecord>,
    ) {
        let now = current_timestamp();

        semaphores.retain(|_, record| {
            record.purge_expired(now);
            !record.slots.is_empty()
        });
        shared_locks.retain(|key, record| {
            // Records violating exclusivity are kept so reads keep reporting them
            if record.check_exclusive(key, now).is_err() {
                return true;
            }
            record.normalize(now);
            !record.is_empty(now)
        });

        set_memory_records(semaphores.len() + shared_locks.len());
    }

    /// Number of records currently stored (expired or not)
    pub fn record_count(&self) -> usize {
        self.semaphores.len() + self.shared_locks.len()
    }

    /// Run `op` against an existing shared lock record, then drop the record if it drained
    fn with_shared_lock<T>(
        &self,
        key: &str,
        op: impl FnOnce(&mut SharedLockRecord, i64) -> Result<T>,
        default: T,
    ) -> Result<T> {
        let now = current_timestamp();
        let result = match self.shared_locks.get_mut(key) {
            Some(mut record) => op(&mut record, now)?,
            None => return Ok(default),
        };
        self.shared_locks.remove_if(key, |_, record| record.is_empty(now));
        Ok(result)
    }

    fn with_semaphore<T>(
        &self,
        key: &str,
        op: impl FnOnce(&mut SemaphoreRecord, i64) -> T,
        default: T,
    ) -> T {
        let now = current_timestamp();
        let result = match self.semaphores.get_mut(key) {
            Some(mut record) => op(&mut record, now),
            None => return default,
        };
        self.semaphores.remove_if(key, |_, record| record.is_empty(now));
        result
    }
}

impl Default for MemoryLockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryLockService {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl SemaphoreAdapter for MemoryLockService {
    async fn acquire(&self, request: SemaphoreAcquireRequest) -> Result<bool> {
        request.validate()?;
        let now = current_timestamp();
        let expiration = expiration_from_ttl(request.ttl, now);

        let acquired = self
            .semaphores
            .entry(request.key.clone())
            .or_default()
            .acquire(&request.slot_id, request.limit, expiration, now);
        if !acquired {
            self.semaphores
                .remove_if(&request.key, |_, record| record.is_empty(now));
        }

        tracing::debug!(key = %request.key, slot_id = %request.slot_id, acquired, "semaphore acquire");
        record_outcome(StorageMode::Memory, "semaphore_acquire", acquired);
        Ok(acquired)
    }

    async fn release(&self, key: &str, slot_id: &str) -> Result<bool> {
        let released = self.with_semaphore(key, |record, now| record.release(slot_id, now), false);
        record_outcome(StorageMode::Memory, "semaphore_release", released);
        Ok(released)
    }

    async fn force_release_all(&self, key: &str) -> Result<bool> {
        let now = current_timestamp();
        let released = self
            .semaphores
            .remove(key)
            .is_some_and(|(_, mut record)| record.clear(now));
        record_outcome(StorageMode::Memory, "semaphore_force_release_all", released);
        Ok(released)
    }

    async fn refresh(&self, key: &str, slot_id: &str, ttl: Duration) -> Result<bool> {
        let refreshed = self.with_semaphore(
            key,
            |record, now| {
                let expiration = expiration_after(ttl, now);
                record.refresh(slot_id, expiration, now)
            },
            false,
        );
        record_outcome(StorageMode::Memory, "semaphore_refresh", refreshed);
        Ok(refreshed)
    }

    async fn get_state(&self, key: &str) -> Result<Option<SemaphoreState>> {
        let now = current_timestamp();
        Ok(self
            .semaphores
            .get(key)
            .and_then(|record| record.state(now)))
    }
}

#[async_trait]
impl SharedLockAdapter for MemoryLockService {
    async fn acquire_writer(
        &self,
        key: &str,
        lock_id: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        validate_id("key", key)?;
        validate_id("lock_id", lock_id)?;
        let now = current_timestamp();
        let expiration = expiration_from_ttl(ttl, now);

        let acquired = self
            .shared_locks
            .entry(key.to_string())
            .or_default()
            .acquire_writer(key, lock_id, expiration, now)?;
        if !acquired {
            self.shared_locks
                .remove_if(key, |_, record| record.is_empty(now));
        }

        tracing::debug!(key, lock_id, acquired, "writer acquire");
        record_outcome(StorageMode::Memory, "writer_acquire", acquired);
        Ok(acquired)
    }

    async fn release_writer(&self, key: &str, lock_id: &str) -> Result<bool> {
        let released = self.with_shared_lock(
            key,
            |record, now| record.release_writer(key, lock_id, now),
            false,
        )?;
        record_outcome(StorageMode::Memory, "writer_release", released);
        Ok(released)
    }

    async fn force_release_writer(&self, key: &str) -> Result<bool> {
        let released = self.with_shared_lock(
            key,
            |record, now| record.force_release_writer(key, now),
            false,
        )?;
        record_outcome(StorageMode::Memory, "writer_force_release", released);
        Ok(released)
    }

    async fn refresh_writer(&self, key: &str, lock_id: &str, ttl: Duration) -> Result<bool> {
        let refreshed = self.with_shared_lock(
            key,
            |record, now| {
                let expiration = expiration_after(ttl, now);
                record.refresh_writer(key, lock_id, expiration, now)
            },
            false,
        )?;
        record_outcome(StorageMode::Memory, "writer_refresh", refreshed);
        Ok(refreshed)
    }

    async fn acquire_reader(&self, request: ReaderAcquireRequest) -> Result<bool> {
        request.validate()?;
        let now = current_timestamp();
        let expiration = expiration_from_ttl(request.ttl, now);

        let acquired = self
            .shared_locks
            .entry(request.key.clone())
            .or_default()
            .acquire_reader(&request.key, &request.lock_id, request.limit, expiration, now)?;
        if !acquired {
            self.shared_locks
                .remove_if(&request.key, |_, record| record.is_empty(now));
        }

        tracing::debug!(key = %request.key, lock_id = %request.lock_id, acquired, "reader acquire");
        record_outcome(StorageMode::Memory, "reader_acquire", acquired);
        Ok(acquired)
    }

    async fn release_reader(&self, key: &str, lock_id: &str) -> Result<bool> {
        let released = self.with_shared_lock(
            key,
            |record, now| record.release_reader(key, lock_id, now),
            false,
        )?;
        record_outcome(StorageMode::Memory, "reader_release", released);
        Ok(released)
    }

    async fn force_release_all_readers(&self, key: &str) -> Result<bool> {
        let released = self.with_shared_lock(
            key,
            |record, now| record.force_release_all_readers(key, now),
            false,
        )?;
        record_outcome(StorageMode::Memory, "reader_force_release_all", released);
        Ok(released)
    }

    async fn refresh_reader(&self, key: &str, lock_id: &str, ttl: Duration) -> Result<bool> {
        let refreshed = self.with_shared_lock(
            key,
            |record, now| {
                let expiration = expiration_after(ttl, now);
                record.refresh_reader(key, lock_id, expiration, now)
            },
            false,
        )?;
        record_outcome(StorageMode::Memory, "reader_refresh", refreshed);
        Ok(refreshed)
    }

    async fn force_release(&self, key: &str) -> Result<bool> {
        let released =
            self.with_shared_lock(key, |record, now| record.force_release(key, now), false)?;
        record_outcome(StorageMode::Memory, "shared_force_release", released);
        Ok(released)
    }

    async fn get_state(&self, key: &str) -> Result<Option<SharedLockState>> {
        let now = current_timestamp();
        match self.shared_locks.get(key) {
            Some(record) => record.state(key, now),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drained_records_are_removed() {
        let service = MemoryLockService::new();

        let request = SemaphoreAcquireRequest::new("jobs", "worker-1", 1);
        assert!(service.acquire(request).await.unwrap());
        assert_eq!(service.record_count(), 1);

        assert!(service.release("jobs", "worker-1").await.unwrap());
        assert_eq!(service.record_count(), 0);

        assert!(service.acquire_writer("doc", "o1", None).await.unwrap());
        assert!(service.release_writer("doc", "o1").await.unwrap());
        assert_eq!(service.record_count(), 0);
    }

    #[tokio::test]
    async fn test_tampered_record_raises_invariant_error() {
        let service = MemoryLockService::new();
        assert!(service.acquire_writer("doc", "o1", None).await.unwrap());

        let mut reader = SemaphoreRecord::default();
        reader.acquire("r1", 1, None, current_timestamp());
        service.shared_locks.get_mut("doc").unwrap().reader = Some(reader);

        let err = SharedLockAdapter::get_state(&service, "doc")
            .await
            .unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(service.force_release("doc").await.is_err());
        assert!(
            service
                .acquire_reader(ReaderAcquireRequest::new("doc", "r2", 2))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_sweeper_reclaims_expired_entries() {
        let service = MemoryLockService::new().with_cleanup(Duration::from_millis(10));

        let request = SemaphoreAcquireRequest::new("jobs", "worker-1", 1)
            .with_ttl(Duration::from_millis(20));
        assert!(service.acquire(request).await.unwrap());
        assert!(
            service
                .acquire_writer("doc", "o1", Some(Duration::from_millis(20)))
                .await
                .unwrap()
        );
        assert_eq!(service.record_count(), 2);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(service.record_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_limit_is_configuration_error() {
        let service = MemoryLockService::new();
        let err = service
            .acquire(SemaphoreAcquireRequest::new("jobs", "worker-1", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, slotlock_common::LockError::Configuration(_)));
    }
}
