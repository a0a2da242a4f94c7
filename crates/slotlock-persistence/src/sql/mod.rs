//! Relational lock backend (MySQL/PostgreSQL/SQLite via SeaORM)
//!
//! Each logical operation runs as one transaction at `SERIALIZABLE`
//! isolation. The statements inside (select, upsert, delete) are plain
//! check-then-act code; correctness comes from the database's serializable
//! scheduler, so conflicting concurrent transactions surface as storage
//! errors for the caller to retry rather than as lost updates.
//!
//! Expired rows are filtered on every read. Physical reclamation is explicit:
//! call `purge_expired`, or keep a purge task with `with_cleanup`.

mod schema;
mod slots;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{prelude::Expr, *};
use tokio::task::JoinHandle;

use slotlock_common::{
    LockError, Result, current_timestamp, expiration_after, expiration_from_ttl, is_active,
    validate_id,
};

use crate::entity::writer_lock;
use crate::metrics::record_outcome;
use crate::model::{
    ReaderAcquireRequest, SemaphoreAcquireRequest, SemaphoreState, SharedLockState, StorageMode,
    WriterLockState,
};
use crate::traits::{LockService, SemaphoreAdapter, SharedLockAdapter};

use slots::{reader_slots, semaphore_slots};

/// Boxed future returned by transaction callbacks
pub type TxnFuture<'c, T, E> = Pin<Box<dyn Future<Output = std::result::Result<T, E>> + Send + 'c>>;

/// Error raised inside a lock transaction
#[derive(thiserror::Error, Debug)]
pub enum TxnError {
    #[error(transparent)]
    Db(#[from] DbErr),
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl From<TxnError> for LockError {
    fn from(err: TxnError) -> Self {
        match err {
            TxnError::Db(err) => LockError::storage(err),
            TxnError::Lock(err) => err,
        }
    }
}

/// Purge task owned by a service, aborted when the last clone is dropped
struct CleanupTask(JoinHandle<()>);

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// External database lock service
///
/// Wraps a SeaORM `DatabaseConnection`; cloning shares the connection pool
/// and any purge task started with `with_cleanup`.
#[derive(Clone)]
pub struct ExternalDbLockService {
    db: DatabaseConnection,
    cleanup: Option<Arc<CleanupTask>>,
}

impl ExternalDbLockService {
    /// Create a new ExternalDbLockService with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db, cleanup: None }
    }

    /// Open a connection pool for `url`
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let mut opt = ConnectOptions::new(url);
        opt.max_connections(max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        tracing::info!(max_connections, "connecting relational lock backend");
        let db = Database::connect(opt).await.map_err(LockError::storage)?;
        Ok(Self::new(db))
    }

    /// Get a reference to the underlying database connection
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Create the lock tables if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        schema::create_tables(&self.db)
            .await
            .map_err(LockError::storage)
    }

    /// SQLite transactions are always serializable and reject an explicit level
    fn isolation_level(&self) -> Option<IsolationLevel> {
        match self.db.get_database_backend() {
            DbBackend::Sqlite => None,
            _ => Some(IsolationLevel::Serializable),
        }
    }

    /// Run `callback` inside one serializable transaction
    ///
    /// The transaction commits when the callback returns `Ok` and rolls back
    /// otherwise. Lets callers read or assert composite state under the same
    /// isolation the adapter operations use.
    pub async fn transaction<F, T, E>(&self, callback: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c DatabaseTransaction) -> TxnFuture<'c, T, E> + Send,
        T: Send,
        E: std::error::Error + From<DbErr> + Send,
    {
        self.db
            .transaction_with_config(callback, self.isolation_level(), None)
            .await
            .map_err(|err| match err {
                TransactionError::Connection(err) => E::from(err),
                TransactionError::Transaction(err) => err,
            })
    }

    async fn run<F, T>(&self, callback: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c DatabaseTransaction) -> TxnFuture<'c, T, TxnError> + Send,
        T: Send,
    {
        Ok(self.transaction(callback).await?)
    }

    /// Delete expired slots, expired writers and drained records
    ///
    /// Returns the number of rows removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = current_timestamp();
        let removed = self
            .run(move |txn| {
                Box::pin(async move {
                    let mut removed = semaphore_slots::purge_all_expired(txn, now).await?;
                    removed += reader_slots::purge_all_expired(txn, now).await?;
                    removed += writer_lock::Entity::delete_many()
                        .filter(writer_lock::Column::Expiration.lte(now))
                        .exec(txn)
                        .await?
                        .rows_affected;
                    Ok(removed)
                })
            })
            .await?;
        tracing::debug!(removed, "purged expired lock rows");
        Ok(removed)
    }

    /// Keep a purge task running every `period` for as long as this service
    /// (or a clone of it) is alive
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_cleanup(mut self, period: Duration) -> Self {
        let handle = self.spawn_cleanup(period);
        tracing::info!(period_ms = period.as_millis() as u64, "relational lock purge started");
        self.cleanup = Some(Arc::new(CleanupTask(handle)));
        self
    }

    /// Whether a purge task is owned by this service
    pub fn has_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }

    /// Run `purge_expired` every `period` until the handle is aborted
    pub fn spawn_cleanup(&self, period: Duration) -> JoinHandle<()> {
        let service = Self::new(self.db.clone());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = service.purge_expired().await {
                    tracing::warn!("Failed to purge expired lock rows: {}", e);
                }
            }
        })
    }
}

/// Active writer row plus whether any reader slot is active
///
/// Fails when both are present.
async fn exclusive_sides<C: ConnectionTrait>(
    db: &C,
    key: &str,
    now: i64,
) -> std::result::Result<(Option<writer_lock::Model>, bool), TxnError> {
    let writer = writer_lock::Entity::find_by_id(key.to_string())
        .one(db)
        .await?
        .filter(|writer| is_active(writer.expiration, now));
    let readers_active = reader_slots::has_active(db, key, now).await?;
    if writer.is_some() && readers_active {
        tracing::warn!(key, "shared lock holds an active writer and active readers");
        return Err(LockError::both_sides_active(key).into());
    }
    Ok((writer, readers_active))
}

fn active_writer(now: i64) -> Condition {
    Condition::any()
        .add(writer_lock::Column::Expiration.is_null())
        .add(writer_lock::Column::Expiration.gt(now))
}

// ============================================================================
// SemaphoreAdapter implementation
// ============================================================================

#[async_trait]
impl SemaphoreAdapter for ExternalDbLockService {
    async fn acquire(&self, request: SemaphoreAcquireRequest) -> Result<bool> {
        request.validate()?;
        let now = current_timestamp();
        let expiration = expiration_from_ttl(request.ttl, now);
        let SemaphoreAcquireRequest {
            key,
            slot_id,
            limit,
            ..
        } = request;

        let acquired = self
            .run(move |txn| {
                Box::pin(async move {
                    let acquired =
                        semaphore_slots::acquire(txn, &key, &slot_id, limit, expiration, now)
                            .await?;
                    tracing::debug!(key = %key, slot_id = %slot_id, acquired, "semaphore acquire");
                    Ok(acquired)
                })
            })
            .await?;
        record_outcome(StorageMode::Relational, "semaphore_acquire", acquired);
        Ok(acquired)
    }

    async fn release(&self, key: &str, slot_id: &str) -> Result<bool> {
        let now = current_timestamp();
        let (key, slot_id) = (key.to_string(), slot_id.to_string());
        let released = self
            .run(move |txn| {
                Box::pin(async move { Ok(semaphore_slots::release(txn, &key, &slot_id, now).await?) })
            })
            .await?;
        record_outcome(StorageMode::Relational, "semaphore_release", released);
        Ok(released)
    }

    async fn force_release_all(&self, key: &str) -> Result<bool> {
        let now = current_timestamp();
        let key = key.to_string();
        let released = self
            .run(move |txn| Box::pin(async move { Ok(semaphore_slots::clear(txn, &key, now).await?) }))
            .await?;
        record_outcome(StorageMode::Relational, "semaphore_force_release_all", released);
        Ok(released)
    }

    async fn refresh(&self, key: &str, slot_id: &str, ttl: Duration) -> Result<bool> {
        let now = current_timestamp();
        let expiration = expiration_after(ttl, now);
        let (key, slot_id) = (key.to_string(), slot_id.to_string());
        let refreshed = self
            .run(move |txn| {
                Box::pin(async move {
                    Ok(semaphore_slots::refresh(txn, &key, &slot_id, expiration, now).await?)
                })
            })
            .await?;
        record_outcome(StorageMode::Relational, "semaphore_refresh", refreshed);
        Ok(refreshed)
    }

    async fn get_state(&self, key: &str) -> Result<Option<SemaphoreState>> {
        let now = current_timestamp();
        let key = key.to_string();
        self.run(move |txn| Box::pin(async move { Ok(semaphore_slots::state(txn, &key, now).await?) }))
            .await
    }
}

// ============================================================================
// SharedLockAdapter implementation
// ============================================================================

#[async_trait]
impl SharedLockAdapter for ExternalDbLockService {
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
        let (key, lock_id) = (key.to_string(), lock_id.to_string());

        let acquired = self
            .run(move |txn| {
                Box::pin(async move {
                    let (writer, readers_active) = exclusive_sides(txn, &key, now).await?;
                    if readers_active {
                        return Ok(false);
                    }
                    if let Some(writer) = writer {
                        return Ok(writer.owner == lock_id);
                    }

                    // Expired reader rows and any expired writer row are replaced
                    reader_slots::purge_expired(txn, &key, now).await?;
                    reader_slots::drop_if_drained(txn, &key).await?;
                    writer_lock::Entity::delete_by_id(key.clone()).exec(txn).await?;
                    let writer = writer_lock::ActiveModel {
                        key: Set(key.clone()),
                        owner: Set(lock_id.clone()),
                        expiration: Set(expiration),
                    };
                    writer_lock::Entity::insert(writer)
                        .exec_without_returning(txn)
                        .await?;
                    Ok(true)
                })
            })
            .await?;
        record_outcome(StorageMode::Relational, "writer_acquire", acquired);
        Ok(acquired)
    }

    async fn release_writer(&self, key: &str, lock_id: &str) -> Result<bool> {
        let now = current_timestamp();
        let (key, lock_id) = (key.to_string(), lock_id.to_string());
        let released = self
            .run(move |txn| {
                Box::pin(async move {
                    exclusive_sides(txn, &key, now).await?;
                    let result = writer_lock::Entity::delete_many()
                        .filter(writer_lock::Column::Key.eq(key.as_str()))
                        .filter(writer_lock::Column::Owner.eq(lock_id.as_str()))
                        .filter(active_writer(now))
                        .exec(txn)
                        .await?;
                    Ok(result.rows_affected > 0)
                })
            })
            .await?;
        record_outcome(StorageMode::Relational, "writer_release", released);
        Ok(released)
    }

    async fn force_release_writer(&self, key: &str) -> Result<bool> {
        let now = current_timestamp();
        let key = key.to_string();
        let released = self
            .run(move |txn| {
                Box::pin(async move {
                    let (writer, _) = exclusive_sides(txn, &key, now).await?;
                    writer_lock::Entity::delete_by_id(key.clone()).exec(txn).await?;
                    Ok(writer.is_some())
                })
            })
            .await?;
        record_outcome(StorageMode::Relational, "writer_force_release", released);
        Ok(released)
    }

    async fn refresh_writer(&self, key: &str, lock_id: &str, ttl: Duration) -> Result<bool> {
        let now = current_timestamp();
        let expiration = expiration_after(ttl, now);
        let (key, lock_id) = (key.to_string(), lock_id.to_string());
        let refreshed = self
            .run(move |txn| {
                Box::pin(async move {
                    exclusive_sides(txn, &key, now).await?;
                    let result = writer_lock::Entity::update_many()
                        .col_expr(writer_lock::Column::Expiration, Expr::value(expiration))
                        .filter(writer_lock::Column::Key.eq(key.as_str()))
                        .filter(writer_lock::Column::Owner.eq(lock_id.as_str()))
                        .filter(writer_lock::Column::Expiration.is_not_null())
                        .filter(writer_lock::Column::Expiration.gt(now))
                        .exec(txn)
                        .await?;
                    Ok(result.rows_affected > 0)
                })
            })
            .await?;
        record_outcome(StorageMode::Relational, "writer_refresh", refreshed);
        Ok(refreshed)
    }

    async fn acquire_reader(&self, request: ReaderAcquireRequest) -> Result<bool> {
        request.validate()?;
        let now = current_timestamp();
        let expiration = expiration_from_ttl(request.ttl, now);
        let ReaderAcquireRequest {
            key,
            lock_id,
            limit,
            ..
        } = request;

        let acquired = self
            .run(move |txn| {
                Box::pin(async move {
                    let (writer, _) = exclusive_sides(txn, &key, now).await?;
                    if writer.is_some() {
                        return Ok(false);
                    }
                    writer_lock::Entity::delete_by_id(key.clone()).exec(txn).await?;
                    let acquired =
                        reader_slots::acquire(txn, &key, &lock_id, limit, expiration, now).await?;
                    tracing::debug!(key = %key, lock_id = %lock_id, acquired, "reader acquire");
                    Ok(acquired)
                })
            })
            .await?;
        record_outcome(StorageMode::Relational, "reader_acquire", acquired);
        Ok(acquired)
    }

    async fn release_reader(&self, key: &str, lock_id: &str) -> Result<bool> {
        let now = current_timestamp();
        let (key, lock_id) = (key.to_string(), lock_id.to_string());
        let released = self
            .run(move |txn| {
                Box::pin(async move {
                    exclusive_sides(txn, &key, now).await?;
                    Ok(reader_slots::release(txn, &key, &lock_id, now).await?)
                })
            })
            .await?;
        record_outcome(StorageMode::Relational, "reader_release", released);
        Ok(released)
    }

    async fn force_release_all_readers(&self, key: &str) -> Result<bool> {
        let now = current_timestamp();
        let key = key.to_string();
        let released = self
            .run(move |txn| {
                Box::pin(async move {
                    exclusive_sides(txn, &key, now).await?;
                    Ok(reader_slots::clear(txn, &key, now).await?)
                })
            })
            .await?;
        record_outcome(StorageMode::Relational, "reader_force_release_all", released);
        Ok(released)
    }

    async fn refresh_reader(&self, key: &str, lock_id: &str, ttl: Duration) -> Result<bool> {
        let now = current_timestamp();
        let expiration = expiration_after(ttl, now);
        let (key, lock_id) = (key.to_string(), lock_id.to_string());
        let refreshed = self
            .run(move |txn| {
                Box::pin(async move {
                    exclusive_sides(txn, &key, now).await?;
                    Ok(reader_slots::refresh(txn, &key, &lock_id, expiration, now).await?)
                })
            })
            .await?;
        record_outcome(StorageMode::Relational, "reader_refresh", refreshed);
        Ok(refreshed)
    }

    async fn force_release(&self, key: &str) -> Result<bool> {
        let now = current_timestamp();
        let key = key.to_string();
        let released = self
            .run(move |txn| {
                Box::pin(async move {
                    let (writer, readers_active) = exclusive_sides(txn, &key, now).await?;
                    writer_lock::Entity::delete_by_id(key.clone()).exec(txn).await?;
                    reader_slots::clear(txn, &key, now).await?;
                    Ok(writer.is_some() || readers_active)
                })
            })
            .await?;
        record_outcome(StorageMode::Relational, "shared_force_release", released);
        Ok(released)
    }

    async fn get_state(&self, key: &str) -> Result<Option<SharedLockState>> {
        let now = current_timestamp();
        let key = key.to_string();
        self.run(move |txn| {
            Box::pin(async move {
                let (writer, _) = exclusive_sides(txn, &key, now).await?;
                let writer = writer.map(|writer| WriterLockState {
                    owner: writer.owner,
                    expiration: writer.expiration,
                });
                let reader = reader_slots::state(txn, &key, now).await?;
                if writer.is_none() && reader.is_none() {
                    return Ok(None);
                }
                Ok(Some(SharedLockState { writer, reader }))
            })
        })
        .await
    }
}

#[async_trait]
impl LockService for ExternalDbLockService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Relational
    }

    async fn health_check(&self) -> Result<()> {
        self.db.ping().await.map_err(LockError::storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_service() -> ExternalDbLockService {
        let service = ExternalDbLockService::connect("sqlite::memory:", 1)
            .await
            .unwrap();
        service.ensure_schema().await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let service = create_test_service().await;
        service.ensure_schema().await.unwrap();
        service.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_limit_is_pinned_until_drained() {
        let service = create_test_service().await;

        assert!(
            service
                .acquire(SemaphoreAcquireRequest::new("jobs", "1", 1))
                .await
                .unwrap()
        );
        assert!(
            !service
                .acquire(SemaphoreAcquireRequest::new("jobs", "2", 3))
                .await
                .unwrap()
        );
        assert!(service.release("jobs", "1").await.unwrap());
        assert!(
            service
                .acquire(SemaphoreAcquireRequest::new("jobs", "2", 3))
                .await
                .unwrap()
        );
        let state = SemaphoreAdapter::get_state(&service, "jobs")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.limit, 3);
    }

    #[tokio::test]
    async fn test_purge_expired_removes_rows() {
        let service = create_test_service().await;

        let request =
            SemaphoreAcquireRequest::new("jobs", "1", 2).with_ttl(Duration::from_millis(10));
        assert!(service.acquire(request).await.unwrap());
        assert!(
            service
                .acquire_writer("doc", "o1", Some(Duration::from_millis(10)))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(30)).await;

        // slot row + semaphore row + writer row
        assert_eq!(service.purge_expired().await.unwrap(), 3);
        assert_eq!(service.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_task_lives_with_service() {
        let base = create_test_service().await;
        let service = base.clone().with_cleanup(Duration::from_millis(20));
        assert!(service.clone().has_cleanup());
        assert!(!base.has_cleanup());

        let request =
            SemaphoreAcquireRequest::new("jobs", "1", 2).with_ttl(Duration::from_millis(10));
        assert!(service.acquire(request).await.unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(base.purge_expired().await.unwrap(), 0);

        // Dropping the last owner stops the purge
        drop(service);
        tokio::task::yield_now().await;
        assert!(
            base.acquire_writer("doc", "o1", Some(Duration::from_millis(10)))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(base.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tampered_rows_raise_invariant_error() {
        let service = create_test_service().await;
        assert!(service.acquire_writer("doc", "o1", None).await.unwrap());

        // Write a reader row behind the adapter's back
        service
            .transaction::<_, _, DbErr>(|txn| {
                Box::pin(async move {
                    crate::entity::reader_semaphore::Entity::insert(
                        crate::entity::reader_semaphore::ActiveModel {
                            key: Set("doc".to_string()),
                            limit: Set(1),
                        },
                    )
                    .exec_without_returning(txn)
                    .await?;
                    crate::entity::reader_semaphore_slot::Entity::insert(
                        crate::entity::reader_semaphore_slot::ActiveModel {
                            key: Set("doc".to_string()),
                            id: Set("r1".to_string()),
                            expiration: Set(None),
                        },
                    )
                    .exec_without_returning(txn)
                    .await?;
                    Ok(())
                })
            })
            .await
            .unwrap();

        let err = SharedLockAdapter::get_state(&service, "doc")
            .await
            .unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(service.release_writer("doc", "o1").await.is_err());
    }
}
