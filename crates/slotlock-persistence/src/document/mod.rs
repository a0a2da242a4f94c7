//! Document-store lock backend (Redis)
//!
//! One JSON document per key. Every mutating operation is a single Lua script
//! that reads, decides and writes the document inside Redis, so it is atomic
//! with respect to every other client without any client-side retry loop.
//!
//! Layout:
//! - `{prefix}semaphore:{key}` → `{key, expiration, limit, slots: [{id, expiration}]}`
//! - `{prefix}shared:{key}` → `{key, expiration, writer: {owner, expiration}|null,
//!   reader: {limit, slots: [{id, expiration}]}|null}`
//!
//! The document-level `expiration` is the latest entry expiration (null when
//! any entry never expires) and is applied with `PEXPIREAT`, which reclaims
//! documents whose entries all expired. Individual expired entries are
//! filtered on every read.

mod doc;

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};

use slotlock_common::{
    DEFAULT_KEY_PREFIX, LockError, Result, current_timestamp, expiration_after, expiration_from_ttl,
    validate_id,
};

use crate::metrics::record_outcome;
use crate::model::{
    ReaderAcquireRequest, SemaphoreAcquireRequest, SemaphoreState, SharedLockState, StorageMode,
};
use crate::traits::{LockService, SemaphoreAdapter, SharedLockAdapter};

use doc::{SemaphoreDoc, SharedLockDoc};

/// Error code raised by scripts that observe a writer and readers together
const INVARIANT_CODE: &str = "INVARIANT";

macro_rules! lock_script {
    ($name:ident, $file:literal) => {
        static $name: LazyLock<Script> = LazyLock::new(|| {
            Script::new(concat!(
                include_str!("lua/prelude.lua"),
                "\n",
                include_str!($file)
            ))
        });
    };
}

lock_script!(SEMAPHORE_ACQUIRE, "lua/semaphore_acquire.lua");
lock_script!(SEMAPHORE_RELEASE, "lua/semaphore_release.lua");
lock_script!(SEMAPHORE_FORCE_RELEASE_ALL, "lua/semaphore_force_release_all.lua");
lock_script!(SEMAPHORE_REFRESH, "lua/semaphore_refresh.lua");
lock_script!(ACQUIRE_WRITER, "lua/acquire_writer.lua");
lock_script!(RELEASE_WRITER, "lua/release_writer.lua");
lock_script!(FORCE_RELEASE_WRITER, "lua/force_release_writer.lua");
lock_script!(REFRESH_WRITER, "lua/refresh_writer.lua");
lock_script!(ACQUIRE_READER, "lua/acquire_reader.lua");
lock_script!(RELEASE_READER, "lua/release_reader.lua");
lock_script!(FORCE_RELEASE_ALL_READERS, "lua/force_release_all_readers.lua");
lock_script!(REFRESH_READER, "lua/refresh_reader.lua");
lock_script!(FORCE_RELEASE, "lua/force_release.lua");

/// Script argument for an optional expiration; empty means never expires
fn expiration_arg(expiration: Option<i64>) -> String {
    expiration.map(|e| e.to_string()).unwrap_or_default()
}

fn map_redis_error(key: &str, err: RedisError) -> LockError {
    if err.code() == Some(INVARIANT_CODE) {
        tracing::warn!(key, "shared lock holds an active writer and active readers");
        return LockError::both_sides_active(key);
    }
    LockError::storage(err)
}

/// Redis-backed lock service
///
/// Cloning shares the underlying multiplexed connection.
#[derive(Clone)]
pub struct DocumentLockService {
    conn: ConnectionManager,
    key_prefix: String,
}

impl DocumentLockService {
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
        }
    }

    /// Connect to `url`, namespacing every document under `key_prefix`
    pub async fn connect(url: &str, key_prefix: Option<&str>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(LockError::storage)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(LockError::storage)?;
        tracing::info!("connected document lock backend");
        Ok(Self::new(conn, key_prefix.unwrap_or(DEFAULT_KEY_PREFIX)))
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn semaphore_key(&self, key: &str) -> String {
        format!("{}semaphore:{}", self.key_prefix, key)
    }

    fn shared_key(&self, key: &str) -> String {
        format!("{}shared:{}", self.key_prefix, key)
    }

    async fn load(&self, storage_key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(storage_key).await.map_err(LockError::storage)?;
        Ok(raw)
    }
}

// ============================================================================
// SemaphoreAdapter implementation
// ============================================================================

#[async_trait]
impl SemaphoreAdapter for DocumentLockService {
    async fn acquire(&self, request: SemaphoreAcquireRequest) -> Result<bool> {
        request.validate()?;
        let now = current_timestamp();
        let expiration = expiration_from_ttl(request.ttl, now);

        let mut conn = self.conn.clone();
        let acquired: bool = SEMAPHORE_ACQUIRE
            .key(self.semaphore_key(&request.key))
            .arg(&request.key)
            .arg(&request.slot_id)
            .arg(request.limit)
            .arg(expiration_arg(expiration))
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(&request.key, e))?;

        tracing::debug!(key = %request.key, slot_id = %request.slot_id, acquired, "semaphore acquire");
        record_outcome(StorageMode::Document, "semaphore_acquire", acquired);
        Ok(acquired)
    }

    async fn release(&self, key: &str, slot_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let released: bool = SEMAPHORE_RELEASE
            .key(self.semaphore_key(key))
            .arg(key)
            .arg(slot_id)
            .arg(current_timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        record_outcome(StorageMode::Document, "semaphore_release", released);
        Ok(released)
    }

    async fn force_release_all(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let released: bool = SEMAPHORE_FORCE_RELEASE_ALL
            .key(self.semaphore_key(key))
            .arg(current_timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        record_outcome(StorageMode::Document, "semaphore_force_release_all", released);
        Ok(released)
    }

    async fn refresh(&self, key: &str, slot_id: &str, ttl: Duration) -> Result<bool> {
        let now = current_timestamp();
        let expiration = expiration_after(ttl, now);

        let mut conn = self.conn.clone();
        let refreshed: bool = SEMAPHORE_REFRESH
            .key(self.semaphore_key(key))
            .arg(key)
            .arg(slot_id)
            .arg(expiration)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        record_outcome(StorageMode::Document, "semaphore_refresh", refreshed);
        Ok(refreshed)
    }

    async fn get_state(&self, key: &str) -> Result<Option<SemaphoreState>> {
        let Some(raw) = self.load(&self.semaphore_key(key)).await? else {
            return Ok(None);
        };
        let doc: SemaphoreDoc = serde_json::from_str(&raw).map_err(LockError::storage)?;
        Ok(doc.into_state(current_timestamp()))
    }
}

// ============================================================================
// SharedLockAdapter implementation
// ============================================================================

#[async_trait]
impl SharedLockAdapter for DocumentLockService {
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

        let mut conn = self.conn.clone();
        let acquired: bool = ACQUIRE_WRITER
            .key(self.shared_key(key))
            .arg(key)
            .arg(lock_id)
            .arg(expiration_arg(expiration))
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;

        tracing::debug!(key, lock_id, acquired, "writer acquire");
        record_outcome(StorageMode::Document, "writer_acquire", acquired);
        Ok(acquired)
    }

    async fn release_writer(&self, key: &str, lock_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let released: bool = RELEASE_WRITER
            .key(self.shared_key(key))
            .arg(key)
            .arg(lock_id)
            .arg(current_timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        record_outcome(StorageMode::Document, "writer_release", released);
        Ok(released)
    }

    async fn force_release_writer(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let released: bool = FORCE_RELEASE_WRITER
            .key(self.shared_key(key))
            .arg(key)
            .arg(current_timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        record_outcome(StorageMode::Document, "writer_force_release", released);
        Ok(released)
    }

    async fn refresh_writer(&self, key: &str, lock_id: &str, ttl: Duration) -> Result<bool> {
        let now = current_timestamp();
        let expiration = expiration_after(ttl, now);

        let mut conn = self.conn.clone();
        let refreshed: bool = REFRESH_WRITER
            .key(self.shared_key(key))
            .arg(key)
            .arg(lock_id)
            .arg(expiration)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        record_outcome(StorageMode::Document, "writer_refresh", refreshed);
        Ok(refreshed)
    }

    async fn acquire_reader(&self, request: ReaderAcquireRequest) -> Result<bool> {
        request.validate()?;
        let now = current_timestamp();
        let expiration = expiration_from_ttl(request.ttl, now);

        let mut conn = self.conn.clone();
        let acquired: bool = ACQUIRE_READER
            .key(self.shared_key(&request.key))
            .arg(&request.key)
            .arg(&request.lock_id)
            .arg(request.limit)
            .arg(expiration_arg(expiration))
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(&request.key, e))?;

        tracing::debug!(key = %request.key, lock_id = %request.lock_id, acquired, "reader acquire");
        record_outcome(StorageMode::Document, "reader_acquire", acquired);
        Ok(acquired)
    }

    async fn release_reader(&self, key: &str, lock_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let released: bool = RELEASE_READER
            .key(self.shared_key(key))
            .arg(key)
            .arg(lock_id)
            .arg(current_timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        record_outcome(StorageMode::Document, "reader_release", released);
        Ok(released)
    }

    async fn force_release_all_readers(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let released: bool = FORCE_RELEASE_ALL_READERS
            .key(self.shared_key(key))
            .arg(key)
            .arg(current_timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        record_outcome(StorageMode::Document, "reader_force_release_all", released);
        Ok(released)
    }

    async fn refresh_reader(&self, key: &str, lock_id: &str, ttl: Duration) -> Result<bool> {
        let now = current_timestamp();
        let expiration = expiration_after(ttl, now);

        let mut conn = self.conn.clone();
        let refreshed: bool = REFRESH_READER
            .key(self.shared_key(key))
            .arg(key)
            .arg(lock_id)
            .arg(expiration)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        record_outcome(StorageMode::Document, "reader_refresh", refreshed);
        Ok(refreshed)
    }

    async fn force_release(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let released: bool = FORCE_RELEASE
            .key(self.shared_key(key))
            .arg(current_timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(key, e))?;
        record_outcome(StorageMode::Document, "shared_force_release", released);
        Ok(released)
    }

    async fn get_state(&self, key: &str) -> Result<Option<SharedLockState>> {
        let Some(raw) = self.load(&self.shared_key(key)).await? else {
            return Ok(None);
        };
        let doc: SharedLockDoc = serde_json::from_str(&raw).map_err(LockError::storage)?;
        doc.into_state(key, current_timestamp())
    }
}

#[async_trait]
impl LockService for DocumentLockService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Document
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(LockError::storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiration_arg() {
        assert_eq!(expiration_arg(None), "");
        assert_eq!(expiration_arg(Some(1_700_000_000_000)), "1700000000000");
    }

    #[test]
    fn test_driver_errors_map_to_storage() {
        let err = RedisError::from((redis::ErrorKind::IoError, "connection reset"));
        assert!(map_redis_error("doc", err).is_storage());
    }

    #[test]
    fn test_scripts_include_prelude() {
        for script in [&*SEMAPHORE_ACQUIRE, &*ACQUIRE_READER, &*FORCE_RELEASE] {
            assert_eq!(script.get_hash().len(), 40);
        }
        assert_ne!(SEMAPHORE_ACQUIRE.get_hash(), ACQUIRE_READER.get_hash());
    }
}
