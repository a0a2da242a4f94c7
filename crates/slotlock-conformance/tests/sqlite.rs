//! Conformance suite against the relational backend on in-memory SQLite

use slotlock_conformance::{relational, semaphore_conformance, shared_lock_conformance};
use slotlock_persistence::ExternalDbLockService;

async fn sqlite_adapter() -> ExternalDbLockService {
    // Every pooled connection to `sqlite::memory:` opens its own database
    let service = ExternalDbLockService::connect("sqlite::memory:", 1)
        .await
        .expect("Failed to open in-memory SQLite");
    service
        .ensure_schema()
        .await
        .expect("Failed to create lock tables");
    service
}

semaphore_conformance!(sqlite_adapter());
shared_lock_conformance!(sqlite_adapter());

#[tokio::test]
async fn test_stored_rows_stay_exclusive() {
    relational::stored_rows_stay_exclusive(&sqlite_adapter().await).await;
}

#[tokio::test]
async fn test_stored_slots_respect_limit() {
    relational::stored_slots_respect_limit(&sqlite_adapter().await).await;
}
