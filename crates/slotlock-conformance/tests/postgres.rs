//! Conformance suite against a real relational database
//!
//! Set `TEST_DATABASE_URL` (PostgreSQL or MySQL) and run with
//! `cargo test -p slotlock-conformance --test postgres -- --ignored`.

use std::env;

use slotlock_conformance::{relational, semaphore_conformance, shared_lock_conformance};
use slotlock_persistence::ExternalDbLockService;

async fn database_adapter() -> ExternalDbLockService {
    let url = env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let service = ExternalDbLockService::connect(&url, 8)
        .await
        .expect("Failed to connect to test database");
    service
        .ensure_schema()
        .await
        .expect("Failed to create lock tables");
    service
}

semaphore_conformance!(database_adapter(), #[ignore = "requires test database"]);
shared_lock_conformance!(database_adapter(), #[ignore = "requires test database"]);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires test database"]
async fn test_stored_rows_stay_exclusive() {
    relational::stored_rows_stay_exclusive(&database_adapter().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires test database"]
async fn test_stored_slots_respect_limit() {
    relational::stored_slots_respect_limit(&database_adapter().await).await;
}
