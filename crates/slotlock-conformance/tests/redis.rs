//! Conformance suite against the Redis document backend
//!
//! Set `TEST_REDIS_URL` and run with
//! `cargo test -p slotlock-conformance --test redis -- --ignored`.

use std::env;

use slotlock_conformance::{semaphore_conformance, shared_lock_conformance};
use slotlock_persistence::DocumentLockService;

async fn redis_adapter() -> DocumentLockService {
    let url = env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    DocumentLockService::connect(&url, Some("slotlock-test:"))
        .await
        .expect("Failed to connect to test redis")
}

semaphore_conformance!(redis_adapter(), #[ignore = "requires redis"]);
shared_lock_conformance!(redis_adapter(), #[ignore = "requires redis"]);
