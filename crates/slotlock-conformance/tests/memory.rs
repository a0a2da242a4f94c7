//! Conformance suite against the in-process memory backend

use slotlock_conformance::{semaphore_conformance, shared_lock_conformance};
use slotlock_persistence::MemoryLockService;

async fn memory_adapter() -> MemoryLockService {
    MemoryLockService::new()
}

semaphore_conformance!(memory_adapter());
shared_lock_conformance!(memory_adapter());
