//! Slotlock Persistence - Semaphore and shared-lock adapters
//!
//! This crate provides:
//! - The adapter contracts (`SemaphoreAdapter`, `SharedLockAdapter`, `LockService`)
//! - Domain model types shared by every backend
//! - In-memory, relational (SeaORM) and document (Redis) backends
//! - Settings loading and the backend factory

pub mod document;
pub mod entity;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod settings;
pub mod sql;
pub mod traits;

// Re-export driver crates for convenience
pub use redis;
pub use sea_orm;

// Re-export entity prelude
pub use entity::prelude::*;

// Re-export adapter traits
pub use traits::{LockService, SemaphoreAdapter, SharedLockAdapter};

// Re-export backends
pub use document::DocumentLockService;
pub use memory::MemoryLockService;
pub use sql::ExternalDbLockService;

// Re-export model types
pub use model::{
    ReaderAcquireRequest, SemaphoreAcquireRequest, SemaphoreState, SharedLockState, StorageMode,
    WriterLockState,
};

pub use settings::{LockSettings, create_lock_service};
