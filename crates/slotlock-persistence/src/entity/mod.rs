//! SeaORM entity definitions for the relational lock backend
//!
//! Expirations are stored as nullable Unix epoch milliseconds; `NULL` means
//! the row never expires.

pub mod prelude;

pub mod reader_semaphore;
pub mod reader_semaphore_slot;
pub mod semaphore;
pub mod semaphore_slot;
pub mod writer_lock;
