//! Slotlock Conformance - one behavioral suite for every backend
//!
//! Scenarios are plain async functions generic over the adapter traits.
//! `semaphore_conformance!` and `shared_lock_conformance!` expand them into
//! `#[tokio::test]` functions for a given adapter factory:
//!
//! ```rust,ignore
//! async fn adapter() -> MemoryLockService {
//!     MemoryLockService::new()
//! }
//!
//! semaphore_conformance!(adapter());
//! shared_lock_conformance!(adapter(), #[ignore = "requires redis"]);
//! ```
//!
//! Every scenario works on its own random key, so one adapter instance (and
//! one database) can be shared by concurrently running tests.

pub mod relational;
pub mod semaphore;
pub mod shared_lock;

use uuid::Uuid;

/// Random key scoped to one scenario run
pub fn unique_key(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[doc(hidden)]
#[macro_export]
macro_rules! conformance_case {
    ($module:ident, $case:ident, $factory:expr $(, #[$attr:meta])*) => {
        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        $(#[$attr])*
        async fn $case() {
            let adapter = $factory.await;
            $crate::$module::$case(&adapter).await;
        }
    };
}

/// Instantiate the semaphore scenarios for `$factory`, a future resolving to
/// a `SemaphoreAdapter`. Extra attributes are applied to every test.
#[macro_export]
macro_rules! semaphore_conformance {
    ($factory:expr $(, #[$attr:meta])*) => {
        mod semaphore_conformance {
            #[allow(unused_imports)]
            use super::*;

            $crate::conformance_case!(semaphore, scenario_a_limit_is_enforced, $factory $(, #[$attr])*);
            $crate::conformance_case!(semaphore, scenario_c_expired_slot_frees_capacity, $factory $(, #[$attr])*);
            $crate::conformance_case!(semaphore, reacquire_is_idempotent_without_renewal, $factory $(, #[$attr])*);
            $crate::conformance_case!(semaphore, release_reports_whether_removed, $factory $(, #[$attr])*);
            $crate::conformance_case!(semaphore, release_expired_slot_is_noop, $factory $(, #[$attr])*);
            $crate::conformance_case!(semaphore, force_release_all_reports_active_slots, $factory $(, #[$attr])*);
            $crate::conformance_case!(semaphore, refresh_only_extends_expiring_slots, $factory $(, #[$attr])*);
            $crate::conformance_case!(semaphore, limit_is_pinned_until_drained, $factory $(, #[$attr])*);
            $crate::conformance_case!(semaphore, state_of_unknown_key_is_none, $factory $(, #[$attr])*);
            $crate::conformance_case!(semaphore, invalid_requests_are_rejected, $factory $(, #[$attr])*);
            $crate::conformance_case!(semaphore, largest_limit_is_kept, $factory $(, #[$attr])*);
            $crate::conformance_case!(semaphore, huge_ttl_is_clamped, $factory $(, #[$attr])*);
            $crate::conformance_case!(semaphore, concurrent_acquires_respect_limit, $factory $(, #[$attr])*);
        }
    };
}

/// Instantiate the shared-lock scenarios for `$factory`, a future resolving
/// to a `SharedLockAdapter`. Extra attributes are applied to every test.
#[macro_export]
macro_rules! shared_lock_conformance {
    ($factory:expr $(, #[$attr:meta])*) => {
        mod shared_lock_conformance {
            #[allow(unused_imports)]
            use super::*;

            $crate::conformance_case!(shared_lock, scenario_b_writer_excludes_readers, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, scenario_d_writer_reentry, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, readers_exclude_writer, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, expired_writer_is_replaced, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, expired_readers_unblock_writer, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, release_writer_requires_owner, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, force_release_writer_ignores_owner, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, refresh_writer_rules, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, reader_limit_is_enforced, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, reader_ops_under_writer_are_noops, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, refresh_reader_rules, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, force_release_clears_either_side, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, state_reports_active_side, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, invalid_requests_are_rejected, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, largest_reader_limit_is_kept, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, huge_ttl_is_clamped, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, concurrent_writers_and_readers_stay_exclusive, $factory $(, #[$attr])*);
            $crate::conformance_case!(shared_lock, concurrent_readers_respect_limit, $factory $(, #[$attr])*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_key_is_unique() {
        let a = unique_key("lock");
        let b = unique_key("lock");
        assert!(a.starts_with("lock_"));
        assert_ne!(a, b);
    }
}
