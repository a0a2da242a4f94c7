//! Shared (reader/writer) lock scenarios

use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use tokio::time::sleep;

use slotlock_common::{LockError, MAX_EXPIRATION, MAX_LIMIT, Result};
use slotlock_persistence::{ReaderAcquireRequest, SharedLockAdapter};

use crate::unique_key;

fn reader(key: &str, lock_id: &str, limit: u32) -> ReaderAcquireRequest {
    ReaderAcquireRequest::new(key, lock_id, limit)
}

/// Assert the key never shows an active writer together with active readers
async fn assert_exclusive<A: SharedLockAdapter + ?Sized>(adapter: &A, key: &str) {
    if let Some(state) = adapter.get_state(key).await.unwrap() {
        assert!(
            state.writer.is_none() || state.reader.is_none(),
            "writer and readers active together on {}",
            key
        );
    }
}

pub async fn scenario_b_writer_excludes_readers<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("k");

    assert!(adapter.acquire_writer(&key, "o1", None).await.unwrap());
    assert!(!adapter.acquire_reader(reader(&key, "r1", 2)).await.unwrap());
    assert!(adapter.release_writer(&key, "o1").await.unwrap());
    assert!(adapter.acquire_reader(reader(&key, "r1", 2)).await.unwrap());
}

pub async fn scenario_d_writer_reentry<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("k");

    assert!(adapter.acquire_writer(&key, "o1", None).await.unwrap());
    assert!(adapter.acquire_writer(&key, "o1", None).await.unwrap());
    assert!(!adapter.acquire_writer(&key, "o2", None).await.unwrap());

    let writer = adapter.get_state(&key).await.unwrap().unwrap().writer.unwrap();
    assert_eq!(writer.owner, "o1");
    assert_eq!(writer.expiration, None);
}

pub async fn readers_exclude_writer<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("readers");

    assert!(adapter.acquire_reader(reader(&key, "r1", 3)).await.unwrap());
    assert!(adapter.acquire_reader(reader(&key, "r2", 3)).await.unwrap());
    assert!(!adapter.acquire_writer(&key, "o1", None).await.unwrap());

    assert!(adapter.release_reader(&key, "r1").await.unwrap());
    assert!(!adapter.acquire_writer(&key, "o1", None).await.unwrap());
    assert!(adapter.release_reader(&key, "r2").await.unwrap());
    assert!(adapter.acquire_writer(&key, "o1", None).await.unwrap());
    assert_exclusive(adapter, &key).await;
}

pub async fn expired_writer_is_replaced<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("expired_writer");

    let ttl = Some(Duration::from_millis(50));
    assert!(adapter.acquire_writer(&key, "o1", ttl).await.unwrap());
    assert!(!adapter.acquire_writer(&key, "o2", None).await.unwrap());
    sleep(Duration::from_millis(60)).await;

    assert!(adapter.get_state(&key).await.unwrap().is_none());
    assert!(!adapter.release_writer(&key, "o1").await.unwrap());
    assert!(adapter.acquire_writer(&key, "o2", None).await.unwrap());
    let writer = adapter.get_state(&key).await.unwrap().unwrap().writer.unwrap();
    assert_eq!(writer.owner, "o2");

    // An expired writer does not block readers either
    let other = unique_key("expired_writer");
    assert!(adapter.acquire_writer(&other, "o1", ttl).await.unwrap());
    sleep(Duration::from_millis(60)).await;
    assert!(adapter.acquire_reader(reader(&other, "r1", 1)).await.unwrap());
    assert_exclusive(adapter, &other).await;
}

pub async fn expired_readers_unblock_writer<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("expired_readers");

    let expiring = reader(&key, "r1", 2).with_ttl(Duration::from_millis(50));
    assert!(adapter.acquire_reader(expiring).await.unwrap());
    assert!(!adapter.acquire_writer(&key, "o1", None).await.unwrap());
    sleep(Duration::from_millis(60)).await;

    assert!(adapter.acquire_writer(&key, "o1", None).await.unwrap());
    let state = adapter.get_state(&key).await.unwrap().unwrap();
    assert!(state.reader.is_none());
    assert_eq!(state.writer.unwrap().owner, "o1");
}

pub async fn release_writer_requires_owner<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("release_writer");

    assert!(!adapter.release_writer(&key, "o1").await.unwrap());
    assert!(adapter.acquire_writer(&key, "o1", None).await.unwrap());
    assert!(!adapter.release_writer(&key, "o2").await.unwrap());
    assert!(adapter.get_state(&key).await.unwrap().is_some());

    assert!(adapter.release_writer(&key, "o1").await.unwrap());
    assert!(!adapter.release_writer(&key, "o1").await.unwrap());
    assert!(adapter.get_state(&key).await.unwrap().is_none());
}

pub async fn force_release_writer_ignores_owner<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("force_writer");

    assert!(!adapter.force_release_writer(&key).await.unwrap());
    assert!(adapter.acquire_writer(&key, "o1", None).await.unwrap());
    assert!(adapter.force_release_writer(&key).await.unwrap());
    assert!(adapter.get_state(&key).await.unwrap().is_none());
    assert!(adapter.acquire_writer(&key, "o2", None).await.unwrap());

    // Readers are untouched
    let other = unique_key("force_writer");
    assert!(adapter.acquire_reader(reader(&other, "r1", 1)).await.unwrap());
    assert!(!adapter.force_release_writer(&other).await.unwrap());
    assert!(adapter.get_state(&other).await.unwrap().unwrap().reader.is_some());
}

pub async fn refresh_writer_rules<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("refresh_writer");
    let ttl = Duration::from_secs(60);

    assert!(!adapter.refresh_writer(&key, "o1", ttl).await.unwrap());

    // Unexpireable writer
    assert!(adapter.acquire_writer(&key, "o1", None).await.unwrap());
    assert!(!adapter.refresh_writer(&key, "o1", ttl).await.unwrap());
    assert!(adapter.release_writer(&key, "o1").await.unwrap());

    let short = Some(Duration::from_millis(500));
    assert!(adapter.acquire_writer(&key, "o1", short).await.unwrap());
    assert!(!adapter.refresh_writer(&key, "o2", ttl).await.unwrap());
    let before = adapter.get_state(&key).await.unwrap().unwrap().writer.unwrap().expiration;
    assert!(adapter.refresh_writer(&key, "o1", ttl).await.unwrap());
    let after = adapter.get_state(&key).await.unwrap().unwrap().writer.unwrap().expiration;
    assert!(after > before);

    // Expired writer
    let other = unique_key("refresh_writer");
    let tiny = Some(Duration::from_millis(50));
    assert!(adapter.acquire_writer(&other, "o1", tiny).await.unwrap());
    sleep(Duration::from_millis(60)).await;
    assert!(!adapter.refresh_writer(&other, "o1", ttl).await.unwrap());
    assert!(adapter.get_state(&other).await.unwrap().is_none());
}

pub async fn reader_limit_is_enforced<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("reader_limit");

    assert!(adapter.acquire_reader(reader(&key, "r1", 2)).await.unwrap());
    assert!(adapter.acquire_reader(reader(&key, "r2", 2)).await.unwrap());
    assert!(!adapter.acquire_reader(reader(&key, "r3", 2)).await.unwrap());
    // Idempotent for a holder even at capacity
    assert!(adapter.acquire_reader(reader(&key, "r1", 2)).await.unwrap());

    let state = adapter.get_state(&key).await.unwrap().unwrap();
    let readers = state.reader.unwrap();
    assert_eq!(readers.limit, 2);
    assert_eq!(readers.acquired_slots.len(), 2);

    // The stored reader limit wins while readers are held
    assert!(!adapter.acquire_reader(reader(&key, "r3", 5)).await.unwrap());
}

pub async fn reader_ops_under_writer_are_noops<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("reader_noop");
    let ttl = Duration::from_secs(60);

    assert!(adapter.acquire_writer(&key, "o1", None).await.unwrap());
    assert!(!adapter.release_reader(&key, "r1").await.unwrap());
    assert!(!adapter.refresh_reader(&key, "r1", ttl).await.unwrap());
    assert!(!adapter.force_release_all_readers(&key).await.unwrap());

    let state = adapter.get_state(&key).await.unwrap().unwrap();
    assert_eq!(state.writer.unwrap().owner, "o1");
    assert!(state.reader.is_none());
}

pub async fn refresh_reader_rules<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("refresh_reader");
    let ttl = Duration::from_secs(60);

    assert!(adapter.acquire_reader(reader(&key, "forever", 3)).await.unwrap());
    assert!(!adapter.refresh_reader(&key, "forever", ttl).await.unwrap());
    assert!(!adapter.refresh_reader(&key, "missing", ttl).await.unwrap());

    let short = reader(&key, "short", 3).with_ttl(Duration::from_millis(500));
    assert!(adapter.acquire_reader(short).await.unwrap());
    assert!(adapter.refresh_reader(&key, "short", ttl).await.unwrap());
    let slots = adapter
        .get_state(&key)
        .await
        .unwrap()
        .unwrap()
        .reader
        .unwrap()
        .acquired_slots;
    assert_eq!(slots["forever"], None);
    assert!(slots["short"].is_some());

    let expiring = reader(&key, "expired", 3).with_ttl(Duration::from_millis(50));
    assert!(adapter.acquire_reader(expiring).await.unwrap());
    sleep(Duration::from_millis(60)).await;
    assert!(!adapter.refresh_reader(&key, "expired", ttl).await.unwrap());
    assert!(!adapter.release_reader(&key, "expired").await.unwrap());
}

pub async fn force_release_clears_either_side<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("force_release");

    assert!(!adapter.force_release(&key).await.unwrap());

    assert!(adapter.acquire_writer(&key, "o1", None).await.unwrap());
    assert!(adapter.force_release(&key).await.unwrap());
    assert!(adapter.get_state(&key).await.unwrap().is_none());

    assert!(adapter.acquire_reader(reader(&key, "r1", 2)).await.unwrap());
    assert!(adapter.acquire_reader(reader(&key, "r2", 2)).await.unwrap());
    assert!(adapter.force_release(&key).await.unwrap());
    assert!(adapter.get_state(&key).await.unwrap().is_none());

    assert!(adapter.acquire_reader(reader(&key, "r1", 2)).await.unwrap());
    assert!(adapter.force_release_all_readers(&key).await.unwrap());
    assert!(!adapter.force_release_all_readers(&key).await.unwrap());
    assert!(adapter.acquire_writer(&key, "o1", None).await.unwrap());

    // Only expired entries left counts as nothing cleared
    let other = unique_key("force_release");
    let tiny = Some(Duration::from_millis(50));
    assert!(adapter.acquire_writer(&other, "o1", tiny).await.unwrap());
    sleep(Duration::from_millis(60)).await;
    assert!(!adapter.force_release(&other).await.unwrap());
}

pub async fn state_reports_active_side<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("state");

    assert!(adapter.get_state(&key).await.unwrap().is_none());

    let ttl = Some(Duration::from_secs(60));
    assert!(adapter.acquire_writer(&key, "o1", ttl).await.unwrap());
    let state = adapter.get_state(&key).await.unwrap().unwrap();
    let writer = state.writer.unwrap();
    assert_eq!(writer.owner, "o1");
    assert!(writer.expiration.is_some());
    assert!(state.reader.is_none());
    assert!(adapter.release_writer(&key, "o1").await.unwrap());

    assert!(adapter.acquire_reader(reader(&key, "r1", 4)).await.unwrap());
    let state = adapter.get_state(&key).await.unwrap().unwrap();
    assert!(state.writer.is_none());
    let readers = state.reader.unwrap();
    assert_eq!(readers.limit, 4);
    assert_eq!(readers.acquired_slots.get("r1"), Some(&None));
}

pub async fn invalid_requests_are_rejected<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("invalid");

    let err = adapter.acquire_reader(reader(&key, "r1", 0)).await.unwrap_err();
    assert!(matches!(err, LockError::Configuration(_)));
    let err = adapter.acquire_reader(reader(&key, "", 1)).await.unwrap_err();
    assert!(matches!(err, LockError::Configuration(_)));
    let err = adapter.acquire_writer("", "o1", None).await.unwrap_err();
    assert!(matches!(err, LockError::Configuration(_)));
    let err = adapter.acquire_writer(&key, "", None).await.unwrap_err();
    assert!(matches!(err, LockError::Configuration(_)));

    assert!(adapter.get_state(&key).await.unwrap().is_none());
}

pub async fn largest_reader_limit_is_kept<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("big");

    assert!(adapter.acquire_reader(reader(&key, "r1", MAX_LIMIT)).await.unwrap());
    assert!(adapter.acquire_reader(reader(&key, "r2", MAX_LIMIT)).await.unwrap());
    let readers = adapter.get_state(&key).await.unwrap().unwrap().reader.unwrap();
    assert_eq!(readers.limit, MAX_LIMIT);
    assert_eq!(readers.acquired_slots.len(), 2);

    let err = adapter.acquire_reader(reader(&key, "r3", u32::MAX)).await.unwrap_err();
    assert!(matches!(err, LockError::Configuration(_)));
}

pub async fn huge_ttl_is_clamped<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("huge_ttl");

    assert!(adapter.acquire_writer(&key, "o1", Some(Duration::MAX)).await.unwrap());
    let writer = adapter.get_state(&key).await.unwrap().unwrap().writer.unwrap();
    assert_eq!(writer.expiration, Some(MAX_EXPIRATION));
    assert!(adapter.refresh_writer(&key, "o1", Duration::MAX).await.unwrap());
    assert!(adapter.release_writer(&key, "o1").await.unwrap());

    let expiring = reader(&key, "r1", 2).with_ttl(Duration::from_secs(60));
    assert!(adapter.acquire_reader(expiring).await.unwrap());
    assert!(adapter.refresh_reader(&key, "r1", Duration::MAX).await.unwrap());
    let readers = adapter.get_state(&key).await.unwrap().unwrap().reader.unwrap();
    assert_eq!(readers.acquired_slots["r1"], Some(MAX_EXPIRATION));
}

pub async fn concurrent_writers_and_readers_stay_exclusive<A: SharedLockAdapter + ?Sized>(
    adapter: &A,
) {
    for round in 0..5 {
        let key = unique_key("race");

        let attempts: Vec<BoxFuture<'_, (bool, Result<bool>)>> = (0..8)
            .map(|i| {
                let key = key.clone();
                let id = format!("{}-{}", round, i);
                let attempt: BoxFuture<'_, (bool, Result<bool>)> = if i % 2 == 0 {
                    Box::pin(async move { (true, adapter.acquire_writer(&key, &id, None).await) })
                } else {
                    Box::pin(async move {
                        (false, adapter.acquire_reader(reader(&key, &id, 3)).await)
                    })
                };
                attempt
            })
            .collect();
        let results = join_all(attempts).await;

        let writers = results
            .iter()
            .filter(|(is_writer, result)| *is_writer && matches!(result, Ok(true)))
            .count();
        let readers = results
            .iter()
            .filter(|(is_writer, result)| !*is_writer && matches!(result, Ok(true)))
            .count();
        for (_, result) in &results {
            if let Err(err) = result {
                assert!(err.is_storage(), "unexpected error: {}", err);
            }
        }

        assert!(writers <= 1);
        assert!(readers <= 3);
        assert!(writers == 0 || readers == 0, "writer and readers both acquired");
        assert_exclusive(adapter, &key).await;
    }
}

pub async fn concurrent_readers_respect_limit<A: SharedLockAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("reader_race");
    let limit = 4;

    let attempts = (0..12).map(|i| adapter.acquire_reader(reader(&key, &i.to_string(), limit)));
    let results = join_all(attempts).await;

    let acquired = results
        .iter()
        .filter(|result| matches!(result, Ok(true)))
        .count();
    assert!(acquired >= 1);
    assert!(acquired <= limit as usize);
    for result in &results {
        if let Err(err) = result {
            assert!(err.is_storage(), "unexpected error: {}", err);
        }
    }

    let held = adapter
        .get_state(&key)
        .await
        .unwrap()
        .and_then(|state| state.reader)
        .map_or(0, |readers| readers.acquired_slots.len());
    assert_eq!(held, acquired);
}
