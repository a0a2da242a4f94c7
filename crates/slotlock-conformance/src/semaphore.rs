//! Semaphore scenarios

use std::time::Duration;

use futures::future::join_all;
use tokio::time::sleep;

use slotlock_common::{LockError, MAX_EXPIRATION, MAX_LIMIT};
use slotlock_persistence::{SemaphoreAcquireRequest, SemaphoreAdapter};

use crate::unique_key;

fn request(key: &str, slot_id: &str, limit: u32) -> SemaphoreAcquireRequest {
    SemaphoreAcquireRequest::new(key, slot_id, limit)
}

async fn active_slots<A: SemaphoreAdapter + ?Sized>(adapter: &A, key: &str) -> usize {
    adapter
        .get_state(key)
        .await
        .unwrap()
        .map_or(0, |state| state.acquired_slots.len())
}

pub async fn scenario_a_limit_is_enforced<A: SemaphoreAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("a");

    assert!(adapter.acquire(request(&key, "1", 2)).await.unwrap());
    assert!(adapter.acquire(request(&key, "2", 2)).await.unwrap());
    assert!(!adapter.acquire(request(&key, "3", 2)).await.unwrap());
    assert_eq!(active_slots(adapter, &key).await, 2);
}

pub async fn scenario_c_expired_slot_frees_capacity<A: SemaphoreAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("a");

    let expiring = request(&key, "1", 2).with_ttl(Duration::from_millis(50));
    assert!(adapter.acquire(expiring).await.unwrap());
    sleep(Duration::from_millis(60)).await;
    assert!(adapter.acquire(request(&key, "2", 2)).await.unwrap());

    let state = adapter.get_state(&key).await.unwrap().unwrap();
    assert_eq!(state.acquired_slots.len(), 1);
    assert!(state.acquired_slots.contains_key("2"));
}

pub async fn reacquire_is_idempotent_without_renewal<A: SemaphoreAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("idempotent");

    let first = request(&key, "1", 1).with_ttl(Duration::from_secs(60));
    assert!(adapter.acquire(first).await.unwrap());
    let expiration = adapter.get_state(&key).await.unwrap().unwrap().acquired_slots["1"];
    assert!(expiration.is_some());

    // Same id, different TTL: succeeds and keeps the original expiration
    assert!(adapter.acquire(request(&key, "1", 1)).await.unwrap());
    let state = adapter.get_state(&key).await.unwrap().unwrap();
    assert_eq!(state.acquired_slots.len(), 1);
    assert_eq!(state.acquired_slots["1"], expiration);
}

pub async fn release_reports_whether_removed<A: SemaphoreAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("release");

    assert!(!adapter.release(&key, "never").await.unwrap());
    assert!(adapter.get_state(&key).await.unwrap().is_none());

    assert!(adapter.acquire(request(&key, "1", 2)).await.unwrap());
    assert!(adapter.acquire(request(&key, "2", 2)).await.unwrap());
    assert!(!adapter.release(&key, "never").await.unwrap());
    assert_eq!(active_slots(adapter, &key).await, 2);

    assert!(adapter.release(&key, "1").await.unwrap());
    assert!(!adapter.release(&key, "1").await.unwrap());
    assert_eq!(active_slots(adapter, &key).await, 1);

    assert!(adapter.release(&key, "2").await.unwrap());
    assert!(adapter.get_state(&key).await.unwrap().is_none());
}

pub async fn release_expired_slot_is_noop<A: SemaphoreAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("release_expired");

    let expiring = request(&key, "1", 2).with_ttl(Duration::from_millis(50));
    assert!(adapter.acquire(expiring).await.unwrap());
    assert!(adapter.acquire(request(&key, "2", 2)).await.unwrap());
    sleep(Duration::from_millis(60)).await;

    assert!(!adapter.release(&key, "1").await.unwrap());
    let state = adapter.get_state(&key).await.unwrap().unwrap();
    assert_eq!(state.acquired_slots.len(), 1);
    assert!(state.acquired_slots.contains_key("2"));
}

pub async fn force_release_all_reports_active_slots<A: SemaphoreAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("force");

    assert!(!adapter.force_release_all(&key).await.unwrap());

    assert!(adapter.acquire(request(&key, "1", 3)).await.unwrap());
    assert!(adapter.acquire(request(&key, "2", 3)).await.unwrap());
    assert!(adapter.force_release_all(&key).await.unwrap());
    assert!(adapter.get_state(&key).await.unwrap().is_none());
    assert!(!adapter.force_release_all(&key).await.unwrap());

    // Only expired slots left counts as nothing released
    let expiring = request(&key, "3", 3).with_ttl(Duration::from_millis(50));
    assert!(adapter.acquire(expiring).await.unwrap());
    sleep(Duration::from_millis(60)).await;
    assert!(!adapter.force_release_all(&key).await.unwrap());
}

pub async fn refresh_only_extends_expiring_slots<A: SemaphoreAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("refresh");
    let ttl = Duration::from_secs(60);

    assert!(adapter.acquire(request(&key, "forever", 3)).await.unwrap());
    assert!(!adapter.refresh(&key, "forever", ttl).await.unwrap());
    assert!(!adapter.refresh(&key, "missing", ttl).await.unwrap());

    let short = request(&key, "short", 3).with_ttl(Duration::from_millis(500));
    assert!(adapter.acquire(short).await.unwrap());
    let before = adapter.get_state(&key).await.unwrap().unwrap().acquired_slots["short"];
    assert!(adapter.refresh(&key, "short", ttl).await.unwrap());
    let after = adapter.get_state(&key).await.unwrap().unwrap().acquired_slots["short"];
    assert!(after > before);

    // Unexpireable slot stays unexpireable
    let state = adapter.get_state(&key).await.unwrap().unwrap();
    assert_eq!(state.acquired_slots["forever"], None);

    let expiring = request(&key, "expired", 3).with_ttl(Duration::from_millis(50));
    assert!(adapter.acquire(expiring).await.unwrap());
    sleep(Duration::from_millis(60)).await;
    assert!(!adapter.refresh(&key, "expired", ttl).await.unwrap());
    assert!(
        !adapter
            .get_state(&key)
            .await
            .unwrap()
            .unwrap()
            .acquired_slots
            .contains_key("expired")
    );
}

pub async fn limit_is_pinned_until_drained<A: SemaphoreAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("pinned");

    assert!(adapter.acquire(request(&key, "1", 1)).await.unwrap());
    // A larger limit is ignored while the record holds slots
    assert!(!adapter.acquire(request(&key, "2", 5)).await.unwrap());
    assert_eq!(adapter.get_state(&key).await.unwrap().unwrap().limit, 1);

    assert!(adapter.release(&key, "1").await.unwrap());
    assert!(adapter.acquire(request(&key, "2", 5)).await.unwrap());
    assert!(adapter.acquire(request(&key, "3", 5)).await.unwrap());
    assert_eq!(adapter.get_state(&key).await.unwrap().unwrap().limit, 5);
}

pub async fn state_of_unknown_key_is_none<A: SemaphoreAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("unknown");
    assert!(adapter.get_state(&key).await.unwrap().is_none());
    assert!(!adapter.refresh(&key, "1", Duration::from_secs(1)).await.unwrap());
}

pub async fn invalid_requests_are_rejected<A: SemaphoreAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("invalid");

    let err = adapter.acquire(request(&key, "1", 0)).await.unwrap_err();
    assert!(matches!(err, LockError::Configuration(_)));
    let err = adapter.acquire(request("", "1", 1)).await.unwrap_err();
    assert!(matches!(err, LockError::Configuration(_)));
    let err = adapter.acquire(request(&key, "", 1)).await.unwrap_err();
    assert!(matches!(err, LockError::Configuration(_)));

    assert!(adapter.get_state(&key).await.unwrap().is_none());
}

pub async fn largest_limit_is_kept<A: SemaphoreAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("big");

    assert!(adapter.acquire(request(&key, "1", MAX_LIMIT)).await.unwrap());
    assert!(adapter.acquire(request(&key, "2", MAX_LIMIT)).await.unwrap());
    assert_eq!(adapter.get_state(&key).await.unwrap().unwrap().limit, MAX_LIMIT);

    let err = adapter.acquire(request(&key, "3", u32::MAX)).await.unwrap_err();
    assert!(matches!(err, LockError::Configuration(_)));
    assert_eq!(active_slots(adapter, &key).await, 2);
}

pub async fn huge_ttl_is_clamped<A: SemaphoreAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("huge_ttl");

    let forever = request(&key, "1", 2).with_ttl(Duration::MAX);
    assert!(adapter.acquire(forever).await.unwrap());
    let state = adapter.get_state(&key).await.unwrap().unwrap();
    assert_eq!(state.acquired_slots["1"], Some(MAX_EXPIRATION));

    let short = request(&key, "2", 2).with_ttl(Duration::from_secs(60));
    assert!(adapter.acquire(short).await.unwrap());
    assert!(adapter.refresh(&key, "2", Duration::MAX).await.unwrap());
    let state = adapter.get_state(&key).await.unwrap().unwrap();
    assert_eq!(state.acquired_slots["2"], Some(MAX_EXPIRATION));
}

pub async fn concurrent_acquires_respect_limit<A: SemaphoreAdapter + ?Sized>(adapter: &A) {
    let key = unique_key("concurrent");
    let limit = 3;

    let attempts = (0..12).map(|i| adapter.acquire(request(&key, &i.to_string(), limit)));
    let results = join_all(attempts).await;

    // Serializable backends may abort conflicting transactions; those count as losses
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
    assert_eq!(active_slots(adapter, &key).await, acquired);
}
