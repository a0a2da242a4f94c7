//! Storage-level checks for the relational backend
//!
//! The adapter scenarios observe state through `get_state`; these read the
//! rows directly inside one serializable transaction, so a violation that
//! the read path would mask still fails the check.

use futures::future::join_all;

use slotlock_common::{current_timestamp, is_active};
use slotlock_persistence::entity::{reader_semaphore_slot, semaphore_slot, writer_lock};
use slotlock_persistence::sea_orm::{ColumnTrait, DbErr, EntityTrait, QueryFilter};
use slotlock_persistence::{
    ExternalDbLockService, ReaderAcquireRequest, SemaphoreAcquireRequest, SemaphoreAdapter,
    SharedLockAdapter,
};

use crate::unique_key;

/// Active writer rows and active reader slot rows stored for `key`
async fn stored_sides(service: &ExternalDbLockService, key: &str) -> (usize, usize) {
    let key = key.to_string();
    service
        .transaction::<_, _, DbErr>(move |txn| {
            Box::pin(async move {
                let now = current_timestamp();
                let writers = writer_lock::Entity::find()
                    .filter(writer_lock::Column::Key.eq(key.as_str()))
                    .all(txn)
                    .await?
                    .into_iter()
                    .filter(|writer| is_active(writer.expiration, now))
                    .count();
                let readers = reader_semaphore_slot::Entity::find()
                    .filter(reader_semaphore_slot::Column::Key.eq(key.as_str()))
                    .all(txn)
                    .await?
                    .into_iter()
                    .filter(|slot| is_active(slot.expiration, now))
                    .count();
                Ok((writers, readers))
            })
        })
        .await
        .unwrap()
}

pub async fn stored_rows_stay_exclusive(service: &ExternalDbLockService) {
    for round in 0..5 {
        let key = unique_key("rows");

        let writers = (0..4).map(|i| {
            let key = key.clone();
            async move {
                service
                    .acquire_writer(&key, &format!("w{}-{}", round, i), None)
                    .await
            }
        });
        let readers = (0..4).map(|i| {
            let request = ReaderAcquireRequest::new(key.clone(), format!("r{}-{}", round, i), 2);
            async move { service.acquire_reader(request).await }
        });
        let (_, _) = futures::join!(join_all(writers), join_all(readers));

        let (writer_rows, reader_rows) = stored_sides(service, &key).await;
        assert!(writer_rows <= 1);
        assert!(reader_rows <= 2);
        assert!(
            writer_rows == 0 || reader_rows == 0,
            "writer row and reader rows stored together for {}",
            key
        );
    }
}

pub async fn stored_slots_respect_limit(service: &ExternalDbLockService) {
    let key = unique_key("slots");
    let limit = 3;

    let attempts = (0..10).map(|i| {
        service.acquire(SemaphoreAcquireRequest::new(key.clone(), i.to_string(), limit))
    });
    join_all(attempts).await;

    let stored = {
        let key = key.clone();
        service
            .transaction::<_, _, DbErr>(move |txn| {
                Box::pin(async move {
                    let rows = semaphore_slot::Entity::find()
                        .filter(semaphore_slot::Column::Key.eq(key.as_str()))
                        .all(txn)
                        .await?;
                    Ok(rows.len())
                })
            })
            .await
            .unwrap()
    };
    assert!(stored >= 1);
    assert!(stored <= limit as usize);
}
