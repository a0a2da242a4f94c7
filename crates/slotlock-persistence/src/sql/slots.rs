//! Slot table statements shared by the semaphore and the reader side of the
//! shared lock
//!
//! Both pairs of tables (`semaphore`/`semaphore_slot` and
//! `reader_semaphore`/`reader_semaphore_slot`) have the same shape, so the
//! statements are generated once per pair. Every function expects to run
//! inside the caller's serializable transaction.

macro_rules! slot_store {
    ($(#[$meta:meta])* $name:ident, $record:ident, $slot:ident) => {
        $(#[$meta])*
        pub(crate) mod $name {
            use sea_orm::{prelude::Expr, *};

            use crate::entity::{$record, $slot};
            use crate::model::SemaphoreState;

            /// Rows that are still logically present at `now`
            fn active(now: i64) -> Condition {
                Condition::any()
                    .add($slot::Column::Expiration.is_null())
                    .add($slot::Column::Expiration.gt(now))
            }

            /// Delete expired slots of one key
            pub async fn purge_expired<C: ConnectionTrait>(
                db: &C,
                key: &str,
                now: i64,
            ) -> Result<u64, DbErr> {
                let result = $slot::Entity::delete_many()
                    .filter($slot::Column::Key.eq(key))
                    .filter($slot::Column::Expiration.lte(now))
                    .exec(db)
                    .await?;
                Ok(result.rows_affected)
            }

            pub async fn active_slots<C: ConnectionTrait>(
                db: &C,
                key: &str,
                now: i64,
            ) -> Result<Vec<$slot::Model>, DbErr> {
                $slot::Entity::find()
                    .filter($slot::Column::Key.eq(key))
                    .filter(active(now))
                    .all(db)
                    .await
            }

            pub async fn has_active<C: ConnectionTrait>(
                db: &C,
                key: &str,
                now: i64,
            ) -> Result<bool, DbErr> {
                let count = $slot::Entity::find()
                    .filter($slot::Column::Key.eq(key))
                    .filter(active(now))
                    .count(db)
                    .await?;
                Ok(count > 0)
            }

            /// Delete the record row once no slot rows remain
            pub async fn drop_if_drained<C: ConnectionTrait>(
                db: &C,
                key: &str,
            ) -> Result<(), DbErr> {
                let remaining = $slot::Entity::find()
                    .filter($slot::Column::Key.eq(key))
                    .count(db)
                    .await?;
                if remaining == 0 {
                    $record::Entity::delete_by_id(key.to_string())
                        .exec(db)
                        .await?;
                }
                Ok(())
            }

            /// Acquire `slot_id`; the stored limit wins while any slot is active
            pub async fn acquire<C: ConnectionTrait>(
                db: &C,
                key: &str,
                slot_id: &str,
                limit: u32,
                expiration: Option<i64>,
                now: i64,
            ) -> Result<bool, DbErr> {
                let stored_limit = i32::try_from(limit)
                    .map_err(|_| DbErr::Custom(format!("limit {} does not fit the limit column", limit)))?;
                purge_expired(db, key, now).await?;
                let slots = active_slots(db, key, now).await?;
                if slots.iter().any(|slot| slot.id == slot_id) {
                    return Ok(true);
                }

                let record = $record::Entity::find_by_id(key.to_string())
                    .one(db)
                    .await?;
                let effective_limit = match record {
                    Some(record) if !slots.is_empty() => usize::try_from(record.limit).unwrap_or(0),
                    Some(_) => {
                        $record::Entity::update_many()
                            .col_expr($record::Column::Limit, Expr::value(stored_limit))
                            .filter($record::Column::Key.eq(key))
                            .exec(db)
                            .await?;
                        limit as usize
                    }
                    None => {
                        let record = $record::ActiveModel {
                            key: Set(key.to_string()),
                            limit: Set(stored_limit),
                        };
                        $record::Entity::insert(record)
                            .exec_without_returning(db)
                            .await?;
                        limit as usize
                    }
                };

                if slots.len() >= effective_limit {
                    return Ok(false);
                }

                let slot = $slot::ActiveModel {
                    key: Set(key.to_string()),
                    id: Set(slot_id.to_string()),
                    expiration: Set(expiration),
                };
                $slot::Entity::insert(slot).exec_without_returning(db).await?;
                Ok(true)
            }

            pub async fn release<C: ConnectionTrait>(
                db: &C,
                key: &str,
                slot_id: &str,
                now: i64,
            ) -> Result<bool, DbErr> {
                purge_expired(db, key, now).await?;
                let result = $slot::Entity::delete_many()
                    .filter($slot::Column::Key.eq(key))
                    .filter($slot::Column::Id.eq(slot_id))
                    .exec(db)
                    .await?;
                drop_if_drained(db, key).await?;
                Ok(result.rows_affected > 0)
            }

            /// Move an expiring, unexpired slot to `expiration`
            pub async fn refresh<C: ConnectionTrait>(
                db: &C,
                key: &str,
                slot_id: &str,
                expiration: i64,
                now: i64,
            ) -> Result<bool, DbErr> {
                let result = $slot::Entity::update_many()
                    .col_expr($slot::Column::Expiration, Expr::value(expiration))
                    .filter($slot::Column::Key.eq(key))
                    .filter($slot::Column::Id.eq(slot_id))
                    .filter($slot::Column::Expiration.is_not_null())
                    .filter($slot::Column::Expiration.gt(now))
                    .exec(db)
                    .await?;
                Ok(result.rows_affected > 0)
            }

            /// Delete the record and all its slots, returning whether any was active
            pub async fn clear<C: ConnectionTrait>(
                db: &C,
                key: &str,
                now: i64,
            ) -> Result<bool, DbErr> {
                let had_active = has_active(db, key, now).await?;
                $slot::Entity::delete_many()
                    .filter($slot::Column::Key.eq(key))
                    .exec(db)
                    .await?;
                $record::Entity::delete_by_id(key.to_string())
                    .exec(db)
                    .await?;
                Ok(had_active)
            }

            pub async fn state<C: ConnectionTrait>(
                db: &C,
                key: &str,
                now: i64,
            ) -> Result<Option<SemaphoreState>, DbErr> {
                let slots = active_slots(db, key, now).await?;
                if slots.is_empty() {
                    return Ok(None);
                }
                let limit = $record::Entity::find_by_id(key.to_string())
                    .one(db)
                    .await?
                    .map_or(0, |record| u32::try_from(record.limit).unwrap_or(0));
                Ok(Some(SemaphoreState {
                    limit,
                    acquired_slots: slots
                        .into_iter()
                        .map(|slot| (slot.id, slot.expiration))
                        .collect(),
                }))
            }

            /// Delete expired slots of every key, then records left without slots
            pub async fn purge_all_expired<C: ConnectionTrait>(
                db: &C,
                now: i64,
            ) -> Result<u64, DbErr> {
                let slots = $slot::Entity::delete_many()
                    .filter($slot::Column::Expiration.lte(now))
                    .exec(db)
                    .await?;
                let occupied = $slot::Entity::find()
                    .select_only()
                    .column($slot::Column::Key)
                    .into_query();
                let records = $record::Entity::delete_many()
                    .filter($record::Column::Key.not_in_subquery(occupied))
                    .exec(db)
                    .await?;
                Ok(slots.rows_affected + records.rows_affected)
            }
        }
    };
}

slot_store!(
    /// Statements over `semaphore` / `semaphore_slot`
    semaphore_slots,
    semaphore,
    semaphore_slot
);

slot_store!(
    /// Statements over `reader_semaphore` / `reader_semaphore_slot`
    reader_slots,
    reader_semaphore,
    reader_semaphore_slot
);
