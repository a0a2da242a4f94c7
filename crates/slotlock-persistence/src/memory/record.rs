//! In-memory record types and their state transitions
//!
//! Every method takes `now` explicitly and filters expired entries itself, so
//! correctness never depends on the background sweep having run.

use std::collections::HashMap;

use slotlock_common::{LockError, Result, is_active};

use crate::model::{SemaphoreState, SharedLockState, WriterLockState};

/// Semaphore record: a pinned limit plus the acquired slots
#[derive(Debug, Clone, Default)]
pub struct SemaphoreRecord {
    pub limit: u32,
    pub slots: HashMap<String, Option<i64>>,
}

impl SemaphoreRecord {
    /// Drop slots whose expiration has passed
    pub fn purge_expired(&mut self, now: i64) {
        self.slots.retain(|_, expiration| is_active(*expiration, now));
    }

    pub fn active_count(&self, now: i64) -> usize {
        self.slots
            .values()
            .filter(|expiration| is_active(**expiration, now))
            .count()
    }

    pub fn is_empty(&self, now: i64) -> bool {
        self.active_count(now) == 0
    }

    pub fn holds(&self, slot_id: &str, now: i64) -> bool {
        self.slots
            .get(slot_id)
            .is_some_and(|expiration| is_active(*expiration, now))
    }

    /// Acquire `slot_id`; the stored limit wins unless the record has drained
    pub fn acquire(&mut self, slot_id: &str, limit: u32, expiration: Option<i64>, now: i64) -> bool {
        self.purge_expired(now);
        if self.slots.is_empty() {
            self.limit = limit;
        }
        if self.slots.contains_key(slot_id) {
            return true;
        }
        if self.slots.len() < self.limit as usize {
            self.slots.insert(slot_id.to_string(), expiration);
            return true;
        }
        false
    }

    pub fn release(&mut self, slot_id: &str, now: i64) -> bool {
        let released = self.holds(slot_id, now);
        self.purge_expired(now);
        if released {
            self.slots.remove(slot_id);
        }
        released
    }

    /// Move an expiring, unexpired slot to `expiration`
    pub fn refresh(&mut self, slot_id: &str, expiration: i64, now: i64) -> bool {
        match self.slots.get_mut(slot_id) {
            Some(current) if current.is_some() && is_active(*current, now) => {
                *current = Some(expiration);
                true
            }
            _ => false,
        }
    }

    /// Remove every slot, returning whether any was active
    pub fn clear(&mut self, now: i64) -> bool {
        let had_active = !self.is_empty(now);
        self.slots.clear();
        had_active
    }

    pub fn state(&self, now: i64) -> Option<SemaphoreState> {
        let acquired_slots: HashMap<String, Option<i64>> = self
            .slots
            .iter()
            .filter(|(_, expiration)| is_active(**expiration, now))
            .map(|(id, expiration)| (id.clone(), *expiration))
            .collect();
        if acquired_slots.is_empty() {
            return None;
        }
        Some(SemaphoreState {
            limit: self.limit,
            acquired_slots,
        })
    }
}

/// Writer side of a shared lock
#[derive(Debug, Clone)]
pub struct WriterRecord {
    pub owner: String,
    pub expiration: Option<i64>,
}

impl WriterRecord {
    pub fn is_active(&self, now: i64) -> bool {
        is_active(self.expiration, now)
    }
}

/// Shared lock record: writer XOR readers
#[derive(Debug, Clone, Default)]
pub struct SharedLockRecord {
    pub writer: Option<WriterRecord>,
    pub reader: Option<SemaphoreRecord>,
}

impl SharedLockRecord {
    fn writer_active(&self, now: i64) -> bool {
        self.writer.as_ref().is_some_and(|w| w.is_active(now))
    }

    fn readers_active(&self, now: i64) -> bool {
        self.reader.as_ref().is_some_and(|r| !r.is_empty(now))
    }

    /// Fail when both sides are observed active
    pub fn check_exclusive(&self, key: &str, now: i64) -> Result<()> {
        if self.writer_active(now) && self.readers_active(now) {
            tracing::warn!(key, "shared lock holds an active writer and active readers");
            return Err(LockError::both_sides_active(key));
        }
        Ok(())
    }

    /// Drop expired entries and empty sides
    pub fn normalize(&mut self, now: i64) {
        if !self.writer_active(now) {
            self.writer = None;
        }
        if let Some(reader) = self.reader.as_mut() {
            reader.purge_expired(now);
            if reader.slots.is_empty() {
                self.reader = None;
            }
        }
    }

    pub fn is_empty(&self, now: i64) -> bool {
        !self.writer_active(now) && !self.readers_active(now)
    }

    pub fn acquire_writer(
        &mut self,
        key: &str,
        lock_id: &str,
        expiration: Option<i64>,
        now: i64,
    ) -> Result<bool> {
        self.check_exclusive(key, now)?;
        self.normalize(now);
        if self.reader.is_some() {
            return Ok(false);
        }
        match &self.writer {
            Some(writer) if writer.owner != lock_id => Ok(false),
            Some(_) => Ok(true),
            None => {
                self.writer = Some(WriterRecord {
                    owner: lock_id.to_string(),
                    expiration,
                });
                Ok(true)
            }
        }
    }

    pub fn release_writer(&mut self, key: &str, lock_id: &str, now: i64) -> Result<bool> {
        self.check_exclusive(key, now)?;
        self.normalize(now);
        match &self.writer {
            Some(writer) if writer.owner == lock_id => {
                self.writer = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn force_release_writer(&mut self, key: &str, now: i64) -> Result<bool> {
        self.check_exclusive(key, now)?;
        self.normalize(now);
        Ok(self.writer.take().is_some())
    }

    pub fn refresh_writer(
        &mut self,
        key: &str,
        lock_id: &str,
        expiration: i64,
        now: i64,
    ) -> Result<bool> {
        self.check_exclusive(key, now)?;
        self.normalize(now);
        match self.writer.as_mut() {
            Some(writer) if writer.owner == lock_id && writer.expiration.is_some() => {
                writer.expiration = Some(expiration);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn acquire_reader(
        &mut self,
        key: &str,
        lock_id: &str,
        limit: u32,
        expiration: Option<i64>,
        now: i64,
    ) -> Result<bool> {
        self.check_exclusive(key, now)?;
        self.normalize(now);
        if self.writer.is_some() {
            return Ok(false);
        }
        let acquired = self
            .reader
            .get_or_insert_with(SemaphoreRecord::default)
            .acquire(lock_id, limit, expiration, now);
        self.normalize(now);
        Ok(acquired)
    }

    pub fn release_reader(&mut self, key: &str, lock_id: &str, now: i64) -> Result<bool> {
        self.check_exclusive(key, now)?;
        let released = self
            .reader
            .as_mut()
            .is_some_and(|reader| reader.release(lock_id, now));
        self.normalize(now);
        Ok(released)
    }

    pub fn force_release_all_readers(&mut self, key: &str, now: i64) -> Result<bool> {
        self.check_exclusive(key, now)?;
        let cleared = self.reader.take().is_some_and(|mut reader| reader.clear(now));
        self.normalize(now);
        Ok(cleared)
    }

    pub fn refresh_reader(
        &mut self,
        key: &str,
        lock_id: &str,
        expiration: i64,
        now: i64,
    ) -> Result<bool> {
        self.check_exclusive(key, now)?;
        let refreshed = self
            .reader
            .as_mut()
            .is_some_and(|reader| reader.refresh(lock_id, expiration, now));
        self.normalize(now);
        Ok(refreshed)
    }

    pub fn force_release(&mut self, key: &str, now: i64) -> Result<bool> {
        self.check_exclusive(key, now)?;
        let had_active = !self.is_empty(now);
        self.writer = None;
        self.reader = None;
        Ok(had_active)
    }

    pub fn state(&self, key: &str, now: i64) -> Result<Option<SharedLockState>> {
        self.check_exclusive(key, now)?;
        let writer = self
            .writer
            .as_ref()
            .filter(|w| w.is_active(now))
            .map(|w| WriterLockState {
                owner: w.owner.clone(),
                expiration: w.expiration,
            });
        let reader = self.reader.as_ref().and_then(|r| r.state(now));
        if writer.is_none() && reader.is_none() {
            return Ok(None);
        }
        Ok(Some(SharedLockState { writer, reader }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_000_000;

    #[test]
    fn test_semaphore_limit_pinned_until_drained() {
        let mut record = SemaphoreRecord::default();
        assert!(record.acquire("1", 1, None, NOW));
        // A larger limit is ignored while slots are held
        assert!(!record.acquire("2", 5, None, NOW));
        assert_eq!(record.limit, 1);

        assert!(record.release("1", NOW));
        assert!(record.acquire("2", 5, None, NOW));
        assert_eq!(record.limit, 5);
    }

    #[test]
    fn test_semaphore_reacquire_keeps_expiration() {
        let mut record = SemaphoreRecord::default();
        assert!(record.acquire("1", 2, Some(NOW + 100), NOW));
        assert!(record.acquire("1", 2, Some(NOW + 500), NOW + 10));
        assert_eq!(record.slots.get("1"), Some(&Some(NOW + 100)));
    }

    #[test]
    fn test_semaphore_refresh_rules() {
        let mut record = SemaphoreRecord::default();
        record.acquire("forever", 3, None, NOW);
        record.acquire("short", 3, Some(NOW + 10), NOW);

        assert!(!record.refresh("forever", NOW + 1_000, NOW));
        assert!(!record.refresh("missing", NOW + 1_000, NOW));
        assert!(!record.refresh("short", NOW + 1_000, NOW + 10));
        assert!(record.refresh("short", NOW + 1_000, NOW + 5));
        assert_eq!(record.slots.get("short"), Some(&Some(NOW + 1_000)));
    }

    #[test]
    fn test_semaphore_release_expired_is_noop() {
        let mut record = SemaphoreRecord::default();
        record.acquire("1", 1, Some(NOW + 10), NOW);
        assert!(!record.release("1", NOW + 10));
        assert!(record.state(NOW + 10).is_none());
    }

    #[test]
    fn test_shared_lock_writer_blocks_readers() {
        let mut record = SharedLockRecord::default();
        assert!(record.acquire_writer("k", "o1", None, NOW).unwrap());
        assert!(!record.acquire_reader("k", "r1", 2, None, NOW).unwrap());
        assert!(record.release_writer("k", "o1", NOW).unwrap());
        assert!(record.acquire_reader("k", "r1", 2, None, NOW).unwrap());
        assert!(!record.acquire_writer("k", "o1", None, NOW).unwrap());
    }

    #[test]
    fn test_shared_lock_expired_writer_is_replaced() {
        let mut record = SharedLockRecord::default();
        assert!(record.acquire_writer("k", "o1", Some(NOW + 10), NOW).unwrap());
        assert!(!record.acquire_writer("k", "o2", None, NOW + 5).unwrap());
        assert!(record.acquire_writer("k", "o2", None, NOW + 10).unwrap());
        assert_eq!(record.writer.as_ref().unwrap().owner, "o2");
    }

    #[test]
    fn test_shared_lock_both_sides_is_invariant_violation() {
        let mut record = SharedLockRecord::default();
        record.writer = Some(WriterRecord {
            owner: "o1".to_string(),
            expiration: None,
        });
        let mut reader = SemaphoreRecord::default();
        reader.acquire("r1", 1, None, NOW);
        record.reader = Some(reader);

        let err = record.state("k", NOW).unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(record.acquire_writer("k", "o1", None, NOW).is_err());
        // Nothing was repaired
        assert!(record.writer.is_some());
        assert!(record.reader.is_some());
    }
}
