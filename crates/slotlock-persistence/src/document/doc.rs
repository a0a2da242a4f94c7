//! Stored document shapes, as written by the lock scripts

use serde::{Deserialize, Serialize};

use slotlock_common::{LockError, Result, is_active};

use crate::model::{SemaphoreState, SharedLockState, WriterLockState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotDoc {
    pub id: String,
    #[serde(default)]
    pub expiration: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemaphoreDoc {
    pub key: String,
    #[serde(default)]
    pub expiration: Option<i64>,
    pub limit: u32,
    #[serde(default)]
    pub slots: Vec<SlotDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterDoc {
    pub owner: String,
    #[serde(default)]
    pub expiration: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderDoc {
    pub limit: u32,
    #[serde(default)]
    pub slots: Vec<SlotDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedLockDoc {
    pub key: String,
    #[serde(default)]
    pub expiration: Option<i64>,
    #[serde(default)]
    pub writer: Option<WriterDoc>,
    #[serde(default)]
    pub reader: Option<ReaderDoc>,
}

fn active_state(limit: u32, slots: Vec<SlotDoc>, now: i64) -> Option<SemaphoreState> {
    let acquired_slots: std::collections::HashMap<String, Option<i64>> = slots
        .into_iter()
        .filter(|slot| is_active(slot.expiration, now))
        .map(|slot| (slot.id, slot.expiration))
        .collect();
    if acquired_slots.is_empty() {
        return None;
    }
    Some(SemaphoreState {
        limit,
        acquired_slots,
    })
}

impl SemaphoreDoc {
    pub fn into_state(self, now: i64) -> Option<SemaphoreState> {
        active_state(self.limit, self.slots, now)
    }
}

impl SharedLockDoc {
    /// Active view of the document, failing when both sides are active
    pub fn into_state(self, key: &str, now: i64) -> Result<Option<SharedLockState>> {
        let writer = self
            .writer
            .filter(|writer| is_active(writer.expiration, now))
            .map(|writer| WriterLockState {
                owner: writer.owner,
                expiration: writer.expiration,
            });
        let reader = self
            .reader
            .and_then(|reader| active_state(reader.limit, reader.slots, now));

        match (writer, reader) {
            (Some(_), Some(_)) => {
                tracing::warn!(key, "shared lock holds an active writer and active readers");
                Err(LockError::both_sides_active(key))
            }
            (None, None) => Ok(None),
            (writer, reader) => Ok(Some(SharedLockState { writer, reader })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_semaphore_doc_filters_expired_slots() {
        let raw = r#"{"key":"jobs","expiration":1700000000500,"limit":2,
            "slots":[{"id":"a","expiration":1700000000500},{"id":"b","expiration":1699999999000}]}"#;
        let doc: SemaphoreDoc = serde_json::from_str(raw).unwrap();

        let state = doc.clone().into_state(NOW).unwrap();
        assert_eq!(state.limit, 2);
        assert_eq!(state.acquired_slots.len(), 1);
        assert_eq!(state.acquired_slots.get("a"), Some(&Some(1_700_000_000_500)));

        assert!(doc.into_state(NOW + 500).is_none());
    }

    #[test]
    fn test_missing_expiration_never_expires() {
        // Scripts omit the field for entries without a TTL
        let raw = r#"{"key":"jobs","expiration":null,"limit":1,"slots":[{"id":"a"}]}"#;
        let doc: SemaphoreDoc = serde_json::from_str(raw).unwrap();
        let state = doc.into_state(i64::MAX - 1).unwrap();
        assert_eq!(state.acquired_slots.get("a"), Some(&None));
    }

    #[test]
    fn test_latest_expiration_reads_back_as_integer() {
        // The script encoder prints 14 significant digits, which the clamp fits
        let raw = format!(
            r#"{{"key":"jobs","expiration":{0},"limit":1,"slots":[{{"id":"a","expiration":{0}}}]}}"#,
            slotlock_common::MAX_EXPIRATION
        );
        let doc: SemaphoreDoc = serde_json::from_str(&raw).unwrap();
        let state = doc.into_state(NOW).unwrap();
        assert_eq!(
            state.acquired_slots.get("a"),
            Some(&Some(slotlock_common::MAX_EXPIRATION))
        );
    }

    #[test]
    fn test_shared_doc_with_null_sides() {
        let raw = r#"{"key":"doc","expiration":null,"writer":{"owner":"o1","expiration":null},"reader":null}"#;
        let doc: SharedLockDoc = serde_json::from_str(raw).unwrap();
        let state = doc.into_state("doc", NOW).unwrap().unwrap();
        assert_eq!(state.writer.unwrap().owner, "o1");
        assert!(state.reader.is_none());
    }

    #[test]
    fn test_shared_doc_expired_writer_is_absent() {
        let raw = r#"{"key":"doc","expiration":1699999999000,
            "writer":{"owner":"o1","expiration":1699999999000},"reader":null}"#;
        let doc: SharedLockDoc = serde_json::from_str(raw).unwrap();
        assert!(doc.into_state("doc", NOW).unwrap().is_none());
    }

    #[test]
    fn test_shared_doc_with_both_sides_is_invariant_violation() {
        let raw = r#"{"key":"doc","expiration":null,
            "writer":{"owner":"o1"},
            "reader":{"limit":2,"slots":[{"id":"r1"}]}}"#;
        let doc: SharedLockDoc = serde_json::from_str(raw).unwrap();
        let err = doc.into_state("doc", NOW).unwrap_err();
        assert!(err.is_invariant_violation());
    }
}
