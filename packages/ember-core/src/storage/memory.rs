//! In-memory [`Store`] with the same semantics as [`SqliteStore`](super::SqliteStore).

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use super::{EntityKind, OutboxEntry, Store, StoredRecord, UpdateFn};
use crate::error::Result;

/// A record moved aside because it could not be decoded
#[derive(Debug, Clone)]
pub struct QuarantinedRecord {
    /// The record as it was found
    pub record: StoredRecord,
    /// Why it was set aside
    pub reason: String,
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    entities: RwLock<BTreeMap<(EntityKind, String), StoredRecord>>,
    quarantine: RwLock<Vec<QuarantinedRecord>>,
    meta: RwLock<HashMap<String, String>>,
    outbox: RwLock<(i64, BTreeMap<i64, Vec<u8>>)>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a record bypassing every conflict policy
    pub fn insert_raw(&self, record: StoredRecord) {
        self.entities
            .write()
            .insert((record.kind, record.key.clone()), record);
    }

    /// Quarantined records, oldest first
    pub fn quarantined(&self) -> Vec<QuarantinedRecord> {
        self.quarantine.read().clone()
    }
}

impl Store for MemoryStore {
    fn get(&self, kind: EntityKind, key: &str) -> Result<Option<StoredRecord>> {
        Ok(self.entities.read().get(&(kind, key.to_string())).cloned())
    }

    fn scan(&self, kind: EntityKind, prefix: &str) -> Result<Vec<StoredRecord>> {
        let entities = self.entities.read();
        Ok(entities
            .range((kind, prefix.to_string())..)
            .take_while(|((k, key), _)| *k == kind && key.starts_with(prefix))
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn update(&self, kind: EntityKind, key: &str, f: &mut UpdateFn<'_>) -> Result<bool> {
        let mut entities = self.entities.write();
        let slot = (kind, key.to_string());

        let Some(next) = f(entities.get(&slot))? else {
            return Ok(false);
        };
        if next.kind != kind || next.key != key {
            return Err(crate::Error::Internal(format!(
                "Update of {}/{} produced a record for {}/{}",
                kind, key, next.kind, next.key
            )));
        }

        entities.insert(slot, next);
        Ok(true)
    }

    fn remove(&self, kind: EntityKind, key: &str) -> Result<bool> {
        Ok(self
            .entities
            .write()
            .remove(&(kind, key.to_string()))
            .is_some())
    }

    fn quarantine(&self, record: &StoredRecord, reason: &str) -> Result<()> {
        let mut entities = self.entities.write();
        let slot = (record.kind, record.key.clone());
        if entities
            .get(&slot)
            .is_some_and(|current| current.payload == record.payload)
        {
            entities.remove(&slot);
        }

        self.quarantine.write().push(QuarantinedRecord {
            record: record.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn quarantine_count(&self) -> Result<usize> {
        Ok(self.quarantine.read().len())
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.meta.read().get(key).cloned())
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.meta.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn outbox_append(&self, payload: &[u8]) -> Result<i64> {
        let mut outbox = self.outbox.write();
        outbox.0 += 1;
        let seq = outbox.0;
        outbox.1.insert(seq, payload.to_vec());
        Ok(seq)
    }

    fn outbox_entries(&self, after: i64, limit: usize) -> Result<Vec<OutboxEntry>> {
        let outbox = self.outbox.read();
        Ok(outbox
            .1
            .range(after.saturating_add(1)..)
            .take(limit)
            .map(|(seq, payload)| OutboxEntry {
                seq: *seq,
                payload: payload.clone(),
            })
            .collect())
    }

    fn outbox_remove(&self, seq: i64) -> Result<bool> {
        Ok(self.outbox.write().1.remove(&seq).is_some())
    }

    fn outbox_len(&self) -> Result<usize> {
        Ok(self.outbox.read().1.len())
    }
}
