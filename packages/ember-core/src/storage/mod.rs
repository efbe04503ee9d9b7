//! # Storage Module
//!
//! Local-first persistence for every entity the engine owns.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Typed layer (StoreExt)                                         │   │
//! │  │  ──────────────────────                                         │   │
//! │  │  load / load_all / save / purge for any `Entity`                │   │
//! │  │  • save = read, resolve conflict, write (one atomic update)     │   │
//! │  │  • corrupt payloads are quarantined and skipped                 │   │
//! │  └───────────────────────────────┬─────────────────────────────────┘   │
//! │                                  │                                     │
//! │                                  ▼                                     │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Store trait (raw records keyed by kind + key)                  │   │
//! │  │  ─────────────────────────────────────────────                  │   │
//! │  │  SqliteStore:  durable, shared between processes (WAL)          │   │
//! │  │  MemoryStore:  in-process, for tests                            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Conflict Policies
//!
//! | Entity      | Policy                                               |
//! |-------------|------------------------------------------------------|
//! | Profile     | last-write-wins, tombstones beat live versions       |
//! | LikeAction  | last-write-wins                                      |
//! | MutualMatch | append-only, first write kept                        |
//! | MatchFlag   | last-write-wins                                      |
//! | ChatMessage | union by id, delivery flags only ever turn on        |

pub mod database;
pub mod memory;
pub mod schema;

pub use database::SqliteStore;
pub use memory::MemoryStore;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// The kinds of entity kept in the store
///
/// Declaration order is the order in which a sync batch is applied, so
/// anything an entity refers to is already present when it lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    /// Discovery profile
    Profile,
    /// Like / pass / super-like
    Action,
    /// Mutual match between two profiles
    Match,
    /// Unmatch / block state of a match
    MatchFlag,
    /// Chat message inside a match
    Message,
}

impl EntityKind {
    /// Every kind, in apply order
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Profile,
        EntityKind::Action,
        EntityKind::Match,
        EntityKind::MatchFlag,
        EntityKind::Message,
    ];

    /// Convert to storage string
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Profile => "profile",
            EntityKind::Action => "action",
            EntityKind::Match => "match",
            EntityKind::MatchFlag => "match_flag",
            EntityKind::Message => "message",
        }
    }

    /// Parse from storage string
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "profile" => Ok(EntityKind::Profile),
            "action" => Ok(EntityKind::Action),
            "match" => Ok(EntityKind::Match),
            "match_flag" => Ok(EntityKind::MatchFlag),
            "message" => Ok(EntityKind::Message),
            other => Err(Error::StorageCorrupted(format!(
                "Unknown entity kind: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Entity kind
    pub kind: EntityKind,
    /// Entity key, unique within its kind
    pub key: String,
    /// Logical modification time (ms)
    pub updated_at: i64,
    /// JSON payload
    pub payload: Vec<u8>,
}

/// A write waiting to be replicated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    /// Position in the outbox, increasing in append order
    pub seq: i64,
    /// Encoded envelope
    pub payload: Vec<u8>,
}

/// Read-modify-write callback passed to [`Store::update`]
///
/// Receives the current record (if any) and returns the record to write,
/// or `None` to leave the store untouched.
pub type UpdateFn<'a> = dyn FnMut(Option<&StoredRecord>) -> Result<Option<StoredRecord>> + 'a;

/// Raw key-value persistence
///
/// Implementations must make [`Store::update`] atomic with respect to every
/// other write to the same `(kind, key)`, including writes made by other
/// processes sharing the same backing file.
pub trait Store: Send + Sync {
    /// Get one record
    fn get(&self, kind: EntityKind, key: &str) -> Result<Option<StoredRecord>>;

    /// All records of a kind whose key starts with `prefix`, ordered by key
    fn scan(&self, kind: EntityKind, prefix: &str) -> Result<Vec<StoredRecord>>;

    /// Atomic read-modify-write of one record
    ///
    /// Returns `true` if a record was written.
    fn update(&self, kind: EntityKind, key: &str, f: &mut UpdateFn<'_>) -> Result<bool>;

    /// Delete one record, returns `true` if it existed
    fn remove(&self, kind: EntityKind, key: &str) -> Result<bool>;

    /// Move an unreadable record aside
    ///
    /// The live record is only removed if its payload still matches the
    /// one given, so a concurrent rewrite is never lost.
    fn quarantine(&self, record: &StoredRecord, reason: &str) -> Result<()>;

    /// Number of quarantined records
    fn quarantine_count(&self) -> Result<usize>;

    /// Read an engine metadata value
    fn get_meta(&self, key: &str) -> Result<Option<String>>;

    /// Write an engine metadata value
    fn set_meta(&self, key: &str, value: &str) -> Result<()>;

    /// Append to the replication outbox, returns the new entry's sequence
    fn outbox_append(&self, payload: &[u8]) -> Result<i64>;

    /// Up to `limit` outbox entries with `seq > after`, oldest first
    fn outbox_entries(&self, after: i64, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Remove one outbox entry, returns `true` if it existed
    fn outbox_remove(&self, seq: i64) -> Result<bool>;

    /// Number of outbox entries
    fn outbox_len(&self) -> Result<usize>;
}

/// A typed entity kept in a [`Store`]
pub trait Entity: Serialize + DeserializeOwned + Clone + Sized {
    /// Kind this entity is stored under
    const KIND: EntityKind;

    /// Store key
    fn key(&self) -> String;

    /// Logical modification time (ms)
    fn updated_at(&self) -> i64;

    /// Conflict policy
    ///
    /// Returns the value that should replace `existing`, or `None` if
    /// `existing` should stay as it is. Must be deterministic so every
    /// replica converges on the same value whatever the arrival order.
    fn resolve(existing: &Self, incoming: Self) -> Option<Self>;

    /// Encode into a raw record
    fn to_record(&self) -> Result<StoredRecord> {
        Ok(StoredRecord {
            kind: Self::KIND,
            key: self.key(),
            updated_at: self.updated_at(),
            payload: serde_json::to_vec(self)?,
        })
    }

    /// Decode from a raw record
    fn from_record(record: &StoredRecord) -> Result<Self> {
        if record.kind != Self::KIND {
            return Err(Error::StorageCorrupted(format!(
                "Expected {} record, found {}",
                Self::KIND,
                record.kind
            )));
        }
        serde_json::from_slice(&record.payload).map_err(|e| {
            Error::StorageCorrupted(format!(
                "Unreadable {} record {}: {}",
                record.kind, record.key, e
            ))
        })
    }
}

/// Result of [`StoreExt::save`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome<E> {
    /// No previous value existed
    Inserted(E),
    /// A previous value was replaced by this (possibly merged) value
    Replaced(E),
    /// The stored value already covered the incoming one
    Unchanged,
}

impl<E> WriteOutcome<E> {
    /// Whether anything was written
    pub fn is_written(&self) -> bool {
        !matches!(self, WriteOutcome::Unchanged)
    }

    /// Whether this was a first write
    pub fn is_inserted(&self) -> bool {
        matches!(self, WriteOutcome::Inserted(_))
    }

    /// The value now stored, if it changed
    pub fn into_written(self) -> Option<E> {
        match self {
            WriteOutcome::Inserted(e) | WriteOutcome::Replaced(e) => Some(e),
            WriteOutcome::Unchanged => None,
        }
    }
}

/// Last-write-wins on `updated_at`
///
/// Equal timestamps fall back to comparing the JSON encodings, so two
/// replicas that saw the same pair of writes in opposite orders still pick
/// the same winner.
pub fn last_write_wins<E: Entity>(existing: &E, incoming: E) -> Option<E> {
    match incoming.updated_at().cmp(&existing.updated_at()) {
        std::cmp::Ordering::Greater => Some(incoming),
        std::cmp::Ordering::Less => None,
        std::cmp::Ordering::Equal => {
            let existing_bytes = serde_json::to_vec(existing).unwrap_or_default();
            let incoming_bytes = serde_json::to_vec(&incoming).unwrap_or_default();
            if incoming_bytes > existing_bytes {
                Some(incoming)
            } else {
                None
            }
        }
    }
}

/// Typed access on top of any [`Store`]
pub trait StoreExt: Store {
    /// Load one entity
    ///
    /// A record that cannot be decoded is quarantined and reported as absent.
    fn load<E: Entity>(&self, key: &str) -> Result<Option<E>> {
        let Some(record) = self.get(E::KIND, key)? else {
            return Ok(None);
        };
        match E::from_record(&record) {
            Ok(entity) => Ok(Some(entity)),
            Err(e) => {
                self.set_aside(&record, &e);
                Ok(None)
            }
        }
    }

    /// Load every entity of a kind whose key starts with `prefix`
    fn load_all<E: Entity>(&self, prefix: &str) -> Result<Vec<E>> {
        let records = self.scan(E::KIND, prefix)?;
        let mut entities = Vec::with_capacity(records.len());
        for record in records {
            match E::from_record(&record) {
                Ok(entity) => entities.push(entity),
                Err(e) => self.set_aside(&record, &e),
            }
        }
        Ok(entities)
    }

    /// Write an entity through its conflict policy
    fn save<E: Entity>(&self, entity: &E) -> Result<WriteOutcome<E>> {
        let key = entity.key();
        let mut outcome = WriteOutcome::Unchanged;
        let mut corrupt: Option<StoredRecord> = None;

        self.update(E::KIND, &key, &mut |existing| {
            let Some(record) = existing else {
                outcome = WriteOutcome::Inserted(entity.clone());
                return entity.to_record().map(Some);
            };

            let current = match E::from_record(record) {
                Ok(current) => current,
                Err(_) => {
                    // Unreadable: keep a copy aside and take the incoming value
                    corrupt = Some(record.clone());
                    outcome = WriteOutcome::Replaced(entity.clone());
                    return entity.to_record().map(Some);
                }
            };

            match E::resolve(&current, entity.clone()) {
                Some(winner) => {
                    let next = winner.to_record()?;
                    if next.payload == record.payload && next.updated_at == record.updated_at {
                        return Ok(None);
                    }
                    outcome = WriteOutcome::Replaced(winner);
                    Ok(Some(next))
                }
                None => Ok(None),
            }
        })?;

        if let Some(record) = corrupt {
            tracing::warn!(kind = %record.kind, key = %record.key, "Overwrote unreadable record");
            self.quarantine(&record, "overwritten while unreadable")?;
        }

        Ok(outcome)
    }

    /// Delete one entity, returns `true` if it existed
    fn purge<E: Entity>(&self, key: &str) -> Result<bool> {
        self.remove(E::KIND, key)
    }

    #[doc(hidden)]
    fn set_aside(&self, record: &StoredRecord, error: &Error) {
        tracing::warn!(
            kind = %record.kind,
            key = %record.key,
            "Quarantining unreadable record: {}",
            error
        );
        if let Err(e) = self.quarantine(record, &error.to_string()) {
            tracing::error!("Failed to quarantine record {}: {}", record.key, e);
        }
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
        at: i64,
    }

    impl Entity for Note {
        const KIND: EntityKind = EntityKind::Profile;

        fn key(&self) -> String {
            self.id.clone()
        }

        fn updated_at(&self) -> i64 {
            self.at
        }

        fn resolve(existing: &Self, incoming: Self) -> Option<Self> {
            last_write_wins(existing, incoming)
        }
    }

    fn note(body: &str, at: i64) -> Note {
        Note {
            id: "n1".into(),
            body: body.into(),
            at,
        }
    }

    #[test]
    fn test_entity_kind_strings() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(EntityKind::parse("friend").is_err());
    }

    #[test]
    fn test_apply_order() {
        let mut sorted = EntityKind::ALL;
        sorted.sort();
        assert_eq!(sorted, EntityKind::ALL);
        assert_eq!(EntityKind::ALL[0], EntityKind::Profile);
    }

    #[test]
    fn test_last_write_wins_by_timestamp() {
        assert_eq!(last_write_wins(&note("a", 1), note("b", 2)), Some(note("b", 2)));
        assert_eq!(last_write_wins(&note("b", 2), note("a", 1)), None);
    }

    #[test]
    fn test_last_write_wins_tie_is_order_independent() {
        let x = note("apple", 5);
        let y = note("banana", 5);

        let winner_xy = last_write_wins(&x, y.clone()).unwrap_or_else(|| x.clone());
        let winner_yx = last_write_wins(&y, x.clone()).unwrap_or_else(|| y.clone());
        assert_eq!(winner_xy, winner_yx);

        assert_eq!(last_write_wins(&x, x.clone()), None);
    }

    #[test]
    fn test_save_outcomes() {
        let store = MemoryStore::new();

        assert!(store.save(&note("a", 1)).unwrap().is_inserted());
        assert_eq!(
            store.save(&note("b", 2)).unwrap(),
            WriteOutcome::Replaced(note("b", 2))
        );
        assert_eq!(store.save(&note("c", 1)).unwrap(), WriteOutcome::Unchanged);
        assert_eq!(store.save(&note("b", 2)).unwrap(), WriteOutcome::Unchanged);

        let stored: Note = store.load("n1").unwrap().unwrap();
        assert_eq!(stored.body, "b");
    }

    #[test]
    fn test_corrupt_record_is_quarantined_on_load() {
        let store = MemoryStore::new();
        store.insert_raw(StoredRecord {
            kind: EntityKind::Profile,
            key: "n1".into(),
            updated_at: 1,
            payload: b"{not json".to_vec(),
        });
        store.save(&Note { id: "n2".into(), body: "ok".into(), at: 1 }).unwrap();

        assert_eq!(store.load::<Note>("n1").unwrap(), None);
        assert_eq!(store.quarantine_count().unwrap(), 1);

        // Other records are unaffected
        let all: Vec<Note> = store.load_all("").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "n2");
    }

    #[test]
    fn test_save_over_corrupt_record() {
        let store = MemoryStore::new();
        store.insert_raw(StoredRecord {
            kind: EntityKind::Profile,
            key: "n1".into(),
            updated_at: 99,
            payload: vec![0xff, 0x00],
        });

        let outcome = store.save(&note("fresh", 1)).unwrap();
        assert!(outcome.is_written());
        assert_eq!(store.quarantine_count().unwrap(), 1);
        assert_eq!(store.load::<Note>("n1").unwrap(), Some(note("fresh", 1)));
    }

    #[test]
    fn test_purge() {
        let store = MemoryStore::new();
        store.save(&note("a", 1)).unwrap();
        assert!(store.purge::<Note>("n1").unwrap());
        assert!(!store.purge::<Note>("n1").unwrap());
        assert_eq!(store.load::<Note>("n1").unwrap(), None);
    }
}
