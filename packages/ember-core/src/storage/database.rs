//! # Database
//!
//! SQLite-backed [`Store`].
//!
//! ## Database Operations
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DATABASE OPERATIONS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │   StoreExt      │  Typed load / save with conflict policies         │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │  SqliteStore    │  Raw records                                      │
//! │  │   (this file)   │  - IMMEDIATE transaction per update               │
//! │  │                 │  - Prefix scans                                   │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │   SQLite DB     │  Storage                                          │
//! │  │   (file or      │  - WAL so several processes can share one file    │
//! │  │    memory)      │  - In-memory for tests                            │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::Arc;
use std::time::Duration;

use super::schema;
use super::{EntityKind, OutboxEntry, Store, StoredRecord, UpdateFn};
use crate::error::{Error, Result};

/// How long a writer waits for another process holding the lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite store
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a store
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        conn.busy_timeout(BUSY_TIMEOUT)?;
        if path.is_some() {
            let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
            tracing::debug!("SQLite journal mode: {}", mode);
        }

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        // Creating is idempotent, so a second process racing us is harmless
        conn.execute_batch(schema::CREATE_TABLES)
            .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;

        let version: Option<i32> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get::<_, Option<i32>>(0)
            })
            .optional()?
            .flatten();

        match version {
            None => {
                conn.execute(
                    "INSERT OR IGNORE INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| {
                    Error::DatabaseError(format!("Failed to set schema version: {}", e))
                })?;

                tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::DatabaseError(format!(
                    "Database schema version {} is newer than supported {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) if v < schema::SCHEMA_VERSION => {
                tracing::info!(
                    "Database schema version {} is older than current {}, running migrations",
                    v,
                    schema::SCHEMA_VERSION
                );

                if v < 2 {
                    tracing::info!("Running migration v1 → v2 (replication outbox)");
                    conn.execute_batch(schema::MIGRATE_V1_TO_V2)
                        .map_err(|e| Error::DatabaseError(format!("Migration v1→v2 failed: {}", e)))?;
                }

                conn.execute(
                    "INSERT OR IGNORE INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| {
                    Error::DatabaseError(format!("Failed to set schema version: {}", e))
                })?;
            }
            Some(v) => {
                tracing::debug!("Database schema is at version {}", v);
            }
        }

        Ok(())
    }
}

fn read_record(kind: EntityKind, row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRecord> {
    Ok(StoredRecord {
        kind,
        key: row.get(0)?,
        updated_at: row.get(1)?,
        payload: row.get(2)?,
    })
}

impl Store for SqliteStore {
    fn get(&self, kind: EntityKind, key: &str) -> Result<Option<StoredRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT key, updated_at, payload FROM entities WHERE kind = ? AND key = ?",
                params![kind.as_str(), key],
                |row| read_record(kind, row),
            )
            .optional()?;
        Ok(record)
    }

    fn scan(&self, kind: EntityKind, prefix: &str) -> Result<Vec<StoredRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT key, updated_at, payload FROM entities
             WHERE kind = ?1 AND substr(key, 1, length(?2)) = ?2
             ORDER BY key",
        )?;

        let records = stmt
            .query_map(params![kind.as_str(), prefix], |row| read_record(kind, row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn update(&self, kind: EntityKind, key: &str, f: &mut UpdateFn<'_>) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = tx
            .query_row(
                "SELECT key, updated_at, payload FROM entities WHERE kind = ? AND key = ?",
                params![kind.as_str(), key],
                |row| read_record(kind, row),
            )
            .optional()?;

        let Some(next) = f(existing.as_ref())? else {
            return Ok(false);
        };

        if next.kind != kind || next.key != key {
            return Err(Error::Internal(format!(
                "Update of {}/{} produced a record for {}/{}",
                kind, key, next.kind, next.key
            )));
        }

        tx.execute(
            "INSERT OR REPLACE INTO entities (kind, key, updated_at, payload) VALUES (?, ?, ?, ?)",
            params![kind.as_str(), key, next.updated_at, next.payload],
        )?;
        tx.commit()?;

        Ok(true)
    }

    fn remove(&self, kind: EntityKind, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM entities WHERE kind = ? AND key = ?",
            params![kind.as_str(), key],
        )?;
        Ok(rows > 0)
    }

    fn quarantine(&self, record: &StoredRecord, reason: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO quarantine (kind, key, payload, reason, quarantined_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                record.kind.as_str(),
                record.key,
                record.payload,
                reason,
                crate::time::now_timestamp_millis()
            ],
        )?;
        tx.execute(
            "DELETE FROM entities WHERE kind = ? AND key = ? AND payload = ?",
            params![record.kind.as_str(), record.key, record.payload],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn quarantine_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM quarantine", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value, updated_at) VALUES (?, ?, ?)",
            params![key, value, crate::time::now_timestamp_millis()],
        )?;
        Ok(())
    }

    fn outbox_append(&self, payload: &[u8]) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO outbox (payload, queued_at) VALUES (?, ?)",
            params![payload, crate::time::now_timestamp_millis()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn outbox_entries(&self, after: i64, limit: usize) -> Result<Vec<OutboxEntry>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT seq, payload FROM outbox WHERE seq > ? ORDER BY seq LIMIT ?")?;

        let entries = stmt
            .query_map(params![after, limit as i64], |row| {
                Ok(OutboxEntry {
                    seq: row.get(0)?,
                    payload: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn outbox_remove(&self, seq: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM outbox WHERE seq = ?", params![seq])?;
        Ok(rows > 0)
    }

    fn outbox_len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreExt;

    fn record(kind: EntityKind, key: &str, at: i64, payload: &str) -> StoredRecord {
        StoredRecord {
            kind,
            key: key.to_string(),
            updated_at: at,
            payload: payload.as_bytes().to_vec(),
        }
    }

    fn put(store: &SqliteStore, rec: StoredRecord) -> bool {
        let kind = rec.kind;
        let key = rec.key.clone();
        let mut next = Some(rec);
        store.update(kind, &key, &mut |_| Ok(next.take())).unwrap()
    }

    #[test]
    fn test_database_creation() {
        let store = SqliteStore::open(None).unwrap();
        assert!(store.scan(EntityKind::Profile, "").unwrap().is_empty());
        assert_eq!(store.quarantine_count().unwrap(), 0);
    }

    #[test]
    fn test_update_and_get() {
        let store = SqliteStore::open(None).unwrap();
        assert!(put(&store, record(EntityKind::Action, "alice:bob", 1, "{}")));

        let got = store.get(EntityKind::Action, "alice:bob").unwrap().unwrap();
        assert_eq!(got.updated_at, 1);
        assert!(store.get(EntityKind::Profile, "alice:bob").unwrap().is_none());

        // Declining to write leaves the record alone
        let wrote = store
            .update(EntityKind::Action, "alice:bob", &mut |existing| {
                assert!(existing.is_some());
                Ok(None)
            })
            .unwrap();
        assert!(!wrote);
    }

    #[test]
    fn test_update_rejects_mismatched_key() {
        let store = SqliteStore::open(None).unwrap();
        let result = store.update(EntityKind::Action, "alice:bob", &mut |_| {
            Ok(Some(record(EntityKind::Action, "bob:alice", 1, "{}")))
        });
        assert!(matches!(result, Err(Error::Internal(_))));
        assert!(store.get(EntityKind::Action, "alice:bob").unwrap().is_none());
    }

    #[test]
    fn test_prefix_scan() {
        let store = SqliteStore::open(None).unwrap();
        put(&store, record(EntityKind::Action, "alice:bob", 1, "{}"));
        put(&store, record(EntityKind::Action, "alice:carol", 2, "{}"));
        put(&store, record(EntityKind::Action, "alicia:bob", 3, "{}"));
        put(&store, record(EntityKind::Action, "bob:alice", 4, "{}"));

        let keys: Vec<String> = store
            .scan(EntityKind::Action, "alice:")
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["alice:bob", "alice:carol"]);

        // Underscores and percent signs are literal, not LIKE wildcards
        put(&store, record(EntityKind::Action, "a_b:x", 5, "{}"));
        assert!(store.scan(EntityKind::Action, "a%").unwrap().is_empty());
        assert_eq!(store.scan(EntityKind::Action, "a_b").unwrap().len(), 1);
    }

    #[test]
    fn test_remove() {
        let store = SqliteStore::open(None).unwrap();
        put(&store, record(EntityKind::Match, "alice:bob", 1, "{}"));
        assert!(store.remove(EntityKind::Match, "alice:bob").unwrap());
        assert!(!store.remove(EntityKind::Match, "alice:bob").unwrap());
    }

    #[test]
    fn test_quarantine_keeps_rewritten_record() {
        let store = SqliteStore::open(None).unwrap();
        let stale = record(EntityKind::Profile, "alice", 1, "garbage");
        put(&store, record(EntityKind::Profile, "alice", 2, "{\"fresh\":true}"));

        store.quarantine(&stale, "test").unwrap();
        assert_eq!(store.quarantine_count().unwrap(), 1);
        assert!(store.get(EntityKind::Profile, "alice").unwrap().is_some());

        let current = store.get(EntityKind::Profile, "alice").unwrap().unwrap();
        store.quarantine(&current, "test").unwrap();
        assert!(store.get(EntityKind::Profile, "alice").unwrap().is_none());
    }

    #[test]
    fn test_meta() {
        let store = SqliteStore::open(None).unwrap();
        assert_eq!(store.get_meta("cursor").unwrap(), None);
        store.set_meta("cursor", "1").unwrap();
        store.set_meta("cursor", "2").unwrap();
        assert_eq!(store.get_meta("cursor").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_file_persistence_and_sharing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::open(Some(path)).unwrap();
            put(&store, record(EntityKind::Profile, "alice", 1, "{}"));
            store.set_meta("peer", "p1").unwrap();
        }

        // Two handles on the same file see each other's writes
        let first = SqliteStore::open(Some(path)).unwrap();
        let second = SqliteStore::open(Some(path)).unwrap();
        assert!(first.get(EntityKind::Profile, "alice").unwrap().is_some());
        assert_eq!(first.get_meta("peer").unwrap().as_deref(), Some("p1"));

        put(&second, record(EntityKind::Profile, "bob", 2, "{}"));
        assert_eq!(first.scan(EntityKind::Profile, "").unwrap().len(), 2);
    }

    #[test]
    fn test_outbox_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::open(Some(path)).unwrap();
            let first = store.outbox_append(b"one").unwrap();
            let second = store.outbox_append(b"two").unwrap();
            assert!(second > first);
            store.outbox_append(b"three").unwrap();
            assert!(store.outbox_remove(first).unwrap());
            assert!(!store.outbox_remove(first).unwrap());
        }

        let store = SqliteStore::open(Some(path)).unwrap();
        assert_eq!(store.outbox_len().unwrap(), 2);
        let entries = store.outbox_entries(0, 10).unwrap();
        let payloads: Vec<&[u8]> = entries.iter().map(|e| e.payload.as_slice()).collect();
        assert_eq!(payloads, vec![b"two".as_slice(), b"three".as_slice()]);

        let rest = store.outbox_entries(entries[0].seq, 10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].payload, b"three");
        assert_eq!(store.outbox_entries(0, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_old_schema_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.db");
        let path = path.to_str().unwrap();

        {
            let conn = Connection::open(path).unwrap();
            conn.execute_batch(
                "CREATE TABLE schema_version (version INTEGER PRIMARY KEY);
                 INSERT INTO schema_version (version) VALUES (1);",
            )
            .unwrap();
        }

        let store = SqliteStore::open(Some(path)).unwrap();
        store.outbox_append(b"queued").unwrap();
        let version: i32 = store
            .conn
            .lock()
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_corrupt_payload_skipped_by_typed_reads() {
        use crate::profile::Profile;

        let store = SqliteStore::open(None).unwrap();
        put(&store, record(EntityKind::Profile, "alice", 1, "not json"));

        assert!(store.load::<Profile>("alice").unwrap().is_none());
        assert!(store.load_all::<Profile>("").unwrap().is_empty());
        assert_eq!(store.quarantine_count().unwrap(), 1);
    }
}
