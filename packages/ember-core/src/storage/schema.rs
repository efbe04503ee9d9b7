//! # Database Schema
//!
//! SQL schema definitions for the Ember store.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐    ┌─────────────────┐      ┌─────────────────┐    │
//! │  │    entities     │    │   quarantine    │      │      meta       │    │
//! │  ├─────────────────┤    ├─────────────────┤      ├─────────────────┤    │
//! │  │ kind            │    │ id              │      │ key             │    │
//! │  │ key             │    │ kind            │      │ value           │    │
//! │  │ updated_at      │    │ key             │      │ updated_at      │    │
//! │  │ payload         │    │ payload         │      └─────────────────┘    │
//! │  └─────────────────┘    │ reason          │                             │
//! │                         │ quarantined_at  │      ┌─────────────────┐    │
//! │                         └─────────────────┘      │     outbox      │    │
//! │                                                  ├─────────────────┤    │
//! │                                                  │ seq             │    │
//! │                                                  │ payload         │    │
//! │                                                  │ queued_at       │    │
//! │                                                  └─────────────────┘    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Entities table
-- One row per profile, action, match, match flag and message
CREATE TABLE IF NOT EXISTS entities (
    -- Entity kind (profile, action, match, match_flag, message)
    kind TEXT NOT NULL,
    -- Key, unique within its kind (e.g. "alice:bob" for actions)
    key TEXT NOT NULL,
    -- Logical modification time (ms), used for conflict resolution
    updated_at INTEGER NOT NULL,
    -- JSON encoded entity
    payload BLOB NOT NULL,
    PRIMARY KEY (kind, key)
);

-- Quarantine table
-- Records that could not be decoded, kept for inspection
CREATE TABLE IF NOT EXISTS quarantine (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    payload BLOB NOT NULL,
    reason TEXT NOT NULL,
    quarantined_at INTEGER NOT NULL
);

-- Engine metadata (sync cursors, local peer id)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Replication outbox
-- Encoded envelopes not yet accepted by the sync transport
CREATE TABLE IF NOT EXISTS outbox (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    payload BLOB NOT NULL,
    queued_at INTEGER NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_entities_updated ON entities(kind, updated_at);
"#;

/// Migration from version 1: durable replication outbox
pub const MIGRATE_V1_TO_V2: &str = r#"
CREATE TABLE IF NOT EXISTS outbox (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    payload BLOB NOT NULL,
    queued_at INTEGER NOT NULL
);
"#;
