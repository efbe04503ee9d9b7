//! # Error Handling
//!
//! Error types for Ember Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Config Errors (100)                                               │
//! │  │   └── InvalidConfig         - Rejected engine configuration         │
//! │  │                                                                      │
//! │  ├── Geo Errors (200)                                                  │
//! │  │   ├── InvalidCoordinate     - Lat/lon out of range (re-prompt)      │
//! │  │   ├── InvalidPrecision      - Geohash precision outside 1..=12      │
//! │  │   └── UnknownAlphabetChar   - Corrupt geohash string                │
//! │  │                                                                      │
//! │  ├── Profile Errors (300)                                              │
//! │  │   ├── UnknownProfile        - Missing or tombstoned profile         │
//! │  │   ├── InvalidProfile        - Profile failed validation             │
//! │  │   └── InvalidIntent         - Unknown intent string                 │
//! │  │                                                                      │
//! │  ├── Matching Errors (400)                                             │
//! │  │   ├── InvalidActionKind     - Unknown swipe kind                    │
//! │  │   ├── CannotActOnSelf       - Actor == target                       │
//! │  │   ├── NotMatched            - No active mutual match                │
//! │  │   ├── MatchNotFound         - Status change on a missing match      │
//! │  │   └── MatchBlocked          - Block set by the other profile        │
//! │  │                                                                      │
//! │  ├── Message Errors (500)                                              │
//! │  ├── Storage Errors (600)                                              │
//! │  ├── Sync Errors (700)         - Recovered locally, never user-facing  │
//! │  └── Internal Errors (900)                                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for Ember Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Ember Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Config Errors (100-199)
    // ========================================================================

    /// Engine configuration was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Geo Errors (200-299)
    // ========================================================================

    /// Latitude or longitude outside the valid range
    #[error("Invalid coordinate: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinate {
        /// Latitude that was supplied
        latitude: f64,
        /// Longitude that was supplied
        longitude: f64,
    },

    /// Geohash precision outside the supported range
    #[error("Invalid geohash precision: {0} (expected 1-12)")]
    InvalidPrecision(usize),

    /// Geohash contains a character outside the base-32 alphabet
    #[error("Geohash contains a character outside the base-32 alphabet: {0:?}")]
    UnknownAlphabetChar(char),

    // ========================================================================
    // Profile Errors (300-399)
    // ========================================================================

    /// Profile does not exist or has been erased
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    /// Profile failed validation
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    /// Intent string did not name a known intent
    #[error("Invalid intent: {0}")]
    InvalidIntent(String),

    // ========================================================================
    // Matching Errors (400-499)
    // ========================================================================

    /// Action kind string did not name a known kind
    #[error("Invalid action kind: {0}")]
    InvalidActionKind(String),

    /// A profile tried to swipe on itself
    #[error("A profile cannot act on itself.")]
    CannotActOnSelf,

    /// No active mutual match between the two profiles
    #[error("No mutual match exists between these profiles.")]
    NotMatched,

    /// Match not found
    #[error("Match not found.")]
    MatchNotFound,

    /// The match was blocked by the other profile
    #[error("This match was blocked by the other profile.")]
    MatchBlocked,

    // ========================================================================
    // Message Errors (500-599)
    // ========================================================================

    /// Invalid message content
    #[error("Invalid message content: {0}")]
    InvalidMessageContent(String),

    /// Message not found
    #[error("Message not found.")]
    MessageNotFound,

    // ========================================================================
    // Storage Errors (600-699)
    // ========================================================================

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A persisted record could not be decoded
    #[error("Data corruption detected: {0}")]
    StorageCorrupted(String),

    // ========================================================================
    // Sync Errors (700-799)
    // ========================================================================

    /// Replication peer set could not be reached
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    /// A peer refused a pushed write
    #[error("Peer rejected write: {0}")]
    PeerRejected(String),

    /// Any other replication failure
    #[error("Sync failed: {0}")]
    SyncFailed(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Config
    /// - 200-299: Geo
    /// - 300-399: Profile
    /// - 400-499: Matching
    /// - 500-599: Messages
    /// - 600-699: Storage
    /// - 700-799: Sync
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_) => 100,

            Error::InvalidCoordinate { .. } => 200,
            Error::InvalidPrecision(_) => 201,
            Error::UnknownAlphabetChar(_) => 202,

            Error::UnknownProfile(_) => 300,
            Error::InvalidProfile(_) => 301,
            Error::InvalidIntent(_) => 302,

            Error::InvalidActionKind(_) => 400,
            Error::CannotActOnSelf => 401,
            Error::NotMatched => 402,
            Error::MatchNotFound => 403,
            Error::MatchBlocked => 404,

            Error::InvalidMessageContent(_) => 500,
            Error::MessageNotFound => 501,

            Error::DatabaseError(_) => 600,
            Error::StorageCorrupted(_) => 601,

            Error::PeerUnreachable(_) => 700,
            Error::PeerRejected(_) => 701,
            Error::SyncFailed(_) => 702,

            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
            Error::DeserializationError(_) => 902,
        }
    }

    /// Check if this error is recoverable by retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PeerUnreachable(_) | Error::PeerRejected(_) | Error::SyncFailed(_)
        )
    }

    /// Check if this error means a persisted or received record is corrupt
    ///
    /// Corrupt records are skipped, never allowed to abort a whole read.
    pub fn is_corrupt_data(&self) -> bool {
        matches!(
            self,
            Error::UnknownAlphabetChar(_)
                | Error::StorageCorrupted(_)
                | Error::DeserializationError(_)
        )
    }

    /// Check if this error requires user action
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Error::InvalidCoordinate { .. } | Error::NotMatched | Error::UnknownProfile(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
