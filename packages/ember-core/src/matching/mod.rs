//! # Matching Module
//!
//! Scoring, swipes and mutual-match detection.
//!
//! ## Data Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          MATCHING FLOW                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  swipe(actor, target, kind, at)                                         │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌──────────────┐   upsert (actor:target), LWW by `at`                  │
//! │  │ ActionLedger │                                                       │
//! │  └──────┬───────┘                                                       │
//! │         │ positive kind                                                 │
//! │         ▼                                                               │
//! │  ┌──────────────┐   both directions positive?                           │
//! │  │ MatchDetector│──────────────────────────► MutualMatch (a < b)        │
//! │  └──────────────┘          uses scoring::score for score/shared         │
//! │                                                                         │
//! │  rank_candidates(viewer, pool) ── read only, never writes               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod candidates;
pub mod detector;
pub mod ledger;
pub mod scoring;

pub use candidates::{rank_candidates, Candidate, CandidateFilter};
pub use detector::{
    canonical_pair, pair_key, MatchDetector, MatchFlag, MatchState, MatchStatus, MutualMatch,
};
pub use ledger::{action_key, ActionKind, ActionLedger, LikeAction};
pub use scoring::{base_score, score, Compatibility};
