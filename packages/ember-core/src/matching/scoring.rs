//! # Compatibility Scorer
//!
//! Pure 0-100 score from two profiles' interests and intents.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        COMPATIBILITY SCORE                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. shared = interests(a) ∩ interests(b)                                │
//! │                                                                         │
//! │     |shared|   0    1    2    3    4+                                   │
//! │     base       0   25   50   75   100                                   │
//! │                                                                         │
//! │  2. intents incompatible  → base × 0.7 (floored)                        │
//! │     identical, not Open   → base + 10 (capped at 100)                   │
//! │     otherwise             → base                                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The step function is a product decision, not an approximation of
//! something linear. Keep it exact.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::profile::{Intent, Profile};

/// Highest possible score
pub const MAX_SCORE: u8 = 100;

/// Percentage of the base kept when intents are incompatible
pub const INCOMPATIBLE_INTENT_PERCENT: u16 = 70;

/// Bonus for identical, non-Open intents
pub const SAME_INTENT_BONUS: u8 = 10;

/// Result of scoring two profiles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compatibility {
    /// Final score, 0-100
    pub score: u8,
    /// Interest tags both profiles have
    pub shared: BTreeSet<String>,
    /// Whether the intents are compatible
    pub intent_ok: bool,
}

/// Base score for a number of shared interests
pub fn base_score(shared_count: usize) -> u8 {
    match shared_count {
        0 => 0,
        1 => 25,
        2 => 50,
        3 => 75,
        _ => 100,
    }
}

/// Score left after the incompatible-intent penalty, floored
pub fn incompatible_penalty(base: u8) -> u8 {
    (u16::from(base) * INCOMPATIBLE_INTENT_PERCENT / 100) as u8
}

/// Apply the intent adjustment to a base score
pub fn adjust_for_intents(base: u8, first: Intent, second: Intent) -> u8 {
    if !first.compatible_with(second) {
        return incompatible_penalty(base);
    }
    if first == second && first != Intent::Open {
        return base.saturating_add(SAME_INTENT_BONUS).min(MAX_SCORE);
    }
    base
}

/// Score two profiles
///
/// Symmetric: `score(a, b) == score(b, a)`.
pub fn score(first: &Profile, second: &Profile) -> Compatibility {
    let shared: BTreeSet<String> = first
        .interests
        .intersection(&second.interests)
        .cloned()
        .collect();

    let base = base_score(shared.len());

    Compatibility {
        score: adjust_for_intents(base, first.intent, second.intent),
        shared,
        intent_ok: first.intent.compatible_with(second.intent),
    }
}
