//! # Action Ledger
//!
//! One current action per ordered `(actor, target)` pair.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ACTION LEDGER                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  key "alice:bob"                                                        │
//! │                                                                         │
//! │  record(alice, bob, Pass, t1)   ──► { Pass, t1 }                        │
//! │  record(alice, bob, Like, t2)   ──► { Like, t2 }    (t2 > t1: replaces) │
//! │  record(alice, bob, Pass, t0)   ──► { Like, t2 }    (t0 < t2: ignored)  │
//! │                                                                         │
//! │  Replicas exchanging these writes in any order end on the same record.  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::profile::{require_active, validate_profile_id, ProfileId};
use crate::storage::{last_write_wins, Entity, EntityKind, Store, StoreExt, WriteOutcome};

/// What a swipe expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// Interested
    Like,
    /// Not interested
    Pass,
    /// Strongly interested
    SuperLike,
}

impl ActionKind {
    /// Whether this kind counts toward a mutual match
    pub fn is_positive(&self) -> bool {
        matches!(self, ActionKind::Like | ActionKind::SuperLike)
    }

    /// Convert to storage string
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Like => "like",
            ActionKind::Pass => "pass",
            ActionKind::SuperLike => "super_like",
        }
    }

    /// Parse from storage string
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "like" => Ok(ActionKind::Like),
            "pass" => Ok(ActionKind::Pass),
            "super_like" | "superlike" => Ok(ActionKind::SuperLike),
            other => Err(Error::InvalidActionKind(other.to_string())),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// The current action of one profile toward another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeAction {
    /// Who swiped
    pub actor: ProfileId,
    /// Who was swiped on
    pub target: ProfileId,
    /// What the swipe expressed
    pub kind: ActionKind,
    /// When it happened (ms)
    pub at: i64,
}

impl LikeAction {
    /// Check ids are well-formed and distinct
    pub fn validate(&self) -> Result<()> {
        validate_profile_id(&self.actor)?;
        validate_profile_id(&self.target)?;
        if self.actor == self.target {
            return Err(Error::CannotActOnSelf);
        }
        Ok(())
    }
}

/// Store key for an ordered pair
pub fn action_key(actor: &str, target: &str) -> String {
    format!("{}:{}", actor, target)
}

impl Entity for LikeAction {
    const KIND: EntityKind = EntityKind::Action;

    fn key(&self) -> String {
        action_key(&self.actor, &self.target)
    }

    fn updated_at(&self) -> i64 {
        self.at
    }

    fn resolve(existing: &Self, incoming: Self) -> Option<Self> {
        last_write_wins(existing, incoming)
    }
}

/// The action ledger
#[derive(Clone)]
pub struct ActionLedger {
    store: Arc<dyn Store>,
}

impl ActionLedger {
    /// Create a ledger over a store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a local swipe
    ///
    /// Both profiles must exist and not be erased. A later action for the
    /// same pair replaces the earlier one; an older one is ignored.
    pub fn record(
        &self,
        actor: &str,
        target: &str,
        kind: ActionKind,
        at: i64,
    ) -> Result<WriteOutcome<LikeAction>> {
        let action = LikeAction {
            actor: actor.to_string(),
            target: target.to_string(),
            kind,
            at,
        };
        self.apply(action)
    }

    /// Merge an action, local or replicated
    pub fn apply(&self, action: LikeAction) -> Result<WriteOutcome<LikeAction>> {
        action.validate()?;
        require_active(self.store.as_ref(), &action.actor)?;
        require_active(self.store.as_ref(), &action.target)?;

        let outcome = self.store.save(&action)?;
        if outcome.is_written() {
            tracing::debug!(
                actor = %action.actor,
                target = %action.target,
                kind = %action.kind,
                "Action recorded"
            );
        }
        Ok(outcome)
    }

    /// The current action for an ordered pair
    pub fn action(&self, actor: &str, target: &str) -> Result<Option<LikeAction>> {
        self.store.load(&action_key(actor, target))
    }

    /// Whether `actor` has judged `target` in any way
    pub fn has_acted(&self, actor: &str, target: &str) -> Result<bool> {
        Ok(self.action(actor, target)?.is_some())
    }

    /// Whether `actor` currently likes `target`
    pub fn likes(&self, actor: &str, target: &str) -> Result<bool> {
        Ok(self
            .action(actor, target)?
            .is_some_and(|a| a.kind.is_positive()))
    }

    /// Every action made by `actor`
    pub fn actions_from(&self, actor: &str) -> Result<Vec<LikeAction>> {
        self.store.load_all(&format!("{}:", actor))
    }

    /// Every action targeting `target`
    pub fn actions_to(&self, target: &str) -> Result<Vec<LikeAction>> {
        let mut actions: Vec<LikeAction> = self.store.load_all("")?;
        actions.retain(|a| a.target == target);
        Ok(actions)
    }

    /// Likes and super-likes targeting `target`, newest first
    pub fn likes_to(&self, target: &str) -> Result<Vec<LikeAction>> {
        let mut likes = self.actions_to(target)?;
        likes.retain(|a| a.kind.is_positive());
        likes.sort_by(|x, y| y.at.cmp(&x.at).then_with(|| x.actor.cmp(&y.actor)));
        Ok(likes)
    }

    /// Remove every action made by or targeting a profile
    pub fn purge_profile(&self, id: &str) -> Result<usize> {
        let mut removed = 0;
        for action in self.actions_from(id)?.into_iter().chain(self.actions_to(id)?) {
            if self.store.purge::<LikeAction>(&action.key())? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
