//! Data export and right to erasure.
//!
//! ```text
//! erase_user_data(id)
//!   1. outbox  ──► drop unsent writes that mention the id
//!   2. profile ──► tombstone (interests and location cleared)
//!   3. store   ──► purge actions, matches, flags and messages
//!   4. publish the tombstone; peers applying it run step 3 themselves
//! ```

use serde::{Deserialize, Serialize};

use super::{Engine, MatchEntry};
use crate::chat::ChatMessage;
use crate::error::Result;
use crate::matching::LikeAction;
use crate::profile::{require_active, Profile, ProfileId};
use crate::storage::{Entity, StoreExt};

/// Version of the export document layout
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Everything stored about one profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDataExport {
    /// Document layout version
    pub format_version: u32,
    /// When the export was taken (ms)
    pub exported_at: i64,
    /// The profile itself
    pub profile: Profile,
    /// Swipes made by the profile
    pub actions_made: Vec<LikeAction>,
    /// Swipes received by the profile
    pub actions_received: Vec<LikeAction>,
    /// Matches with their status
    pub matches: Vec<MatchEntry>,
    /// Messages sent or received, oldest first
    pub messages: Vec<ChatMessage>,
}

/// What an erasure removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureReport {
    /// Erased profile
    pub profile_id: ProfileId,
    /// Actions removed
    pub actions_removed: usize,
    /// Matches removed
    pub matches_removed: usize,
    /// Match status flags removed
    pub flags_removed: usize,
    /// Messages removed
    pub messages_removed: usize,
    /// Unsent replication entries dropped
    pub outbox_discarded: usize,
    /// Timestamp of the tombstone (ms)
    pub tombstone_at: i64,
}

#[derive(Debug, Default)]
pub(super) struct Purged {
    pub actions: usize,
    pub matches: usize,
    pub flags: usize,
    pub messages: usize,
}

impl Engine {
    /// Collect everything stored about a profile
    pub fn export_snapshot(&self, id: &str) -> Result<UserDataExport> {
        let profile = require_active(self.store.as_ref(), id)?;

        let mut actions_received = self.ledger.actions_to(id)?;
        actions_received.sort_by(|x, y| x.at.cmp(&y.at).then_with(|| x.actor.cmp(&y.actor)));

        Ok(UserDataExport {
            format_version: EXPORT_FORMAT_VERSION,
            exported_at: crate::time::now_timestamp_millis(),
            profile,
            actions_made: self.ledger.actions_from(id)?,
            actions_received,
            matches: self.matches_for(id)?,
            messages: self.messages_involving(id)?,
        })
    }

    /// Export everything stored about a profile as pretty-printed JSON
    pub fn export_user_data(&self, id: &str) -> Result<String> {
        let snapshot = self.export_snapshot(id)?;
        let json = serde_json::to_string_pretty(&snapshot)?;
        tracing::info!(
            profile = id,
            actions = snapshot.actions_made.len() + snapshot.actions_received.len(),
            matches = snapshot.matches.len(),
            messages = snapshot.messages.len(),
            "User data exported"
        );
        Ok(json)
    }

    /// Erase a profile and everything that references it
    ///
    /// The id stays reserved by its tombstone and cannot be recreated.
    pub fn erase_user_data(&self, id: &str) -> Result<ErasureReport> {
        let profile = require_active(self.store.as_ref(), id)?;
        let outbox_discarded = self.replicator.discard_mentioning(id)?;

        let tombstone = profile.tombstone(crate::time::next_timestamp_after(profile.updated_at));
        self.store.save(&tombstone)?;
        let purged = self.purge_local(id)?;
        self.publish(&tombstone, None);

        let report = ErasureReport {
            profile_id: id.to_string(),
            actions_removed: purged.actions,
            matches_removed: purged.matches,
            flags_removed: purged.flags,
            messages_removed: purged.messages,
            outbox_discarded,
            tombstone_at: tombstone.updated_at,
        };
        tracing::info!(
            profile = id,
            actions = report.actions_removed,
            matches = report.matches_removed,
            messages = report.messages_removed,
            "User data erased"
        );
        Ok(report)
    }

    /// Remove every local record that references a profile
    pub(super) fn purge_local(&self, id: &str) -> Result<Purged> {
        let actions = self.ledger.purge_profile(id)?;
        let (matches, flags) = self.detector.purge_profile(id)?;

        let mut messages = 0;
        for message in self.messages_involving(id)? {
            if self.store.purge::<ChatMessage>(&message.key())? {
                messages += 1;
            }
        }

        Ok(Purged {
            actions,
            matches,
            flags,
            messages,
        })
    }

    fn messages_involving(&self, id: &str) -> Result<Vec<ChatMessage>> {
        let mut messages: Vec<ChatMessage> = self.store.load_all("")?;
        messages.retain(|m| m.involves(id));
        messages.sort_by(|m, n| m.at.cmp(&n.at).then_with(|| m.id.cmp(&n.id)));
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::error::Error;
    use crate::matching::ActionKind;
    use crate::profile::Intent;

    #[test]
    fn test_export_contains_everything_about_the_profile() {
        let engine = engine();
        add(&engine, "alice", &["art", "coffee"], Intent::LongTerm);
        add(&engine, "bob", &["art"], Intent::LongTerm);
        add(&engine, "carol", &["chess"], Intent::Friends);
        matched(&engine, "alice", "bob");
        engine
            .submit_swipe("carol", "alice", ActionKind::Like, 5)
            .unwrap();
        engine.send_message("bob", "alice", "hello").unwrap();

        let json = engine.export_user_data("alice").unwrap();
        let export: UserDataExport = serde_json::from_str(&json).unwrap();

        assert_eq!(export.format_version, EXPORT_FORMAT_VERSION);
        assert_eq!(export.profile.id, "alice");
        assert_eq!(export.actions_made.len(), 1);
        assert_eq!(export.actions_received.len(), 2);
        assert_eq!(export.matches.len(), 1);
        assert_eq!(export.matches[0].with, "bob");
        assert_eq!(export.messages.len(), 1);
        assert_eq!(export.messages[0].body, "hello");
    }

    #[test]
    fn test_export_unknown_profile() {
        let engine = engine();
        assert!(matches!(
            engine.export_user_data("ghost"),
            Err(Error::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_erase_removes_local_data_and_queues_tombstone() {
        let engine = engine();
        add(&engine, "alice", &["art"], Intent::Open);
        add(&engine, "bob", &["art"], Intent::Open);
        matched(&engine, "alice", "bob");
        engine.send_message("alice", "bob", "hi").unwrap();
        assert_eq!(engine.pending_sync().unwrap(), 6);

        let report = engine.erase_user_data("alice").unwrap();
        assert_eq!(report.actions_removed, 2);
        assert_eq!(report.matches_removed, 1);
        assert_eq!(report.messages_removed, 1);
        assert_eq!(report.outbox_discarded, 5);
        // bob's profile and alice's tombstone
        assert_eq!(engine.pending_sync().unwrap(), 2);

        assert!(engine.get_profile("alice").unwrap().is_none());
        assert!(engine.matches_for("bob").unwrap().is_empty());
        assert!(engine.messages_between("alice", "bob").unwrap().is_empty());

        let stored: Profile = engine.store().load("alice").unwrap().unwrap();
        assert!(stored.deleted);
        assert!(stored.interests.is_empty());
        assert!(stored.location.is_none());
    }

    #[test]
    fn test_erased_id_stays_reserved() {
        let engine = engine();
        add(&engine, "alice", &["art"], Intent::Open);
        add(&engine, "bob", &["art"], Intent::Open);
        engine.erase_user_data("alice").unwrap();

        assert!(matches!(
            engine.create_profile("alice", ["art"], Intent::Open, berlin()),
            Err(Error::InvalidProfile(_))
        ));
        assert!(matches!(
            engine.submit_swipe("bob", "alice", ActionKind::Like, 1),
            Err(Error::UnknownProfile(_))
        ));
        assert!(matches!(
            engine.erase_user_data("alice"),
            Err(Error::UnknownProfile(_))
        ));
    }
}
