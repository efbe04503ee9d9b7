//! # Matching Demo
//!
//! This example walks two devices through the whole flow:
//! 1. Alice and Bob create profiles on their own replicas
//! 2. The replicas sync and each sees the other in discovery
//! 3. Reciprocal likes produce a mutual match on both sides
//! 4. Bob follows the chat thread and receives Alice's message
//! 5. Alice exports her data, then erases it everywhere
//!
//! ## Run
//!
//! ```bash
//! cargo run --example matching_demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use ember_core::storage::Store;
use ember_core::time::now_timestamp_millis;
use ember_core::{
    ActionKind, CandidateFilter, Engine, EngineConfig, GeoPoint, GossipHub, Intent, SqliteStore,
};

fn replica(hub: &GossipHub, peer: &str) -> Engine {
    let config = EngineConfig {
        peer_id: peer.to_string(),
        ..EngineConfig::default()
    };
    let store: Arc<dyn Store> =
        Arc::new(SqliteStore::open(None).expect("Failed to open in-memory store"));
    Engine::with_parts(config, store, Arc::new(hub.connect(peer)))
        .expect("Failed to build engine")
}

#[tokio::main]
async fn main() {
    println!("=================================================");
    println!("            EMBER MATCHING DEMO");
    println!("=================================================\n");

    let hub = GossipHub::new();
    let alice_phone = replica(&hub, "alice-phone");
    let bob_phone = replica(&hub, "bob-phone");

    // =========================================================================
    // STEP 1: Create profiles
    // =========================================================================
    println!("1. Creating profiles...\n");

    let mitte = GeoPoint::new(52.5200, 13.4050).expect("Invalid coordinate");
    let kreuzberg = GeoPoint::new(52.4986, 13.4030).expect("Invalid coordinate");

    let alice = alice_phone
        .create_profile("alice", ["Coffee", "Hiking", "Art"], Intent::LongTerm, mitte)
        .expect("Failed to create Alice");
    let bob = bob_phone
        .create_profile("bob", ["coffee", "hiking", "music"], Intent::LongTerm, kreuzberg)
        .expect("Failed to create Bob");

    for profile in [&alice, &bob] {
        println!(
            "   {:<6} interests={:?} intent={} cell={}",
            profile.id,
            profile.interests,
            profile.intent,
            profile.location.as_ref().map(|h| h.as_str()).unwrap_or("-")
        );
    }
    println!("   (raw coordinates were dropped after encoding)");
    println!();

    // =========================================================================
    // STEP 2: Sync and discover
    // =========================================================================
    println!("2. Syncing replicas and ranking candidates...\n");

    for engine in [&alice_phone, &bob_phone, &alice_phone] {
        let report = engine.sync_now().await;
        println!(
            "   {:<12} pushed={} pulled={} applied={}",
            engine.peer_id(),
            report.pushed,
            report.pulled,
            report.applied
        );
    }

    let feed = alice_phone
        .get_candidates("alice", 10.0, &CandidateFilter::default())
        .expect("Failed to rank candidates");
    for candidate in &feed {
        println!(
            "   candidate {} score={} shared={:?} distance={}",
            candidate.profile_id, candidate.score, candidate.shared_interests, candidate.band.label()
        );
    }
    println!();

    // =========================================================================
    // STEP 3: Swipe on both devices
    // =========================================================================
    println!("3. Alice and Bob like each other...\n");

    let now = now_timestamp_millis();
    let first = alice_phone
        .submit_swipe("alice", "bob", ActionKind::Like, now)
        .expect("Alice's swipe failed");
    println!("   alice -> bob  matched={}", first.matched);

    bob_phone.sync_now().await;
    let second = bob_phone
        .submit_swipe("bob", "alice", ActionKind::SuperLike, now + 1)
        .expect("Bob's swipe failed");
    println!("   bob -> alice  matched={}", second.matched);
    if let Some(created) = &second.new_match {
        println!(
            "   [OK] Match {}:{} score={} shared={:?}",
            created.a, created.b, created.score, created.shared_interests
        );
    }

    bob_phone.sync_now().await;
    alice_phone.sync_now().await;
    println!(
        "   Alice's replica agrees: {}",
        alice_phone
            .check_mutual("alice", "bob")
            .expect("Match check failed")
    );
    println!();

    // =========================================================================
    // STEP 4: Chat
    // =========================================================================
    println!("4. Bob follows the thread, Alice writes...\n");

    let subscription = bob_phone
        .subscribe_chat("bob", "alice", |message| {
            println!("   [bob's feed] {}: {}", message.sender_id, message.body);
        })
        .await
        .expect("Failed to subscribe");

    alice_phone
        .send_message("alice", "bob", "Coffee this weekend?")
        .expect("Failed to send");
    alice_phone.sync_now().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    bob_phone.sync_now().await;

    subscription.unsubscribe();
    println!();

    // =========================================================================
    // STEP 5: Export and erase
    // =========================================================================
    println!("5. Alice exports and then erases her data...\n");

    let export = alice_phone
        .export_user_data("alice")
        .expect("Export failed");
    println!("   Export size: {} bytes", export.len());

    let report = alice_phone.erase_user_data("alice").expect("Erase failed");
    println!(
        "   Removed actions={} matches={} messages={}",
        report.actions_removed, report.matches_removed, report.messages_removed
    );

    alice_phone.sync_now().await;
    bob_phone.sync_now().await;
    println!(
        "   Bob's replica still knows alice: {}",
        bob_phone
            .get_profile("alice")
            .expect("Lookup failed")
            .is_some()
    );
    println!(
        "   Bob's matches: {}",
        bob_phone.matches_for("bob").expect("Lookup failed").len()
    );

    println!("\n=================================================");
    println!("                 DEMO COMPLETE");
    println!("=================================================");
}
