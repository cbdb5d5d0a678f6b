//! Several instances sharing one store: lease expiry, deferral and
//! peer notifications.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use crossref_coordination::{
    index_scope, BroadcastBus, LeaseConfig, LeaseManager, LeaseOutcome, MessageBus,
    StorageLeaseStore,
};
use crossref_engine::ReindexOutcome;

use e2e_tests::{document, node, register_indexed, search_titles, TestHarness};

fn manager(harness: &TestHarness) -> LeaseManager {
    LeaseManager::new(
        Arc::new(StorageLeaseStore::new(harness.storage.clone())),
        Arc::new(harness.clock.clone()),
        LeaseConfig::default(),
    )
}

#[tokio::test]
async fn test_lease_is_stolen_only_after_timeout() {
    let harness = TestHarness::new();
    let first = manager(&harness);
    let second = manager(&harness);

    let fresh = "index:FRESH";
    let stale = "index:STALE";
    assert!(matches!(
        first.try_acquire(fresh, "instance-a").unwrap(),
        LeaseOutcome::Acquired(_)
    ));
    assert!(matches!(
        first.try_acquire(stale, "instance-a").unwrap(),
        LeaseOutcome::Acquired(_)
    ));

    // 10s without a heartbeat: still live
    harness.clock.advance(Duration::from_secs(10));
    match second.try_acquire(fresh, "instance-b").unwrap() {
        LeaseOutcome::Busy { holder } => assert_eq!(holder.holder_id, "instance-a"),
        other => panic!("Expected busy, got {other:?}"),
    }
    assert!(first.heartbeat(fresh, "instance-a").unwrap());

    // 16s since the stale scope's last heartbeat, 6s for the fresh one
    harness.clock.advance(Duration::from_secs(6));
    match second.try_acquire(stale, "instance-b").unwrap() {
        LeaseOutcome::Stolen { lease, previous } => {
            assert_eq!(lease.holder_id, "instance-b");
            assert_eq!(previous.holder_id, "instance-a");
        }
        other => panic!("Expected theft, got {other:?}"),
    }
    assert!(matches!(
        second.try_acquire(fresh, "instance-b").unwrap(),
        LeaseOutcome::Busy { .. }
    ));

    // The old holder finds out on its next heartbeat
    assert!(!first.heartbeat(stale, "instance-a").unwrap());
    assert_eq!(
        first.current(stale).unwrap().map(|l| l.holder_id),
        Some("instance-b".to_string())
    );
}

#[tokio::test]
async fn test_reindex_defers_to_live_holder_then_takes_over() {
    let harness = TestHarness::new();
    let engine_a = harness.engine("instance-a").await;
    let engine_b = harness.engine("instance-b").await;

    let doc = register_indexed(
        &engine_a,
        &document(
            "Shared",
            "/shared.json",
            vec![node("S1", "Standup", "Daily sync")],
        ),
    )
    .await;

    // Instance A is (apparently) reindexing and then goes silent
    let leases = manager(&harness);
    let scope = index_scope(&doc);
    assert!(leases.try_acquire(&scope, "instance-a").unwrap().is_held());

    let outcome = engine_b.reindex_document(&doc).await.unwrap();
    assert_eq!(
        outcome,
        ReindexOutcome::Deferred {
            holder: "instance-a".to_string()
        }
    );
    assert!(engine_b.collector().is_dirty(&doc));
    assert!(search_titles(&engine_b, "standup").await.is_empty());

    harness.clock.advance(Duration::from_secs(16));
    let outcome = engine_b.reindex_document(&doc).await.unwrap();
    assert!(matches!(outcome, ReindexOutcome::Indexed(_)));
    assert!(!engine_b.collector().is_dirty(&doc));
    assert_eq!(search_titles(&engine_b, "standup").await, vec!["Standup"]);

    // B released the lease it took over
    assert_eq!(leases.current(&scope).unwrap(), None);

    engine_a.shutdown().await;
    engine_b.shutdown().await;
}

#[tokio::test]
async fn test_peer_sees_documents_indexed_elsewhere() {
    let harness = TestHarness::new();
    let bus: Arc<dyn MessageBus> = Arc::new(BroadcastBus::new());
    let writer = harness.engine_on_bus("instance-a", bus.clone()).await;
    let reader = harness.engine_on_bus("instance-b", bus.clone()).await;

    register_indexed(
        &writer,
        &document(
            "Recipes",
            "/recipes.json",
            vec![node("R1", "Sourdough", "Feed the starter")],
        ),
    )
    .await;

    let mut titles = Vec::new();
    for _ in 0..100 {
        titles = search_titles(&reader, "sourdough").await;
        if !titles.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(titles, vec!["Sourdough"]);

    writer.shutdown().await;
    reader.shutdown().await;
}

#[tokio::test]
async fn test_engines_sharing_a_store_keep_each_others_documents() {
    let harness = TestHarness::new();
    let engine_a = harness.engine("instance-a").await;
    let engine_b = harness.engine("instance-b").await;

    let x = register_indexed(
        &engine_a,
        &document(
            "Instruments",
            "/instruments.json",
            vec![node("X1", "Xylophone", "Wooden bars")],
        ),
    )
    .await;
    register_indexed(
        &engine_b,
        &document(
            "Songs",
            "/songs.json",
            vec![node("Y1", "Yodel", "Alpine calls")],
        ),
    )
    .await;
    // A later publish by A must not drop what B wrote
    engine_a.reindex_document(&x).await.unwrap();

    let engine_c = harness.engine("instance-c").await;
    assert_eq!(search_titles(&engine_c, "xylophone").await, vec!["Xylophone"]);
    assert_eq!(search_titles(&engine_c, "yodel").await, vec!["Yodel"]);

    engine_a.reload().await.unwrap();
    assert_eq!(search_titles(&engine_a, "yodel").await, vec!["Yodel"]);

    engine_a.shutdown().await;
    engine_b.shutdown().await;
    engine_c.shutdown().await;
}
