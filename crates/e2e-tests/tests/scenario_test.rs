//! End-to-end scenarios over a single engine instance.
//!
//! Register -> search -> backlinks -> delete, and the stability of the
//! persisted index across repeated indexing.

use pretty_assertions::assert_eq;

use crossref_engine::ReindexOutcome;
use crossref_graph::{Backlink, Direction, MentionKind, TraverseOptions};
use crossref_storage::{BlobKey, Storage};
use crossref_types::DocumentId;

use e2e_tests::{document, node, register_indexed, search_titles, search_uids, uid, TestHarness};

fn blobs(storage: &Storage, doc: &DocumentId) -> (Vec<u8>, Vec<u8>) {
    (
        storage.get_blob(&BlobKey::Index(doc.clone())).unwrap().unwrap(),
        storage.get_blob(&BlobKey::Graph(doc.clone())).unwrap().unwrap(),
    )
}

#[tokio::test]
async fn test_register_search_backlinks_delete() {
    let harness = TestHarness::new();
    let engine = harness.engine("instance-a").await;

    let a = document(
        "Document A",
        "/a.json",
        vec![
            node("GALPHA", "Alpha", "Start here, then [[Beta]] for the details"),
            node("GBETA", "Beta", "The second step of the rollout"),
            node("GGAMMA", "Gamma", "Unrelated vendor notes"),
        ],
    );
    let doc = register_indexed(&engine, &a).await;
    let alpha = uid(&doc, "GALPHA");
    let beta = uid(&doc, "GBETA");
    let gamma = uid(&doc, "GGAMMA");

    // Beta ranks first; Gamma never matches
    let hits = search_uids(&engine, "Beta").await;
    assert_eq!(hits.first(), Some(&beta));
    assert!(!hits.contains(&gamma));

    let backlinks = engine.get_backlinks(&beta).await;
    assert_eq!(backlinks.len(), 1);
    match &backlinks[0] {
        Backlink::Mention {
            source,
            kind,
            excerpt,
        } => {
            assert_eq!(source, &alpha);
            assert_eq!(*kind, MentionKind::Soft);
            assert!(excerpt.contains("Beta"), "excerpt: {excerpt}");
        }
        other => panic!("Expected a mention, got {other:?}"),
    }

    // Delete Beta
    let without_beta = document(
        "Document A",
        "/a.json",
        vec![
            node("GALPHA", "Alpha", "Start here, then [[Beta]] for the details"),
            node("GGAMMA", "Gamma", "Unrelated vendor notes"),
        ],
    )
    .with_id(doc.as_str());
    register_indexed(&engine, &without_beta).await;

    assert!(engine.get_backlinks(&beta).await.is_empty());
    let outgoing = engine
        .traverse(
            &alpha,
            &TraverseOptions::default().with_direction(Direction::Outgoing),
        )
        .await;
    assert!(outgoing.is_empty(), "Alpha still links to {outgoing:?}");
    assert!(!search_uids(&engine, "Beta").await.contains(&beta));

    // The link text survives as an orphan
    let unresolved = engine.unresolved_links(&doc).await;
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].source, alpha);
    assert!(engine.dangling_references().await.is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_reindexing_unchanged_document_is_byte_identical() {
    let harness = TestHarness::new();
    let engine = harness.engine("instance-a").await;

    let plan = document(
        "Plan",
        "/plan.json",
        vec![
            node("G1", "Kickoff", "Agenda for [[Budget]]"),
            node("G2", "Budget", "Numbers"),
            node("G3", "Retro", "See [[Kickoff]] and [[Budget]]"),
        ],
    );
    let doc = register_indexed(&engine, &plan).await;
    let first = blobs(&harness.storage, &doc);

    let outcome = engine.reindex_document(&doc).await.unwrap();
    assert!(matches!(outcome, ReindexOutcome::Indexed(_)));
    let second = blobs(&harness.storage, &doc);
    assert_eq!(first, second);

    let outcome = engine.reindex_document(&doc).await.unwrap();
    let delta = outcome.delta().unwrap();
    assert!(delta.added.is_empty());
    assert!(delta.updated.is_empty());
    assert_eq!(delta.unchanged, 3);
    assert_eq!(blobs(&harness.storage, &doc), first);

    engine.rebuild().await.unwrap();
    assert_eq!(blobs(&harness.storage, &doc), first);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_separate_stores_agree_on_the_same_document() {
    let plan = document(
        "Plan",
        "/plan.json",
        vec![
            node("G1", "Kickoff", "Agenda for [[Budget]]"),
            node("G2", "Budget", "Numbers"),
        ],
    )
    .with_id("PLAN");

    let mut encoded = Vec::new();
    for _ in 0..2 {
        let harness = TestHarness::new();
        let engine = harness.engine("instance-a").await;
        let doc = register_indexed(&engine, &plan).await;
        encoded.push(blobs(&harness.storage, &doc));
        engine.shutdown().await;
    }
    assert_eq!(encoded[0], encoded[1]);
}

#[tokio::test]
async fn test_index_survives_restart() {
    let harness = TestHarness::new();
    let engine = harness.engine("instance-a").await;
    let plan = document(
        "Plan",
        "/plan.json",
        vec![
            node("G1", "Kickoff", "Agenda for [[Budget]]"),
            node("G2", "Budget", "Numbers"),
        ],
    );
    let doc = register_indexed(&engine, &plan).await;
    engine.shutdown().await;

    let reopened = harness.engine("instance-a").await;
    assert_eq!(search_titles(&reopened, "budget").await, vec!["Budget", "Kickoff"]);
    assert_eq!(reopened.get_backlinks(&uid(&doc, "G2")).await.len(), 1);
    reopened.shutdown().await;
}
