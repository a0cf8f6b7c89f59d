//! End-to-end scenarios against a real Qdrant instance and a deterministic
//! fake embedding backend. Run with a Qdrant instance up and
//! `cargo test --test seed_scenarios -- --ignored`.

mod helpers;

use helpers::TestHarness;

#[tokio::test]
#[ignore = "requires a reachable Qdrant instance"]
async fn s1_indexes_entity_manager_and_finds_it_by_search() {
    let harness = TestHarness::from_fixture("entity_manager").await;

    let stats = harness.indexer.index(None, true).await.unwrap();
    assert_eq!(stats.files_processed, 1);
    assert!(stats.chunks_created >= 3);
    assert_eq!(stats.errors, 0);

    let results = harness
        .retrieval
        .search_code("entity lifecycle management", None, None)
        .await
        .unwrap();
    assert!(results.iter().any(|r| r.name == "EntityManager"));
}

#[tokio::test]
#[ignore = "requires a reachable Qdrant instance"]
async fn s2_second_index_run_skips_unchanged_files() {
    let harness = TestHarness::from_fixture("entity_manager").await;

    let first = harness.indexer.index(None, true).await.unwrap();
    assert_eq!(first.files_processed, 1);

    let second = harness.indexer.index(None, true).await.unwrap();
    assert_eq!(second.files_processed, 0);
    assert_eq!(second.files_skipped, 1);
}

#[tokio::test]
#[ignore = "requires a reachable Qdrant instance"]
async fn s6_empty_store_returns_empty_results() {
    let harness = TestHarness::from_fixture("entity_manager").await;

    let results = harness.retrieval.search_code("anything at all", None, None).await.unwrap();
    assert!(results.is_empty());

    let files = harness.retrieval.list_files(None, None).await.unwrap();
    assert!(files.is_empty());

    let stats = harness.indexer.stats().await.unwrap();
    assert_eq!(stats.total, 0);
}

#[tokio::test]
#[ignore = "requires a reachable Qdrant instance"]
async fn s3_reindex_file_replaces_stale_chunks() {
    let harness = TestHarness::from_fixture("entity_manager").await;
    harness.indexer.index(None, true).await.unwrap();

    let before = harness.retrieval.search_code("DestroyEntity", None, None).await.unwrap();
    assert!(before.iter().any(|r| r.name == "DestroyEntity"));

    let file = harness.indexer.discovery_config().root.join("EntityManager.cs");
    let original = std::fs::read_to_string(&file).unwrap();
    let rewritten = original.replace("DestroyEntity", "RemoveEntity");
    std::fs::write(&file, rewritten).unwrap();

    harness.indexer.reindex_file(&file).await.unwrap();

    let stale = harness.retrieval.search_code("DestroyEntity", None, None).await.unwrap();
    assert!(!stale.iter().any(|r| r.name == "DestroyEntity"));

    let fresh = harness.retrieval.search_code("RemoveEntity", None, None).await.unwrap();
    assert!(fresh.iter().any(|r| r.name == "RemoveEntity"));
}

#[tokio::test]
#[ignore = "requires a reachable Qdrant instance"]
async fn s5_explain_symbol_reports_definition_and_usage() {
    let harness = TestHarness::from_fixture("entity_manager").await;
    harness.indexer.index(None, true).await.unwrap();

    let explanation = harness.retrieval.explain_symbol("EntityManager.CreateEntity", true).await.unwrap();

    assert!(explanation.definition_location.is_some());
    let def = explanation.definition_location.unwrap();
    assert!(def.file.ends_with("EntityManager.cs"));
    assert!(explanation.usage_examples.len() <= 3);
    assert!(!explanation.explanation.is_empty());
}
