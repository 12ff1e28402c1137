//! Hybrid search fallback and graph traversal journeys.

use std::sync::Arc;
use std::time::Duration;

use memento_core::llm::{HttpLlmClient, LlmConfig};
use memento_core::{
    traverse, EnrichmentStatus, GraphBounds, Pipeline, PipelineConfig, SearchEngine, SearchMode,
    SearchOptions, SqliteStore,
};
use memento_e2e_tests::{test_memory, wait_for_status, MockLlmServer};
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread")]
async fn hybrid_degrades_to_fts_without_embeddings() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(Some(dir.path().join("e2e.db"))).unwrap());

    // Two memories with no embeddings and no vector engine.
    for content in ["Go programming introduction", "Notes on Go programming"] {
        store
            .store(&memento_core::Memory::build(test_memory(content)))
            .unwrap();
    }
    let engine = SearchEngine::new(Arc::clone(&store), None);

    let results = engine
        .hybrid_search("Go programming", SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.mode, SearchMode::Fts);
    assert_eq!(results.items.len(), 2);
    // Ordered by full-text rank: scores descend.
    for pair in results.items.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn hybrid_fuses_when_vectors_exist() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(Some(dir.path().join("e2e.db"))).unwrap());
    let server = MockLlmServer::start().await;
    let llm = Arc::new(HttpLlmClient::new(LlmConfig {
        base_url: server.url.clone(),
        ..Default::default()
    }));

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        llm.clone(),
        PipelineConfig::default(),
    ));
    pipeline.start().await.unwrap();
    let memory = pipeline
        .ingest(test_memory("Hybrid search targets Rust and Tokio"))
        .unwrap();
    wait_for_status(&store, &memory.id, EnrichmentStatus::Enriched, Duration::from_secs(10)).await;

    let engine = SearchEngine::new(Arc::clone(&store), Some(llm));
    let results = engine
        .hybrid_search("Rust Tokio", SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.mode, SearchMode::Hybrid);
    assert_eq!(results.items[0].memory.id, memory.id);

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn traversal_respects_bounds_end_to_end() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(Some(dir.path().join("e2e.db"))).unwrap());

    // A hub entity shared by one start memory and 10 spokes, each spoke
    // entity fanning out through relationships.
    let start = memento_core::Memory::build(test_memory("start hub memory"));
    store.store(&start).unwrap();
    let hub = store
        .upsert_entity(
            "hub",
            memento_core::EntityType::Concept,
            "",
            &serde_json::Map::new(),
        )
        .unwrap();
    store.link_memory_entity(&start.id, &hub.id, 1.0).unwrap();

    for i in 0..10 {
        let spoke = memento_core::Memory::build(test_memory(&format!("spoke memory {}", i)));
        store.store(&spoke).unwrap();
        let entity = store
            .upsert_entity(
                &format!("spoke-{}", i),
                memento_core::EntityType::Concept,
                "",
                &serde_json::Map::new(),
            )
            .unwrap();
        store.link_memory_entity(&spoke.id, &entity.id, 1.0).unwrap();
        store.link_memory_entity(&spoke.id, &hub.id, 1.0).unwrap();
        store
            .upsert_relationship(
                &hub.id,
                &entity.id,
                memento_core::RelationshipType::RelatedTo,
                1.0,
                "",
            )
            .unwrap();
    }

    // Unbounded enough: all 10 spokes reachable.
    let result = traverse(&store, &start.id, GraphBounds::default(), 100).unwrap();
    assert_eq!(result.memories.len(), 10);
    assert!(result.bounds_reached.is_none());

    // MaxNodes=5 stops early with the marker and exactly 5 nodes.
    let result = traverse(
        &store,
        &start.id,
        GraphBounds {
            max_nodes: 5,
            ..Default::default()
        },
        100,
    )
    .unwrap();
    assert_eq!(result.memories.len(), 5);
    assert_eq!(result.bounds_reached, Some("max nodes"));

    // Isolated memory traverses to nothing, without error.
    let lonely = memento_core::Memory::build(test_memory("isolated memory"));
    store.store(&lonely).unwrap();
    let result = traverse(&store, &lonely.id, GraphBounds::default(), 10).unwrap();
    assert!(result.memories.is_empty());
    assert!(result.bounds_reached.is_none());
}
