//! Ingest-to-enriched journeys against the mock inference server.

use std::sync::Arc;
use std::time::Duration;

use memento_core::llm::{HttpLlmClient, LlmConfig};
use memento_core::{EnrichmentStatus, Memory, Pipeline, PipelineConfig, SqliteStore, StageStatus};
use memento_e2e_tests::{test_memory, wait_for_status, MockLlmServer};
use tempfile::TempDir;

async fn setup(config: PipelineConfig) -> (Arc<Pipeline>, Arc<SqliteStore>, MockLlmServer, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(Some(dir.path().join("e2e.db"))).unwrap());
    let server = MockLlmServer::start().await;
    let llm = Arc::new(HttpLlmClient::new(LlmConfig {
        base_url: server.url.clone(),
        ..Default::default()
    }));
    let pipeline = Arc::new(Pipeline::new(Arc::clone(&store), llm, config));
    (pipeline, store, server, dir)
}

#[tokio::test(flavor = "multi_thread")]
async fn ingest_returns_within_budget() {
    let (pipeline, _store, _server, _dir) = setup(PipelineConfig::default()).await;
    pipeline.start().await.unwrap();

    let started = std::time::Instant::now();
    let memory = pipeline.ingest(test_memory("Test memory content")).unwrap();
    let elapsed = started.elapsed();

    assert_eq!(memory.status, EnrichmentStatus::Pending);
    assert!(!memory.id.is_empty());
    assert!(elapsed < Duration::from_millis(10), "ingest took {:?}", elapsed);

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn full_enrichment_builds_the_graph() {
    let (pipeline, store, _server, _dir) = setup(PipelineConfig::default()).await;
    pipeline.start().await.unwrap();

    let memory = pipeline
        .ingest(test_memory("Rust services lean on Tokio for async IO."))
        .unwrap();
    let enriched = wait_for_status(
        &store,
        &memory.id,
        EnrichmentStatus::Enriched,
        Duration::from_secs(10),
    )
    .await;

    assert_eq!(enriched.entity_status, StageStatus::Completed);
    assert_eq!(enriched.relationship_status, StageStatus::Completed);
    assert_eq!(enriched.embedding_status, StageStatus::Completed);

    // Entities: the allow-listed two survive, the "celestial_object" item
    // was dropped and recorded.
    let entities = store.get_memory_entities(&memory.id).unwrap();
    let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"Rust"));
    assert!(names.contains(&"Tokio"));
    assert_eq!(entities.len(), 2);

    // The embedding is stored in the packed f64 format.
    let embedding = store.get_embedding(&memory.id).unwrap().unwrap();
    assert_eq!(embedding.dimension, 4);
    assert_eq!(embedding.to_bytes().len(), 4 * 8);

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn crash_recovery_enriches_preexisting_rows() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(Some(dir.path().join("e2e.db"))).unwrap());

    // Five rows from a "previous run", one stuck in processing.
    let mut ids = Vec::new();
    for i in 0..5 {
        let mut memory = Memory::build(test_memory(&format!("leftover memory {}", i)));
        if i == 2 {
            memory.status = EnrichmentStatus::Processing;
        }
        store.store(&memory).unwrap();
        ids.push(memory.id);
    }

    let server = MockLlmServer::start().await;
    let llm = Arc::new(HttpLlmClient::new(LlmConfig {
        base_url: server.url.clone(),
        ..Default::default()
    }));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        llm,
        PipelineConfig::default(),
    ));
    pipeline.start().await.unwrap();

    for id in &ids {
        wait_for_status(&store, id, EnrichmentStatus::Enriched, Duration::from_secs(5)).await;
    }

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_overflow_fails_fast() {
    let (pipeline, store, server, _dir) = setup(PipelineConfig {
        num_workers: 1,
        queue_size: 2,
        ..Default::default()
    })
    .await;
    // Slow the single worker down so the queue backs up.
    server
        .latency_ms
        .store(300, std::sync::atomic::Ordering::SeqCst);
    pipeline.start().await.unwrap();

    let mut overflowed = None;
    for i in 0..20 {
        if let Err(err) = pipeline.ingest(test_memory(&format!("burst memory {}", i))) {
            assert!(err.to_string().contains("queue full"));
            overflowed = Some(memento_core::memory_id("e2e", &format!("burst memory {}", i)));
            break;
        }
    }
    let overflowed = overflowed.expect("expected a queue-full error");
    let failed = store.get_any(&overflowed).unwrap().unwrap();
    assert_eq!(failed.status, EnrichmentStatus::Failed);

    pipeline.shutdown().await;
}
