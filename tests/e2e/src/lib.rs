//! End-to-end test harness: a mock LLM HTTP server speaking the
//! local-inference wire protocol, plus store/pipeline helpers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use memento_core::{EnrichmentStatus, Memory, NewMemory, SqliteStore};

// ============================================================================
// MOCK LLM SERVER
// ============================================================================

#[derive(Clone)]
struct MockState {
    failing: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
    requests: Arc<AtomicU64>,
}

impl MockState {
    async fn simulate(&self) -> Result<(), StatusCode> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
        Ok(())
    }
}

/// A mock inference server on a random local port.
///
/// Flip `failing` to make every endpoint return 500 (the breaker-trip
/// scenario) or raise `latency_ms` to slow the workers down.
pub struct MockLlmServer {
    pub url: String,
    pub failing: Arc<AtomicBool>,
    pub latency_ms: Arc<AtomicU64>,
    pub requests: Arc<AtomicU64>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockLlmServer {
    pub async fn start() -> Self {
        let failing = Arc::new(AtomicBool::new(false));
        let latency_ms = Arc::new(AtomicU64::new(0));
        let requests = Arc::new(AtomicU64::new(0));
        let state = MockState {
            failing: Arc::clone(&failing),
            latency_ms: Arc::clone(&latency_ms),
            requests: Arc::clone(&requests),
        };

        let app = Router::new()
            .route("/api/generate", post(generate))
            .route("/api/embed", post(embed))
            .route("/api/tags", get(tags))
            .route("/api/version", get(version))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock llm server");
        let addr = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{}", addr),
            failing,
            latency_ms,
            requests,
            handle,
        }
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockLlmServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn generate(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    state.simulate().await?;
    let prompt = body["prompt"].as_str().unwrap_or_default();
    let response = if prompt.contains("relationships between") {
        r#"[{"source": "Rust", "target": "Tokio", "type": "uses", "context": "async runtime", "confidence": 0.85}]"#
    } else if prompt.contains("Summarize the memories") {
        r#"{"summary": "One merged note.", "keywords": ["merged"], "confidence": 0.9}"#
    } else {
        r#"[
            {"name": "Rust", "type": "technology", "description": "systems language", "confidence": 0.95},
            {"name": "Tokio", "type": "technology", "description": "async runtime", "confidence": 0.9},
            {"name": "quasar", "type": "celestial_object", "confidence": 0.9}
        ]"#
    };
    Ok(Json(json!({ "response": response, "done": true })))
}

async fn embed(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    state.simulate().await?;
    // A cheap deterministic vector so distinct texts embed differently.
    let input = body["input"].as_str().unwrap_or_default();
    let mut acc: [f32; 4] = [0.0; 4];
    for (i, b) in input.bytes().enumerate() {
        acc[i % 4] += (b as f32) / 255.0;
    }
    Ok(Json(json!({ "embeddings": [acc.to_vec()] })))
}

async fn tags(State(state): State<MockState>) -> Json<Value> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "models": [{ "name": "mock-model" }, { "name": "mock-embed" }] }))
}

async fn version(State(state): State<MockState>) -> Result<Json<Value>, StatusCode> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if state.failing.load(Ordering::SeqCst) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(json!({ "version": "0.0.0-mock" })))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Input for a plain test memory.
pub fn test_memory(content: &str) -> NewMemory {
    NewMemory {
        content: content.to_string(),
        source: "manual".to_string(),
        domain: "e2e".to_string(),
        ..Default::default()
    }
}

/// Poll until the memory reaches the status or the timeout fires.
pub async fn wait_for_status(
    store: &SqliteStore,
    id: &str,
    status: EnrichmentStatus,
    timeout: Duration,
) -> Memory {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let memory = store
            .get_any(id)
            .expect("store readable")
            .expect("memory exists");
        if memory.status == status {
            return memory;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {:?}; memory is {:?} ({:?})",
            status,
            memory.status,
            memory.enrichment_error,
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
