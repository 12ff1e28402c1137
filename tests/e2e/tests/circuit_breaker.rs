//! Circuit breaker behavior against a real (mock) HTTP downstream.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use memento_core::llm::{BreakerConfig, CircuitBreaker, HttpLlmClient, LlmClient, LlmConfig};
use memento_core::ErrorKind;
use memento_e2e_tests::MockLlmServer;

fn breaker_over(server: &MockLlmServer, reset_timeout: Duration) -> CircuitBreaker {
    let client = Arc::new(HttpLlmClient::new(LlmConfig {
        base_url: server.url.clone(),
        ..Default::default()
    }));
    CircuitBreaker::new(client, BreakerConfig {
        reset_timeout,
        ..Default::default()
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn three_failures_open_the_circuit() {
    let server = MockLlmServer::start().await;
    server.failing.store(true, Ordering::SeqCst);
    let breaker = breaker_over(&server, Duration::from_secs(120));
    let deadline = Duration::from_secs(2);

    // Three sequential calls hit the wire and fail with transport errors.
    for _ in 0..3 {
        let err = breaker.complete("hello", deadline).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
    let wire_calls = server.request_count();
    assert_eq!(wire_calls, 3);

    // The fourth fails immediately with circuit-open: no network traffic.
    let started = Instant::now();
    let err = breaker.complete("hello", deadline).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(server.request_count(), wire_calls);
}

#[tokio::test(flavor = "multi_thread")]
async fn breaker_recovers_through_half_open() {
    let server = MockLlmServer::start().await;
    server.failing.store(true, Ordering::SeqCst);
    let breaker = breaker_over(&server, Duration::from_millis(100));
    let deadline = Duration::from_secs(2);

    for _ in 0..3 {
        let _ = breaker.complete("x", deadline).await;
    }
    assert_eq!(
        breaker.complete("x", deadline).await.unwrap_err().kind(),
        ErrorKind::CircuitOpen
    );

    // Downstream heals; after the reset timeout two successes close the
    // circuit.
    server.failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;

    breaker.complete("probe one", deadline).await.unwrap();
    breaker.complete("probe two", deadline).await.unwrap();

    let metrics = breaker.metrics();
    assert_eq!(metrics.total_successes, 2);

    // Closed again: calls flow normally.
    breaker.complete("steady state", deadline).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn embed_and_models_share_the_breaker() {
    let server = MockLlmServer::start().await;
    let breaker = breaker_over(&server, Duration::from_secs(60));
    let deadline = Duration::from_secs(2);

    let vector = breaker.embed("some text", deadline).await.unwrap();
    assert_eq!(vector.len(), 4);

    let models = breaker.list_models(deadline).await.unwrap();
    assert!(models.contains(&"mock-model".to_string()));

    breaker.health_check(deadline).await.unwrap();
    assert_eq!(breaker.metrics().total_successes, 3);
}
