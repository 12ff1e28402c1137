//! Circuit breaker for the LLM client.
//!
//! Three states:
//! - **Closed**: calls pass through; 3 consecutive failures trip to Open.
//! - **Open**: calls fail immediately with `circuit-open` (no network
//!   traffic); after `reset_timeout` the breaker probes via Half-Open.
//! - **Half-Open**: calls pass through; 2 consecutive successes close the
//!   circuit, any failure re-opens it.
//!
//! Deadline and cancellation errors propagate unchanged and do not count as
//! breaker failures.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{Error, ErrorKind, Result};

use super::client::LlmClient;

/// Breaker state names, exposed through [`BreakerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip Closed -> Open
    pub failure_threshold: u32,
    /// Consecutive successes that close from Half-Open
    pub success_threshold: u32,
    /// Time spent Open before probing
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerMetrics {
    pub state: BreakerState,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
}

/// [`LlmClient`] wrapper that fails fast while the downstream is unhealthy.
pub struct CircuitBreaker {
    client: Arc<dyn LlmClient>,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(client: Arc<dyn LlmClient>, config: BreakerConfig) -> Self {
        Self {
            client,
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                total_requests: 0,
                total_successes: 0,
                total_failures: 0,
            }),
        }
    }

    /// Current counters and state.
    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        BreakerMetrics {
            state: inner.state,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            consecutive_failures: inner.consecutive_failures,
        }
    }

    /// Admission check. Fails fast while Open, transitions to Half-Open
    /// once the reset timeout has elapsed.
    fn before_call(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state == BreakerState::Open {
            let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed < self.config.reset_timeout {
                return Err(Error::CircuitOpen);
            }
            tracing::info!("circuit breaker probing (half-open)");
            inner.state = BreakerState::HalfOpen;
            inner.consecutive_successes = 0;
        }
        inner.total_requests += 1;
        Ok(())
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.total_successes += 1;
        inner.consecutive_failures = 0;
        if inner.state == BreakerState::HalfOpen {
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= self.config.success_threshold {
                tracing::info!("circuit breaker closed");
                inner.state = BreakerState::Closed;
                inner.opened_at = None;
            }
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.total_failures += 1;
        inner.consecutive_successes = 0;
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!("probe failed, circuit breaker re-opened");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {}
        }
    }

    fn record_outcome<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.record_success(),
            Err(err) => match err.kind() {
                // Caller-driven terminations say nothing about downstream
                // health.
                ErrorKind::DeadlineExceeded | ErrorKind::Cancelled => {}
                _ => self.record_failure(),
            },
        }
    }
}

#[async_trait]
impl LlmClient for CircuitBreaker {
    async fn complete(&self, prompt: &str, deadline: Duration) -> Result<String> {
        self.before_call()?;
        let result = self.client.complete(prompt, deadline).await;
        self.record_outcome(&result);
        result
    }

    async fn embed(&self, text: &str, deadline: Duration) -> Result<Vec<f32>> {
        self.before_call()?;
        let result = self.client.embed(text, deadline).await;
        self.record_outcome(&result);
        result
    }

    async fn health_check(&self, deadline: Duration) -> Result<()> {
        self.before_call()?;
        let result = self.client.health_check(deadline).await;
        self.record_outcome(&result);
        result
    }

    async fn list_models(&self, deadline: Duration) -> Result<Vec<String>> {
        self.before_call()?;
        let result = self.client.list_models(deadline).await;
        self.record_outcome(&result);
        result
    }

    fn embedding_model(&self) -> &str {
        self.client.embedding_model()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scriptable fake downstream.
    struct FlakyClient {
        calls: AtomicU32,
        fail_first: u32,
        error_kind: ErrorKind,
    }

    impl FlakyClient {
        fn failing(fail_first: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
                error_kind: ErrorKind::Transient,
            }
        }

        fn deadline_only() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first: u32::MAX,
                error_kind: ErrorKind::DeadlineExceeded,
            }
        }

        fn next(&self) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(match self.error_kind {
                    ErrorKind::DeadlineExceeded => {
                        Error::DeadlineExceeded(Duration::from_millis(1))
                    }
                    _ => Error::Transient("boom".to_string()),
                })
            } else {
                Ok("ok".to_string())
            }
        }
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn complete(&self, _prompt: &str, _deadline: Duration) -> Result<String> {
            self.next()
        }
        async fn embed(&self, _text: &str, _deadline: Duration) -> Result<Vec<f32>> {
            self.next().map(|_| vec![1.0])
        }
        async fn health_check(&self, _deadline: Duration) -> Result<()> {
            self.next().map(|_| ())
        }
        async fn list_models(&self, _deadline: Duration) -> Result<Vec<String>> {
            self.next().map(|_| vec![])
        }
        fn embedding_model(&self) -> &str {
            "fake"
        }
    }

    fn breaker(client: FlakyClient, reset_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            Arc::new(client),
            BreakerConfig {
                reset_timeout,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn trips_open_after_three_failures() {
        let breaker = breaker(FlakyClient::failing(u32::MAX), Duration::from_secs(60));
        let deadline = Duration::from_secs(1);

        for _ in 0..3 {
            let err = breaker.complete("x", deadline).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Transient);
        }
        assert_eq!(breaker.metrics().state, BreakerState::Open);

        // Fourth call fails fast without reaching the client.
        let start = Instant::now();
        let err = breaker.complete("x", deadline).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert!(start.elapsed() < Duration::from_millis(100));

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_failures, 3);
        // The fast-failed call is not a request against the downstream.
        assert_eq!(metrics.total_requests, 3);
    }

    #[tokio::test]
    async fn half_open_closes_after_two_successes() {
        let breaker = breaker(FlakyClient::failing(3), Duration::from_millis(20));
        let deadline = Duration::from_secs(1);

        for _ in 0..3 {
            let _ = breaker.complete("x", deadline).await;
        }
        assert_eq!(breaker.metrics().state, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;

        // First probe succeeds -> still half-open.
        breaker.complete("x", deadline).await.unwrap();
        assert_eq!(breaker.metrics().state, BreakerState::HalfOpen);

        // Second success closes.
        breaker.complete("x", deadline).await.unwrap();
        assert_eq!(breaker.metrics().state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = breaker(FlakyClient::failing(4), Duration::from_millis(20));
        let deadline = Duration::from_secs(1);

        for _ in 0..3 {
            let _ = breaker.complete("x", deadline).await;
        }
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Probe fails (4th scripted failure) -> straight back to Open.
        let _ = breaker.complete("x", deadline).await.unwrap_err();
        assert_eq!(breaker.metrics().state, BreakerState::Open);
        let err = breaker.complete("x", deadline).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    }

    #[tokio::test]
    async fn deadline_errors_do_not_count() {
        let breaker = breaker(FlakyClient::deadline_only(), Duration::from_secs(60));
        let deadline = Duration::from_secs(1);

        for _ in 0..10 {
            let err = breaker.complete("x", deadline).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        }
        let metrics = breaker.metrics();
        assert_eq!(metrics.state, BreakerState::Closed);
        assert_eq!(metrics.total_failures, 0);
        assert_eq!(metrics.total_requests, 10);
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let breaker = breaker(FlakyClient::failing(2), Duration::from_secs(60));
        let deadline = Duration::from_secs(1);

        let _ = breaker.complete("x", deadline).await;
        let _ = breaker.complete("x", deadline).await;
        breaker.complete("x", deadline).await.unwrap();
        assert_eq!(breaker.metrics().state, BreakerState::Closed);
        assert_eq!(breaker.metrics().consecutive_failures, 0);
    }
}
