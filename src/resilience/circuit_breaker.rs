//! Circuit breaker guarding calls to HikCentral.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: downstream assumed down, calls fail fast
//! - Half-Open: probing whether downstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: now - last_failure_time >= recovery_timeout
//! Half-Open → Closed: trial call succeeds (failure count reset)
//! Half-Open → Open: trial call fails (no threshold needed)
//! ```
//!
//! # Design Decisions
//! - State lives in a shared `StateStore`; several bridge instances may share one
//! - The failure counter uses the store's atomic increment
//! - Transitions are compare-and-swap, so racing callers apply each one once
//! - Half-Open admits every concurrent caller as a trial call
//! - Store failures degrade to always-allow; the breaker never blocks on itself

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::clock::{Clock, SystemClock};
use crate::resilience::store::{MemoryStore, StateStore, StoreError};

pub const STATE_KEY: &str = "circuit_breaker:state";
pub const FAILURE_COUNT_KEY: &str = "circuit_breaker:failure_count";
pub const LAST_FAILURE_TIME_KEY: &str = "circuit_breaker:last_failure_time";

/// Breaker state as persisted in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CLOSED" => Some(CircuitState::Closed),
            "OPEN" => Some(CircuitState::Open),
            "HALF_OPEN" => Some(CircuitState::HalfOpen),
            _ => None,
        }
    }

    /// Gauge encoding: 0 = closed, 1 = half-open, 2 = open.
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The breaker refused a call without attempting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit breaker is OPEN, downstream calls suspended")]
pub struct CircuitOpenError {
    /// Seconds callers should wait before trying again.
    pub retry_after_secs: u64,
}

/// Outcome of a guarded call that did not succeed.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// Rejected by the breaker; the operation never ran.
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    /// The operation ran and failed; the original error, untouched.
    #[error(transparent)]
    Failed(E),
}

/// Point-in-time view of the shared circuit state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u64,
    pub last_failure_time: Option<u64>,
    pub failure_threshold: u64,
    pub recovery_timeout_secs: u64,
    pub store: &'static str,
    /// True when the store could not be read and defaults are reported.
    pub degraded: bool,
}

/// Shared-state circuit breaker.
pub struct CircuitBreaker {
    failure_threshold: u64,
    recovery_timeout_secs: u64,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a breaker over a shared store.
    pub fn new(config: &CircuitBreakerConfig, store: Arc<dyn StateStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create a breaker over a process-local store.
    pub fn in_memory(config: &CircuitBreakerConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// Create a breaker with an explicit time source.
    pub fn with_clock(
        config: &CircuitBreakerConfig,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout_secs: config.recovery_timeout_secs,
            store,
            clock,
        }
    }

    pub fn failure_threshold(&self) -> u64 {
        self.failure_threshold
    }

    pub fn recovery_timeout_secs(&self) -> u64 {
        self.recovery_timeout_secs
    }

    /// Label of the backing store, `memory` or `redis`.
    pub fn store_kind(&self) -> &'static str {
        self.store.kind()
    }

    /// Run `operation` under breaker protection.
    ///
    /// A rejected call never invokes `operation`. A failed call is recorded
    /// and its error is returned unchanged inside [`CallError::Failed`].
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(operation, |_| true).await
    }

    /// Like [`call`](Self::call), but an error only counts against the
    /// circuit when `is_failure` holds for it. Other errors are returned
    /// without recording any outcome.
    pub async fn call_with<F, Fut, T, E, P>(
        &self,
        operation: F,
        is_failure: P,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        if !self.should_allow_request().await {
            metrics::record_circuit_rejection();
            warn!(
                recovery_timeout_secs = self.recovery_timeout_secs,
                "Circuit breaker OPEN, rejecting downstream call"
            );
            return Err(CallError::Open(CircuitOpenError {
                retry_after_secs: self.recovery_timeout_secs,
            }));
        }

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                if is_failure(&e) {
                    self.record_failure().await;
                } else {
                    debug!("Call failed locally, not counted against the circuit");
                }
                Err(CallError::Failed(e))
            }
        }
    }

    /// Decide whether the next call may proceed, moving Open → Half-Open
    /// once the recovery timeout has elapsed.
    pub async fn should_allow_request(&self) -> bool {
        match self.try_allow_request().await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(error = %e, "Circuit state unavailable, allowing request");
                true
            }
        }
    }

    /// Record a successful call.
    pub async fn record_success(&self) {
        if let Err(e) = self.try_record_success().await {
            warn!(error = %e, "Failed to record success in circuit state store");
        }
    }

    /// Record a failed call.
    pub async fn record_failure(&self) {
        if let Err(e) = self.try_record_failure().await {
            warn!(error = %e, "Failed to record failure in circuit state store");
        }
    }

    /// Current state as stored.
    pub async fn state(&self) -> Result<CircuitState, StoreError> {
        let raw = self.store.get(STATE_KEY).await?;
        match raw.as_deref() {
            None => Ok(CircuitState::Closed),
            Some(value) => match CircuitState::parse(value) {
                Some(state) => Ok(state),
                None => {
                    // Transitions only swap from known values; reset so CLOSED -> OPEN still applies.
                    warn!(value, "Unknown circuit state in store, resetting to CLOSED");
                    self.store
                        .compare_and_swap(STATE_KEY, Some(value), CircuitState::Closed.as_str())
                        .await?;
                    Ok(CircuitState::Closed)
                }
            },
        }
    }

    /// Consecutive failures counted while closed.
    pub async fn failure_count(&self) -> Result<u64, StoreError> {
        self.read_u64(FAILURE_COUNT_KEY).await.map(|v| v.unwrap_or(0))
    }

    /// Epoch seconds of the last recorded failure.
    pub async fn last_failure_time(&self) -> Result<Option<u64>, StoreError> {
        self.read_u64(LAST_FAILURE_TIME_KEY).await
    }

    /// Snapshot for health and admin reporting.
    pub async fn snapshot(&self) -> CircuitSnapshot {
        let read = async {
            let state = self.state().await?;
            let failure_count = self.failure_count().await?;
            let last_failure_time = self.last_failure_time().await?;
            Ok::<_, StoreError>((state, failure_count, last_failure_time))
        };

        let (state, failure_count, last_failure_time, degraded) = match read.await {
            Ok((state, count, last)) => (state, count, last, false),
            Err(e) => {
                warn!(error = %e, "Circuit state unavailable for snapshot");
                (CircuitState::Closed, 0, None, true)
            }
        };

        CircuitSnapshot {
            state,
            failure_count,
            last_failure_time,
            failure_threshold: self.failure_threshold,
            recovery_timeout_secs: self.recovery_timeout_secs,
            store: self.store.kind(),
            degraded,
        }
    }

    async fn try_allow_request(&self) -> Result<bool, StoreError> {
        match self.state().await? {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(true),
            CircuitState::Open => {
                let now = self.clock.now_secs();
                let recovered = match self.last_failure_time().await? {
                    Some(last) => now.saturating_sub(last) >= self.recovery_timeout_secs,
                    None => true,
                };
                if !recovered {
                    return Ok(false);
                }
                if self.transition(CircuitState::Open, CircuitState::HalfOpen).await? {
                    info!("Circuit breaker transitioning to HALF_OPEN");
                }
                Ok(true)
            }
        }
    }

    async fn try_record_success(&self) -> Result<(), StoreError> {
        match self.state().await? {
            CircuitState::HalfOpen => {
                self.reset_failures().await?;
                if self.transition(CircuitState::HalfOpen, CircuitState::Closed).await? {
                    info!("Circuit breaker CLOSED after successful trial call");
                }
            }
            CircuitState::Closed => self.reset_failures().await?,
            CircuitState::Open => {
                debug!("Success recorded while OPEN, ignoring");
            }
        }
        Ok(())
    }

    async fn try_record_failure(&self) -> Result<(), StoreError> {
        match self.state().await? {
            CircuitState::HalfOpen => {
                self.mark_failure_time().await?;
                if self.transition(CircuitState::HalfOpen, CircuitState::Open).await? {
                    warn!("Circuit breaker reopened after failed trial call");
                }
            }
            CircuitState::Closed => {
                let count = self.store.increment(FAILURE_COUNT_KEY).await?;
                self.mark_failure_time().await?;
                if count >= self.failure_threshold as i64
                    && self.transition(CircuitState::Closed, CircuitState::Open).await?
                {
                    error!(failures = count, "Circuit breaker OPEN after consecutive failures");
                }
            }
            CircuitState::Open => {
                debug!("Failure recorded while OPEN, ignoring");
            }
        }
        Ok(())
    }

    async fn transition(&self, from: CircuitState, to: CircuitState) -> Result<bool, StoreError> {
        let mut swapped = self
            .store
            .compare_and_swap(STATE_KEY, Some(from.as_str()), to.as_str())
            .await?;
        // A missing state key reads as CLOSED.
        if !swapped && from == CircuitState::Closed {
            swapped = self.store.compare_and_swap(STATE_KEY, None, to.as_str()).await?;
        }
        if swapped {
            metrics::record_circuit_state(to);
        }
        Ok(swapped)
    }

    async fn reset_failures(&self) -> Result<(), StoreError> {
        self.store.delete(FAILURE_COUNT_KEY).await?;
        self.store.delete(LAST_FAILURE_TIME_KEY).await
    }

    async fn mark_failure_time(&self) -> Result<(), StoreError> {
        let now = self.clock.now_secs().to_string();
        self.store.set(LAST_FAILURE_TIME_KEY, &now).await
    }

    async fn read_u64(&self, key: &str) -> Result<Option<u64>, StoreError> {
        match self.store.get(key).await? {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| StoreError::NotAnInteger {
                    key: key.to_string(),
                    value,
                }),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout_secs", &self.recovery_timeout_secs)
            .field("store", &self.store.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::clock::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const START: u64 = 1_700_000_000;

    fn config(threshold: u64, recovery: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout_secs: recovery,
            redis_url: None,
        }
    }

    fn breaker(threshold: u64, recovery: u64) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let breaker = CircuitBreaker::with_clock(
            &config(threshold, recovery),
            Arc::new(MemoryStore::new()),
            clock.clone(),
        );
        (breaker, clock)
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CallError<&'static str>> {
        breaker.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, CallError<&'static str>> {
        breaker.call(|| async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let (breaker, _) = breaker(3, 60);
        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.last_failure_time, None);
        assert!(!snapshot.degraded);
    }

    #[tokio::test]
    async fn test_success_returns_value_unchanged() {
        let (breaker, _) = breaker(3, 60);
        let result = breaker
            .call(|| async { Ok::<_, String>(vec![1, 2, 3]) })
            .await
            .unwrap();
        assert_eq!(result, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failure_error_propagated() {
        let (breaker, _) = breaker(3, 60);
        match fail(&breaker).await {
            Err(CallError::Failed(e)) => assert_eq!(e, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(breaker.failure_count().await.unwrap(), 1);
        assert_eq!(breaker.last_failure_time().await.unwrap(), Some(START));
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let (breaker, _) = breaker(3, 60);
        for _ in 0..2 {
            assert!(matches!(fail(&breaker).await, Err(CallError::Failed(_))));
            assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
        }
        assert!(matches!(fail(&breaker).await, Err(CallError::Failed(_))));
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);

        let invoked = AtomicUsize::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>(())
            })
            .await;
        match result {
            Err(CallError::Open(e)) => assert_eq!(e.retry_after_secs, 60),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_after_recovery_timeout() {
        let (breaker, clock) = breaker(2, 30);
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);

        clock.advance(29);
        assert!(matches!(succeed(&breaker).await, Err(CallError::Open(_))));

        clock.advance(1);
        assert!(breaker.should_allow_request().await);
        assert_eq!(breaker.state().await.unwrap(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_trial_call_invoked_after_recovery_timeout() {
        let (breaker, clock) = breaker(1, 10);
        fail(&breaker).await.unwrap_err();
        clock.advance(10);

        let invoked = AtomicUsize::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>("trial")
            })
            .await;
        assert_eq!(result.unwrap(), "trial");
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_half_open_success_closes_and_resets() {
        let (breaker, clock) = breaker(2, 10);
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        clock.advance(10);

        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
        assert_eq!(breaker.failure_count().await.unwrap(), 0);
        assert_eq!(breaker.last_failure_time().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_immediately() {
        let (breaker, clock) = breaker(5, 10);
        for _ in 0..5 {
            fail(&breaker).await.unwrap_err();
        }
        clock.advance(15);
        assert!(breaker.should_allow_request().await);
        assert_eq!(breaker.state().await.unwrap(), CircuitState::HalfOpen);

        assert!(matches!(fail(&breaker).await, Err(CallError::Failed(_))));
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);
        assert_eq!(breaker.last_failure_time().await.unwrap(), Some(START + 15));

        // The cooldown restarts from the failed trial call.
        assert!(matches!(succeed(&breaker).await, Err(CallError::Open(_))));
    }

    #[tokio::test]
    async fn test_half_open_allows_concurrent_trial_calls() {
        let (breaker, clock) = breaker(1, 5);
        fail(&breaker).await.unwrap_err();
        clock.advance(5);

        assert!(breaker.should_allow_request().await);
        assert!(breaker.should_allow_request().await);
        assert_eq!(breaker.state().await.unwrap(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_success_while_closed_resets_counter() {
        let (breaker, _) = breaker(3, 60);
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.failure_count().await.unwrap(), 2);

        for _ in 0..3 {
            succeed(&breaker).await.unwrap();
            assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
            assert_eq!(breaker.failure_count().await.unwrap(), 0);
        }

        // Non-consecutive failures never reach the threshold.
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_without_failure_time_admits_trial_call() {
        let store = Arc::new(MemoryStore::new());
        store.set(STATE_KEY, "OPEN").await.unwrap();
        let breaker = CircuitBreaker::new(&config(3, 60), store);

        assert!(breaker.should_allow_request().await);
        assert_eq!(breaker.state().await.unwrap(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_state_shared_through_store() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(START));
        let a = CircuitBreaker::with_clock(&config(2, 60), store.clone(), clock.clone());
        let b = CircuitBreaker::with_clock(&config(2, 60), store, clock);

        fail(&a).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert!(matches!(succeed(&a).await, Err(CallError::Open(_))));
        assert!(matches!(succeed(&b).await, Err(CallError::Open(_))));
    }

    #[derive(Debug)]
    struct UnavailableStore;

    #[async_trait]
    impl StateStore for UnavailableStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn increment(&self, _key: &str) -> Result<i64, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn compare_and_swap(
            &self,
            _key: &str,
            _expected: Option<&str>,
            _new: &str,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn kind(&self) -> &'static str {
            "unavailable"
        }
    }

    #[tokio::test]
    async fn test_degraded_store_allows_everything() {
        let breaker = CircuitBreaker::new(&config(1, 60), Arc::new(UnavailableStore));

        for _ in 0..5 {
            assert!(matches!(fail(&breaker).await, Err(CallError::Failed(_))));
        }
        assert_eq!(succeed(&breaker).await.unwrap(), 7);

        let snapshot = breaker.snapshot().await;
        assert!(snapshot.degraded);
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.store, "unavailable");
    }

    #[tokio::test]
    async fn test_uncounted_errors_leave_circuit_closed() {
        let (breaker, _) = breaker(2, 60);
        for _ in 0..5 {
            let result = breaker
                .call_with(|| async { Err::<(), _>("local") }, |e| *e != "local")
                .await;
            assert!(matches!(result, Err(CallError::Failed("local"))));
        }
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
        assert_eq!(breaker.failure_count().await.unwrap(), 0);

        for _ in 0..2 {
            breaker
                .call_with(|| async { Err::<(), _>("remote") }, |e| *e != "local")
                .await
                .unwrap_err();
        }
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_unknown_stored_state_is_reset_and_can_open() {
        let store = Arc::new(MemoryStore::new());
        store.set(STATE_KEY, "BROKEN").await.unwrap();
        let breaker = CircuitBreaker::new(&config(2, 60), store.clone());

        assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
        assert_eq!(store.get(STATE_KEY).await.unwrap().as_deref(), Some("CLOSED"));

        store.set(STATE_KEY, "BROKEN").await.unwrap();
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);
        assert!(matches!(succeed(&breaker).await, Err(CallError::Open(_))));
    }

    #[test]
    fn test_state_round_trip() {
        for state in [CircuitState::Closed, CircuitState::Open, CircuitState::HalfOpen] {
            assert_eq!(CircuitState::parse(state.as_str()), Some(state));
        }
        assert_eq!(CircuitState::parse("closed"), None);
    }
}
