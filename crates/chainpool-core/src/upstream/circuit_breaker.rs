use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio::time::Instant;

use super::errors::UpstreamError;

/// Options shared by every provider's breaker. State is per provider; options are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Hard timeout applied to each call. A timeout counts as a failure.
    pub timeout_ms: u64,
    /// Failure percentage (0-100) at or above which the circuit opens.
    pub error_threshold_percentage: u8,
    /// Time spent `Open` before a half-open trial is allowed.
    pub reset_timeout_ms: u64,
    /// Minimum number of calls in the rolling window before the percentage is evaluated.
    pub volume_threshold: u32,
    /// Length of the rolling statistics window.
    pub rolling_window_ms: u64,
    /// Number of buckets the rolling window is divided into.
    pub rolling_window_buckets: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            error_threshold_percentage: 50,
            reset_timeout_ms: 30_000,
            volume_threshold: 5,
            rolling_window_ms: 10_000,
            rolling_window_buckets: 10,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Width of a single rolling-window bucket.
    #[must_use]
    pub fn bucket_duration(&self) -> Duration {
        Duration::from_millis(self.rolling_window_ms / u64::from(self.rolling_window_buckets.max(1)))
    }

    /// Checks the options for values that would make the state machine meaningless.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string for the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_ms == 0 {
            return Err("circuit breaker timeout_ms must be greater than 0".to_string());
        }
        if self.error_threshold_percentage > 100 {
            return Err("circuit breaker error_threshold_percentage must be within 0-100".to_string());
        }
        if self.rolling_window_buckets == 0 {
            return Err("circuit breaker rolling_window_buckets must be greater than 0".to_string());
        }
        if self.rolling_window_ms < u64::from(self.rolling_window_buckets) {
            return Err(format!(
                "circuit breaker rolling_window_ms ({}) must allow at least 1ms per bucket ({} buckets)",
                self.rolling_window_ms, self.rolling_window_buckets
            ));
        }
        Ok(())
    }
}

/// Externally visible breaker state.
///
/// - `Closed` -> `Open`: volume and failure percentage thresholds both reached in the window
/// - `Open` -> `HalfOpen`: reset timeout elapsed
/// - `HalfOpen` -> `Closed`: trial call succeeded
/// - `HalfOpen` -> `Open`: trial call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half-open",
            Self::Open => "open",
        }
    }

    /// Gauge encoding used by `rpc_circuit_breaker_state`.
    #[must_use]
    pub fn as_gauge_value(&self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }

    #[must_use]
    pub fn from_gauge_value(value: u8) -> Self {
        match value {
            0 => Self::Closed,
            1 => Self::HalfOpen,
            _ => Self::Open,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change reported to the breaker's listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Callback invoked synchronously on every state change, while the breaker's lock is held.
///
/// Transitions reach it in the order they happened. It must not call back into the breaker.
pub type StateChangeListener = Arc<dyn Fn(StateTransition) + Send + Sync>;

/// Success/failure totals over the live part of the rolling window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub successes: u32,
    pub failures: u32,
}

impl WindowCounts {
    #[must_use]
    pub fn total(&self) -> u32 {
        self.successes + self.failures
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    epoch: u64,
    successes: u32,
    failures: u32,
}

/// Ring of fixed-width buckets. A bucket is reused once its epoch falls out of the window.
#[derive(Debug)]
struct RollingWindow {
    buckets: Vec<Bucket>,
    bucket_duration: Duration,
    origin: Instant,
}

impl RollingWindow {
    fn new(config: &CircuitBreakerConfig, origin: Instant) -> Self {
        let len = config.rolling_window_buckets.max(1) as usize;
        let bucket_duration = config.bucket_duration().max(Duration::from_millis(1));
        Self { buckets: vec![Bucket::default(); len], bucket_duration, origin }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn epoch(&self, now: Instant) -> u64 {
        (now.saturating_duration_since(self.origin).as_nanos() / self.bucket_duration.as_nanos())
            as u64
    }

    fn record(&mut self, now: Instant, success: bool) {
        let epoch = self.epoch(now);
        let len = self.buckets.len() as u64;
        #[allow(clippy::cast_possible_truncation)]
        let slot = &mut self.buckets[(epoch % len) as usize];
        if slot.epoch != epoch {
            *slot = Bucket { epoch, ..Bucket::default() };
        }
        if success {
            slot.successes += 1;
        } else {
            slot.failures += 1;
        }
    }

    fn counts(&self, now: Instant) -> WindowCounts {
        let epoch = self.epoch(now);
        let len = self.buckets.len() as u64;
        self.buckets
            .iter()
            .filter(|b| b.epoch <= epoch && b.epoch + len > epoch)
            .fold(WindowCounts::default(), |acc, b| WindowCounts {
                successes: acc.successes + b.successes,
                failures: acc.failures + b.failures,
            })
    }

    fn clear(&mut self) {
        self.buckets.fill(Bucket::default());
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { trial_in_flight: bool },
}

impl Phase {
    fn state(self) -> CircuitState {
        match self {
            Self::Closed => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// All mutable breaker state, updated under one lock so transitions are atomic.
#[derive(Debug)]
struct Inner {
    phase: Phase,
    window: RollingWindow,
}

impl Inner {
    /// Moves `Open` to `HalfOpen` once the reset timeout has elapsed.
    fn advance(&mut self, now: Instant, reset_timeout: Duration) -> Option<StateTransition> {
        if let Phase::Open { opened_at } = self.phase {
            if now.saturating_duration_since(opened_at) >= reset_timeout {
                return self.set_phase(Phase::HalfOpen { trial_in_flight: false });
            }
        }
        None
    }

    fn set_phase(&mut self, phase: Phase) -> Option<StateTransition> {
        let from = self.phase.state();
        self.phase = phase;
        let to = phase.state();
        (from != to).then_some(StateTransition { from, to })
    }
}

/// Per-provider circuit breaker with a bucketed rolling window.
///
/// The circuit opens when, inside the rolling window, the call volume reaches
/// `volume_threshold` and the failure percentage reaches `error_threshold_percentage`.
/// After `reset_timeout_ms` exactly one trial call is let through; concurrent callers are
/// rejected while that trial is in flight.
///
/// # Thread Safety
///
/// State lives behind a `parking_lot::Mutex` that is never held across an `.await`, so
/// breakers for different providers never contend with each other and callers of the same
/// breaker only serialize for the bookkeeping itself.
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    listener: Option<StateChangeListener>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.inner.lock().phase.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        let window = RollingWindow::new(&config, Instant::now());
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner { phase: Phase::Closed, window }),
            listener: None,
        }
    }

    /// Registers the callback invoked on every state transition.
    #[must_use]
    pub fn with_listener(mut self, listener: StateChangeListener) -> Self {
        self.listener = Some(listener);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state, applying the `Open` -> `HalfOpen` transition if the reset
    /// timeout has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        let transition = inner.advance(Instant::now(), self.config.reset_timeout());
        self.notify(&inner, transition);
        inner.phase.state()
    }

    /// Returns the success/failure totals currently inside the rolling window.
    #[must_use]
    pub fn window_counts(&self) -> WindowCounts {
        self.inner.lock().window.counts(Instant::now())
    }

    /// Runs `op` through the breaker.
    ///
    /// `op` is not invoked when the circuit is open. Otherwise it runs under the configured
    /// timeout and its outcome feeds the rolling window.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::CircuitOpen`] if the call was rejected
    /// - [`UpstreamError::Timeout`] if `op` did not finish within `timeout_ms`
    /// - any error returned by `op`
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, UpstreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let permit = self.try_acquire()?;

        let result = match tokio::time::timeout(self.config.timeout(), op()).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout),
        };

        permit.complete(result.is_ok());
        result
    }

    /// Asks for permission to make one call.
    ///
    /// The returned permit must be completed with the call outcome. Dropping it without
    /// completing (a cancelled call) records nothing and frees the half-open trial slot.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::CircuitOpen`] if the circuit is open or a half-open trial is
    /// already in flight.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, UpstreamError> {
        let permit = {
            let mut inner = self.inner.lock();
            let transition = inner.advance(Instant::now(), self.config.reset_timeout());
            self.notify(&inner, transition);
            match inner.phase {
                Phase::Closed => Ok(CallPermit::new(self, false)),
                Phase::HalfOpen { trial_in_flight: false } => {
                    inner.phase = Phase::HalfOpen { trial_in_flight: true };
                    Ok(CallPermit::new(self, true))
                }
                Phase::HalfOpen { trial_in_flight: true } | Phase::Open { .. } => {
                    Err(UpstreamError::CircuitOpen)
                }
            }
        };

        if permit.is_err() {
            tracing::debug!(provider = %self.name, "circuit breaker rejected call");
        }
        permit
    }

    /// Forces the circuit open and restarts the reset timer.
    pub fn trip(&self) {
        tracing::warn!(provider = %self.name, "circuit breaker tripped manually");
        let mut inner = self.inner.lock();
        let transition = inner.set_phase(Phase::Open { opened_at: Instant::now() });
        self.notify(&inner, transition);
    }

    /// Forces the circuit closed and clears the rolling window.
    pub fn reset(&self) {
        tracing::info!(provider = %self.name, "circuit breaker reset manually");
        let mut inner = self.inner.lock();
        inner.window.clear();
        let transition = inner.set_phase(Phase::Closed);
        self.notify(&inner, transition);
    }

    fn on_result(&self, trial: bool, success: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.window.record(now, success);

        let transition = match inner.phase {
            Phase::HalfOpen { .. } if trial => {
                if success {
                    inner.window.clear();
                    inner.set_phase(Phase::Closed)
                } else {
                    inner.set_phase(Phase::Open { opened_at: now })
                }
            }
            Phase::Closed => {
                let counts = inner.window.counts(now);
                if self.should_open(counts) {
                    inner.set_phase(Phase::Open { opened_at: now })
                } else {
                    None
                }
            }
            // Results from calls admitted before the last transition don't move the FSM.
            _ => None,
        };
        self.notify(&inner, transition);
    }

    fn should_open(&self, counts: WindowCounts) -> bool {
        let total = counts.total();
        total > 0 &&
            total >= self.config.volume_threshold &&
            u64::from(counts.failures) * 100 >=
                u64::from(self.config.error_threshold_percentage) * u64::from(total)
    }

    fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if let Phase::HalfOpen { trial_in_flight: true } = inner.phase {
            inner.phase = Phase::HalfOpen { trial_in_flight: false };
        }
    }

    /// Logs `transition` and hands it to the listener. Called with the lock held.
    fn notify(&self, inner: &Inner, transition: Option<StateTransition>) {
        let Some(transition) = transition else { return };

        match transition.to {
            CircuitState::Open => {
                let counts = inner.window.counts(Instant::now());
                tracing::warn!(
                    provider = %self.name,
                    from = %transition.from,
                    failures = counts.failures,
                    total = counts.total(),
                    "circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::warn!(provider = %self.name, "circuit breaker transitioning to half-open state");
            }
            CircuitState::Closed => {
                tracing::info!(provider = %self.name, from = %transition.from, "circuit breaker closed");
            }
        }

        if let Some(listener) = &self.listener {
            listener(transition);
        }
    }
}

/// Permission to make a single call through a [`CircuitBreaker`].
#[must_use = "a permit must be completed with the call outcome"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    completed: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self { breaker, trial, completed: false }
    }

    /// Returns `true` if this is the single half-open trial call.
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Records the call outcome.
    pub fn complete(mut self, success: bool) {
        self.completed = true;
        self.breaker.on_result(self.trial, success);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.completed && self.trial {
            self.breaker.release_trial();
        }
    }
}
