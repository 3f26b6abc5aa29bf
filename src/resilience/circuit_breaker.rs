//! Keyed circuit breaker for flaky dependencies.
//!
//! Each key (for example `llm_classify`) tracks failures inside a rolling
//! window. Reaching the threshold opens the circuit for a cooldown period;
//! a single success removes the key's state entirely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::BreakerSettings;

/// Monotonic time source, injectable so tests can drive time directly.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
}

/// Wall clock backed by `Instant`.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, at: Duration) {
        self.millis.store(at.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    pub threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(120),
        }
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(s: &BreakerSettings) -> Self {
        Self {
            threshold: s.threshold.max(1),
            window: Duration::from_secs(s.window_sec),
            cooldown: Duration::from_secs(s.cooldown_sec),
        }
    }
}

/// Failure bookkeeping for one key. `open_until == None` means closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitState {
    pub failure_count: u32,
    pub window_start: Duration,
    pub open_until: Option<Duration>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    states: Mutex<HashMap<String, CircuitState>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Breaker on the wall clock.
    pub fn with_system_clock(config: BreakerConfig) -> Self {
        Self::new(config, Arc::new(SystemClock::new()))
    }

    // A panic while holding the lock leaves the map consistent, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, CircuitState>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a call to `key` may be attempted now.
    pub fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();
        let states = self.lock();
        match states.get(key).and_then(|s| s.open_until) {
            Some(open_until) if open_until > now => {
                debug!(key, "circuit open, blocking call");
                false
            }
            _ => true,
        }
    }

    /// Full reset: the key's state is discarded.
    pub fn record_success(&self, key: &str) {
        if self.lock().remove(key).is_some() {
            debug!(key, "circuit reset after success");
        }
    }

    pub fn record_failure(&self, key: &str) {
        let now = self.clock.now();
        let mut states = self.lock();
        let state = states.entry(key.to_string()).or_insert(CircuitState {
            failure_count: 0,
            window_start: now,
            open_until: None,
        });

        if now.saturating_sub(state.window_start) > self.config.window {
            // An expired window also clears a stale open state
            state.failure_count = 0;
            state.window_start = now;
            state.open_until = None;
        }

        state.failure_count += 1;
        if state.failure_count >= self.config.threshold {
            state.open_until = Some(now + self.config.cooldown);
            warn!(
                key,
                failures = state.failure_count,
                cooldown_sec = self.config.cooldown.as_secs(),
                "circuit opened"
            );
        } else {
            debug!(
                key,
                "circuit failure {}/{}", state.failure_count, self.config.threshold
            );
        }
    }

    pub fn snapshot(&self, key: &str) -> Option<CircuitState> {
        self.lock().get(key).copied()
    }
}
