//! Per-partner circuit breakers.
//!
//! Each partner gets one count-based sliding-window breaker. The breaker
//! sees every call outcome (duration + failed flag) and flips between three
//! states:
//!
//! ```text
//! CLOSED    → OPEN       failure rate or slow-call rate over the window
//!                        crosses the threshold (once enough calls exist)
//! OPEN      → HALF_OPEN  open duration elapsed; a bounded number of probe
//!                        calls is permitted
//! HALF_OPEN → CLOSED     probe outcomes stay under the thresholds
//! HALF_OPEN → OPEN       probe outcomes cross a threshold
//! ```
//!
//! The registry owns the breakers, creates them atomically on first use and
//! evicts the ones nothing has touched for a day.

use crate::config::BreakerConfig;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CallOutcome {
    failed: bool,
    slow: bool,
}

enum Inner {
    Closed { window: VecDeque<CallOutcome> },
    Open { since: Instant },
    HalfOpen { permits_left: usize, outcomes: Vec<CallOutcome> },
}

impl Inner {
    fn state(&self) -> BreakerState {
        match self {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }
}

pub struct CircuitBreaker {
    partner_id: String,
    config: Arc<BreakerConfig>,
    inner: Mutex<Inner>,
    last_access: Mutex<Instant>,
}

impl CircuitBreaker {
    fn new(partner_id: String, config: Arc<BreakerConfig>) -> Self {
        CircuitBreaker {
            partner_id,
            config,
            inner: Mutex::new(Inner::Closed {
                window: VecDeque::new(),
            }),
            last_access: Mutex::new(Instant::now()),
        }
    }

    /// Asks the breaker for permission to make one call. No bookkeeping
    /// happens for rejected calls; only granted permits are expected to be
    /// followed by a `record_*`.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed { .. } => true,
            Inner::Open { since } => {
                if since.elapsed() >= Duration::from_millis(self.config.open_duration_ms) {
                    self.log_transition(BreakerState::Open, BreakerState::HalfOpen);
                    *inner = Inner::HalfOpen {
                        permits_left: self.config.half_open_permits.saturating_sub(1),
                        outcomes: Vec::new(),
                    };
                    true
                } else {
                    false
                }
            }
            Inner::HalfOpen { permits_left, .. } => {
                if *permits_left > 0 {
                    *permits_left -= 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, duration: Duration) {
        self.record(CallOutcome {
            failed: false,
            slow: self.is_slow(duration),
        });
    }

    pub fn record_failure(&self, duration: Duration, cause: &str) {
        tracing::debug!(
            partner_id = %self.partner_id,
            cause = cause,
            "Circuit breaker recorded failure"
        );
        self.record(CallOutcome {
            failed: true,
            slow: self.is_slow(duration),
        });
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state()
    }

    fn is_slow(&self, duration: Duration) -> bool {
        duration > Duration::from_millis(self.config.slow_call_threshold_ms)
    }

    fn record(&self, outcome: CallOutcome) {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed { window } => {
                window.push_back(outcome);
                while window.len() > self.config.sliding_window_size {
                    window.pop_front();
                }
                if window.len() >= self.config.minimum_calls
                    && self.thresholds_crossed(window.iter())
                {
                    self.log_transition(BreakerState::Closed, BreakerState::Open);
                    *inner = Inner::Open {
                        since: Instant::now(),
                    };
                }
            }
            Inner::HalfOpen {
                outcomes,
                permits_left: _,
            } => {
                outcomes.push(outcome);
                if outcomes.len() >= self.config.half_open_permits {
                    if self.thresholds_crossed(outcomes.iter()) {
                        self.log_transition(BreakerState::HalfOpen, BreakerState::Open);
                        *inner = Inner::Open {
                            since: Instant::now(),
                        };
                    } else {
                        self.log_transition(BreakerState::HalfOpen, BreakerState::Closed);
                        *inner = Inner::Closed {
                            window: VecDeque::new(),
                        };
                    }
                }
            }
            // A permit was never granted in this state; stray outcomes are
            // dropped rather than skewing the next evaluation.
            Inner::Open { .. } => {}
        }
    }

    fn thresholds_crossed<'a>(&self, outcomes: impl Iterator<Item = &'a CallOutcome>) -> bool {
        let mut total = 0usize;
        let mut failed = 0usize;
        let mut slow = 0usize;
        for outcome in outcomes {
            total += 1;
            if outcome.failed {
                failed += 1;
            }
            if outcome.slow {
                slow += 1;
            }
        }
        if total == 0 {
            return false;
        }
        let failure_rate = failed as f64 * 100.0 / total as f64;
        let slow_rate = slow as f64 * 100.0 / total as f64;
        failure_rate >= self.config.failure_rate_threshold
            || slow_rate >= self.config.slow_call_rate_threshold
    }

    fn log_transition(&self, from: BreakerState, to: BreakerState) {
        tracing::info!(
            partner_id = %self.partner_id,
            from = from.as_str(),
            to = to.as_str(),
            "Circuit breaker state changed"
        );
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }
}

/// One breaker per partner id, created lazily and evicted when idle.
pub struct CircuitBreakerRegistry {
    config: Arc<BreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        CircuitBreakerRegistry {
            config: Arc::new(config),
            breakers: DashMap::new(),
        }
    }

    /// Permission check for one call against `partner_id`. Creates the
    /// breaker on first use; creation is atomic under racing callers.
    pub fn acquire(&self, partner_id: &str) -> bool {
        let breaker = self.breaker(partner_id);
        breaker.touch();
        breaker.try_acquire()
    }

    pub fn record_success(&self, partner_id: &str, duration: Duration) {
        self.breaker(partner_id).record_success(duration);
    }

    pub fn record_failure(&self, partner_id: &str, duration: Duration, cause: &str) {
        self.breaker(partner_id).record_failure(duration, cause);
    }

    pub fn state(&self, partner_id: &str) -> Option<BreakerState> {
        self.breakers.get(partner_id).map(|entry| entry.state())
    }

    /// Removes breakers nothing has acquired within the eviction threshold.
    pub fn sweep(&self) {
        let threshold = Duration::from_secs(self.config.eviction_threshold_secs);
        let mut evicted = 0usize;
        self.breakers.retain(|partner_id, breaker| {
            let keep = breaker.idle_for() < threshold;
            if !keep {
                evicted += 1;
                tracing::info!(partner_id = %partner_id, "Evicted inactive circuit breaker");
            }
            keep
        });
        if evicted > 0 {
            tracing::info!(count = evicted, "Evicted inactive circuit breakers");
        }
    }

    /// Periodic sweep worker; runs until the registry is dropped and the
    /// task is aborted by runtime shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = Duration::from_secs(registry.config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                registry.sweep();
            }
        })
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    fn breaker(&self, partner_id: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(partner_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    partner_id.to_string(),
                    Arc::clone(&self.config),
                ))
            })
            .clone()
    }
}
