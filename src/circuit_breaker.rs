//! Per-(channel, model) circuit breaker with lock-free atomics.
//!
//! One `BreakerRecord` per composite key, registered lazily in a `DashMap`.
//! The state machine itself is packed into atomics with CAS transitions
//! rather than a mutex-guarded enum, so reads never block a writer mid-trip.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::metrics::ChannelId;

const STATE_CLOSED: u8 = 0;
const STATE_HALF_OPEN: u8 = 1;
const STATE_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    fn from_u8(v: u8) -> Self {
        match v {
            STATE_CLOSED => CircuitState::Closed,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CircuitState::Closed => STATE_CLOSED,
            CircuitState::HalfOpen => STATE_HALF_OPEN,
            CircuitState::Open => STATE_OPEN,
        }
    }
}

/// Tunable thresholds, mirroring the `cb.*` configuration knobs.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub half_open_threshold: u64,
    pub open_cooldown_secs: u64,
    /// Cap on the doubled cooldown after repeated re-opens.
    pub open_cooldown_max_secs: u64,
    pub half_open_successes_needed: u64,
    pub closed_weight: f64,
    pub half_open_weight: f64,
    pub open_weight: f64,
    pub open_probe_eligible_weight: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            half_open_threshold: 3,
            open_cooldown_secs: 60,
            open_cooldown_max_secs: 30 * 60,
            half_open_successes_needed: 1,
            closed_weight: 1.0,
            half_open_weight: 0.3,
            open_weight: 0.0,
            open_probe_eligible_weight: 0.01,
        }
    }
}

struct BreakerRecord {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    half_open_successes: AtomicU64,
    opened_at: AtomicU64,
    next_probe_at: AtomicU64,
    probe_in_flight: AtomicBool,
    reopen_count: AtomicU64,
}

impl BreakerRecord {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicU64::new(0),
            half_open_successes: AtomicU64::new(0),
            opened_at: AtomicU64::new(0),
            next_probe_at: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            reopen_count: AtomicU64::new(0),
        }
    }

    fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// (channel, model) composite key. `model` is the request-facing model name,
/// matching the strategy's `effectiveWeight(channel, requestedModel, ..)` use.
pub type BreakerKey = (ChannelId, String);

/// A point-in-time view of one breaker record, for operational inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub channel: ChannelId,
    pub model: String,
    pub state: CircuitState,
    pub consecutive_failures: u64,
    pub next_probe_at: u64,
}

/// Registry of per-(channel, model) circuit breakers.
///
/// The breaker never returns an error; it is a best-effort health oracle.
/// Probe leases prevent thundering-herd recovery attempts.
pub struct ModelCircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    records: DashMap<BreakerKey, Arc<BreakerRecord>>,
}

impl std::fmt::Debug for ModelCircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCircuitBreaker")
            .field("config", &self.config)
            .field("records", &self.records.len())
            .finish()
    }
}

impl ModelCircuitBreaker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(CircuitBreakerConfig::default(), clock)
    }

    pub fn with_config(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, records: DashMap::new() }
    }

    fn record(&self, channel: ChannelId, model: &str) -> Arc<BreakerRecord> {
        self.records
            .entry((channel, model.to_string()))
            .or_insert_with(|| Arc::new(BreakerRecord::new()))
            .clone()
    }

    pub fn state(&self, channel: ChannelId, model: &str) -> CircuitState {
        self.records.get(&(channel, model.to_string())).map(|r| r.state()).unwrap_or(CircuitState::Closed)
    }

    /// Resets consecutive failures; any success in Closed/HalfOpen clears the
    /// failure count. A success observed while HalfOpen or probing closes the
    /// breaker and clears cooldown doubling.
    pub fn record_success(&self, channel: ChannelId, model: &str) {
        let rec = self.record(channel, model);
        rec.consecutive_failures.store(0, Ordering::SeqCst);
        let state = rec.state();
        if state == CircuitState::HalfOpen || state == CircuitState::Open {
            let successes = rec.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
            if successes >= self.config.half_open_successes_needed {
                rec.state.store(STATE_CLOSED, Ordering::SeqCst);
                rec.half_open_successes.store(0, Ordering::SeqCst);
                rec.reopen_count.store(0, Ordering::SeqCst);
                rec.opened_at.store(0, Ordering::SeqCst);
                tracing::info!(channel, model, "circuit breaker closed after recovery");
            }
        }
    }

    /// Increments consecutive failures and applies Closed→HalfOpen→Open
    /// transitions per the configured thresholds.
    pub fn record_error(&self, channel: ChannelId, model: &str) {
        let rec = self.record(channel, model);
        let failures = rec.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.clock.unix_seconds();
        match rec.state() {
            CircuitState::Closed => {
                if failures >= self.config.half_open_threshold {
                    rec.state.store(STATE_HALF_OPEN, Ordering::SeqCst);
                    tracing::warn!(channel, model, failures, "circuit breaker half-open");
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                self.open(&rec, now, channel, model);
            }
        }
    }

    fn open(&self, rec: &BreakerRecord, now: u64, channel: ChannelId, model: &str) {
        let reopen_count = rec.reopen_count.fetch_add(1, Ordering::SeqCst);
        let multiplier = 1u64.checked_shl(reopen_count.min(20) as u32).unwrap_or(u64::MAX);
        let cooldown = self
            .config
            .open_cooldown_secs
            .saturating_mul(multiplier)
            .min(self.config.open_cooldown_max_secs);
        rec.state.store(STATE_OPEN, Ordering::SeqCst);
        rec.half_open_successes.store(0, Ordering::SeqCst);
        rec.opened_at.store(now, Ordering::SeqCst);
        rec.next_probe_at.store(now.saturating_add(cooldown), Ordering::SeqCst);
        tracing::warn!(channel, model, cooldown, "circuit breaker open");
    }

    /// Returns true only when the breaker is Open, the cooldown has elapsed,
    /// and no probe is currently in flight (CAS on `probe_in_flight`). On
    /// true, the caller must eventually call `end_probe`.
    pub fn try_begin_probe(&self, channel: ChannelId, model: &str) -> bool {
        let rec = self.record(channel, model);
        if rec.state() != CircuitState::Open {
            return false;
        }
        let now = self.clock.unix_seconds();
        if now < rec.next_probe_at.load(Ordering::SeqCst) {
            return false;
        }
        rec.probe_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Clears the probe lease. Must be called even on cancellation.
    pub fn end_probe(&self, channel: ChannelId, model: &str) {
        let rec = self.record(channel, model);
        rec.probe_in_flight.store(false, Ordering::SeqCst);
    }

    /// `base * f(state)`, where `f` is `{Closed: 1.0, HalfOpen: 0.3, Open: 0.0
    /// or open_probe_eligible_weight if the cooldown has elapsed}`.
    pub fn effective_weight(&self, channel: ChannelId, model: &str, base: f64) -> f64 {
        let rec = self.record(channel, model);
        let factor = match rec.state() {
            CircuitState::Closed => self.config.closed_weight,
            CircuitState::HalfOpen => self.config.half_open_weight,
            CircuitState::Open => {
                let now = self.clock.unix_seconds();
                if now >= rec.next_probe_at.load(Ordering::SeqCst) {
                    self.config.open_probe_eligible_weight
                } else {
                    self.config.open_weight
                }
            }
        };
        base * factor
    }

    /// Lists all known breaker states, sorted by (channel, model), for
    /// operational inspection.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut out: Vec<BreakerSnapshot> = self
            .records
            .iter()
            .map(|entry| {
                let (channel, model) = entry.key().clone();
                let rec = entry.value();
                BreakerSnapshot {
                    channel,
                    model,
                    state: rec.state(),
                    consecutive_failures: rec.consecutive_failures.load(Ordering::SeqCst),
                    next_probe_at: rec.next_probe_at.load(Ordering::SeqCst),
                }
            })
            .collect();
        out.sort_by(|a, b| a.channel.cmp(&b.channel).then_with(|| a.model.cmp(&b.model)));
        out
    }

    /// Forces a (channel, model) pair back to Closed, for operational reset.
    pub fn reset(&self, channel: ChannelId, model: &str) {
        let rec = self.record(channel, model);
        rec.state.store(STATE_CLOSED, Ordering::SeqCst);
        rec.consecutive_failures.store(0, Ordering::SeqCst);
        rec.half_open_successes.store(0, Ordering::SeqCst);
        rec.opened_at.store(0, Ordering::SeqCst);
        rec.next_probe_at.store(0, Ordering::SeqCst);
        rec.reopen_count.store(0, Ordering::SeqCst);
        rec.probe_in_flight.store(false, Ordering::SeqCst);
    }
}
