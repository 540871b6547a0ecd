//! Per-channel sliding-window metrics registry.
//!
//! Each channel gets its own mutex-guarded ring buffer of 1-second slots, keyed
//! through a `DashMap` so channels never contend with each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::clock::Clock;
use crate::error::OrchestratorError;

pub type ChannelId = u64;

/// Default sliding-window span, in seconds.
pub const DEFAULT_WINDOW_SECONDS: u64 = 600;

/// Point-in-time snapshot of a channel's aggregated metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMetricsSnapshot {
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u64,
    pub last_success_at: Option<u64>,
    pub last_failure_at: Option<u64>,
    pub last_selected_at: Option<u64>,
}

impl ChannelMetricsSnapshot {
    fn empty() -> Self {
        Self {
            request_count: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            last_success_at: None,
            last_failure_at: None,
            last_selected_at: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    second: u64,
    successes: u64,
    failures: u64,
}

struct ChannelAggregate {
    window_seconds: u64,
    slots: Vec<Slot>,
    consecutive_failures: u64,
    last_success_at: Option<u64>,
    last_failure_at: Option<u64>,
}

impl ChannelAggregate {
    fn new(window_seconds: u64) -> Self {
        Self {
            window_seconds,
            slots: vec![Slot::default(); window_seconds.max(1) as usize],
            consecutive_failures: 0,
            last_success_at: None,
            last_failure_at: None,
        }
    }

    fn slot_index(&self, second: u64) -> usize {
        (second % self.window_seconds.max(1)) as usize
    }

    /// Evict any slot whose stamped second has fallen out of the window.
    fn evict_expired(&mut self, now: u64) {
        let window = self.window_seconds.max(1);
        for slot in self.slots.iter_mut() {
            if slot.second != 0 && now.saturating_sub(slot.second) >= window {
                *slot = Slot::default();
            }
        }
    }

    fn record(&mut self, now: u64, success: bool) {
        self.evict_expired(now);
        let idx = self.slot_index(now);
        let slot = &mut self.slots[idx];
        if slot.second != now {
            *slot = Slot { second: now, successes: 0, failures: 0 };
        }
        if success {
            slot.successes += 1;
            self.consecutive_failures = 0;
            self.last_success_at = Some(now);
        } else {
            slot.failures += 1;
            self.consecutive_failures += 1;
            self.last_failure_at = Some(now);
        }
    }

    fn aggregate(&mut self, now: u64) -> (u64, u64) {
        self.evict_expired(now);
        let mut successes = 0u64;
        let mut failures = 0u64;
        for slot in &self.slots {
            if slot.second != 0 && now.saturating_sub(slot.second) < self.window_seconds.max(1) {
                successes += slot.successes;
                failures += slot.failures;
            }
        }
        (successes, failures)
    }
}

/// Process-wide, per-channel sliding-window counters.
///
/// `lastSelectedAt` is updated by the load balancer at ranking time (before
/// any outcome is known), which is what lets concurrent bursts spread across
/// channels before completions land.
pub struct MetricsRegistry {
    window_seconds: u64,
    channels: DashMap<ChannelId, Mutex<ChannelAggregate>>,
    last_selected_at: DashMap<ChannelId, AtomicU64>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("window_seconds", &self.window_seconds)
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl MetricsRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_window(DEFAULT_WINDOW_SECONDS, clock)
    }

    pub fn with_window(window_seconds: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            window_seconds: window_seconds.max(1),
            channels: DashMap::new(),
            last_selected_at: DashMap::new(),
            clock,
        }
    }

    pub fn record_success(&self, channel: ChannelId) {
        let now = self.clock.unix_seconds();
        let entry = self
            .channels
            .entry(channel)
            .or_insert_with(|| Mutex::new(ChannelAggregate::new(self.window_seconds)));
        let mut agg = entry.lock().unwrap_or_else(|p| p.into_inner());
        agg.record(now, true);
    }

    pub fn record_failure(&self, channel: ChannelId) {
        let now = self.clock.unix_seconds();
        let entry = self
            .channels
            .entry(channel)
            .or_insert_with(|| Mutex::new(ChannelAggregate::new(self.window_seconds)));
        let mut agg = entry.lock().unwrap_or_else(|p| p.into_inner());
        agg.record(now, false);
    }

    /// Record the top-1 selection at ranking time, not at completion.
    pub fn record_selected(&self, channel: ChannelId) {
        let now = self.clock.unix_seconds();
        self.last_selected_at.entry(channel).or_insert_with(|| AtomicU64::new(0)).store(now, Ordering::SeqCst);
    }

    pub fn get_channel_metrics(
        &self,
        channel: ChannelId,
    ) -> Result<ChannelMetricsSnapshot, OrchestratorError> {
        let now = self.clock.unix_seconds();
        let Some(entry) = self.channels.get(&channel) else {
            let last_selected_at =
                self.last_selected_at.get(&channel).map(|v| v.load(Ordering::SeqCst)).filter(|v| *v != 0);
            let mut snap = ChannelMetricsSnapshot::empty();
            snap.last_selected_at = last_selected_at;
            return Ok(snap);
        };
        let mut agg = entry.lock().unwrap_or_else(|p| p.into_inner());
        let (successes, failures) = agg.aggregate(now);
        let last_selected_at =
            self.last_selected_at.get(&channel).map(|v| v.load(Ordering::SeqCst)).filter(|v| *v != 0);
        Ok(ChannelMetricsSnapshot {
            request_count: successes + failures,
            success_count: successes,
            failure_count: failures,
            consecutive_failures: agg.consecutive_failures,
            last_success_at: agg.last_success_at,
            last_failure_at: agg.last_failure_at,
            last_selected_at,
        })
    }
}
