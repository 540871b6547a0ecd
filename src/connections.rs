//! Per-channel in-flight connection tracking.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;

use crate::metrics::ChannelId;

struct ChannelConnections {
    active: AtomicI64,
    max: AtomicU64,
}

/// Tracks in-flight request counts per channel, with an optional cap.
///
/// `max == 0` means uncapped. Increment/decrement are plain atomics; there is
/// no blocking admission here (that is a connection-tracker concern, not a
/// bulkhead) — callers decrement via a scoped guard so cancellation never
/// leaks a count.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    channels: DashMap<ChannelId, ChannelConnections>,
}

impl std::fmt::Debug for ChannelConnections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConnections")
            .field("active", &self.active.load(Ordering::SeqCst))
            .field("max", &self.max.load(Ordering::SeqCst))
            .finish()
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure(&self, channel: ChannelId) {
        self.channels
            .entry(channel)
            .or_insert_with(|| ChannelConnections { active: AtomicI64::new(0), max: AtomicU64::new(0) });
    }

    pub fn set_max_connections(&self, channel: ChannelId, max: u64) {
        self.ensure(channel);
        if let Some(entry) = self.channels.get(&channel) {
            entry.max.store(max, Ordering::SeqCst);
        }
    }

    pub fn max_connections(&self, channel: ChannelId) -> u64 {
        self.channels.get(&channel).map(|e| e.max.load(Ordering::SeqCst)).unwrap_or(0)
    }

    pub fn active_connections(&self, channel: ChannelId) -> i64 {
        self.channels.get(&channel).map(|e| e.active.load(Ordering::SeqCst)).unwrap_or(0)
    }

    pub fn increment(&self, channel: ChannelId) {
        self.ensure(channel);
        if let Some(entry) = self.channels.get(&channel) {
            entry.active.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn decrement(&self, channel: ChannelId) {
        self.ensure(channel);
        if let Some(entry) = self.channels.get(&channel) {
            entry.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// `1.0 - active/max` when capped, `1.0` when uncapped (`max == 0`).
    pub fn utilization(&self, channel: ChannelId) -> f64 {
        let max = self.max_connections(channel);
        if max == 0 {
            return 1.0;
        }
        let active = self.active_connections(channel).max(0) as f64;
        (1.0 - active / max as f64).clamp(0.0, 1.0)
    }

    /// Increment now, decrement guaranteed on guard drop — covers success,
    /// failure, and cancellation uniformly.
    pub fn guard(&self, channel: ChannelId) -> ConnectionGuard<'_> {
        self.increment(channel);
        ConnectionGuard { tracker: self, channel }
    }
}

/// Scoped release guard: decrements on drop regardless of exit path.
pub struct ConnectionGuard<'a> {
    tracker: &'a ConnectionTracker,
    channel: ChannelId,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.tracker.decrement(self.channel);
    }
}
