//! Pure scoring strategies consumed by the load balancer.
//!
//! Implemented as a closed tagged union with a fixed dispatch table, per the
//! design note against open polymorphism: every variant is a pure function of
//! `(services, context, channel) -> f64`, with a parallel debug variant that
//! must be numerically identical to the production score.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::Rng;

use crate::candidates::Channel;
use crate::circuit_breaker::ModelCircuitBreaker;
use crate::clock::Clock;
use crate::connections::ConnectionTracker;
use crate::metrics::MetricsRegistry;

/// Cross-request conversational stickiness handle.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: uuid::Uuid,
    pub last_successful_channel: Option<u64>,
}

/// Everything a strategy needs to know about the current request, aside from
/// the candidate channel itself.
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    pub requested_model: Option<String>,
    pub trace: Option<TraceContext>,
    /// The maximum `ordering_weight` across the full candidate set being
    /// ranked this call; `WeightStrategy` normalizes against it.
    pub max_observed_weight: f64,
}

/// Shared, process-wide ports strategies read from.
pub struct StrategyServices<'a> {
    pub metrics: &'a MetricsRegistry,
    pub connections: Option<&'a ConnectionTracker>,
    pub circuit_breaker: &'a ModelCircuitBreaker,
    pub clock: &'a dyn Clock,
}

/// Structured per-strategy score, for the load balancer's debug path.
#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    pub name: &'static str,
    pub score: f64,
    pub detail: String,
    /// Wall-clock time spent computing this strategy's score.
    pub duration: std::time::Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct WeightStrategy {
    pub max_score: f64,
}

impl Default for WeightStrategy {
    fn default() -> Self {
        Self { max_score: 100.0 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RoundRobinStrategy {
    pub max_score: f64,
    pub min_score: f64,
    pub scale: f64,
    pub request_count_cap: u64,
    pub inactivity_half_life_secs: f64,
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self {
            max_score: 150.0,
            min_score: 10.0,
            scale: 150.0,
            request_count_cap: 1000,
            inactivity_half_life_secs: 5.0 * 60.0,
        }
    }
}

impl RoundRobinStrategy {
    fn effective_requests(&self, services: &StrategyServices, channel: &Channel, now: u64) -> f64 {
        let snap = services.metrics.get_channel_metrics(channel.id);
        let Ok(snap) = snap else {
            return f64::NAN;
        };
        let rc = snap.request_count.min(self.request_count_cap) as f64;
        match snap.last_selected_at {
            Some(last) => {
                let idle = now.saturating_sub(last) as f64;
                let decay = (-idle * std::f64::consts::LN_2 / self.inactivity_half_life_secs).exp();
                rc * decay
            }
            None => rc,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WeightRoundRobinStrategy {
    pub inner: RoundRobinStrategy,
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorAwareStrategy {
    pub max_score: f64,
    pub base_penalty: f64,
    pub penalty_per_consecutive_failure: f64,
    pub cooldown_secs: f64,
}

impl Default for ErrorAwareStrategy {
    fn default() -> Self {
        Self {
            max_score: 200.0,
            base_penalty: 40.0,
            penalty_per_consecutive_failure: 30.0,
            cooldown_secs: 5.0 * 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionAwareStrategy {
    pub max_score: f64,
}

impl Default for ConnectionAwareStrategy {
    fn default() -> Self {
        Self { max_score: 50.0 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TraceAwareStrategy {
    pub max_boost: f64,
}

impl Default for TraceAwareStrategy {
    fn default() -> Self {
        Self { max_boost: 1000.0 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ModelAwareCircuitBreakerStrategy {
    pub max_score: f64,
}

impl Default for ModelAwareCircuitBreakerStrategy {
    fn default() -> Self {
        Self { max_score: 200.0 }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomStrategy;

/// A named group of strategies with optional per-child weight multipliers.
#[derive(Debug, Clone)]
pub struct CompositeStrategy {
    pub name: &'static str,
    pub children: Vec<(Strategy, f64)>,
}

/// Closed set of scoring strategies, dispatched via a single `match`.
#[derive(Debug, Clone)]
pub enum Strategy {
    Weight(WeightStrategy),
    RoundRobin(RoundRobinStrategy),
    WeightRoundRobin(WeightRoundRobinStrategy),
    ErrorAware(ErrorAwareStrategy),
    ConnectionAware(ConnectionAwareStrategy),
    TraceAware(TraceAwareStrategy),
    ModelAwareCircuitBreaker(ModelAwareCircuitBreakerStrategy),
    Random(RandomStrategy),
    Composite(Box<CompositeStrategy>),
}

fn tiny_entropy(channel_id: u64, now_millis: u64) -> f64 {
    let mut hasher = DefaultHasher::new();
    channel_id.hash(&mut hasher);
    now_millis.hash(&mut hasher);
    (hasher.finish() % 1000) as f64 / 1000.0
}

impl Strategy {
    pub fn score(&self, services: &StrategyServices, ctx: &ScoringContext, channel: &Channel) -> f64 {
        match self {
            Strategy::Weight(s) => {
                if ctx.max_observed_weight <= 0.0 {
                    0.0
                } else {
                    s.max_score * (channel.ordering_weight as f64 / ctx.max_observed_weight)
                }
            }
            Strategy::RoundRobin(s) => {
                let now = services.clock.unix_seconds();
                let effective = s.effective_requests(services, channel, now);
                if effective.is_nan() {
                    return (s.max_score + s.min_score) / 2.0;
                }
                (s.max_score * (-effective / s.scale).exp()).clamp(s.min_score, s.max_score)
            }
            Strategy::WeightRoundRobin(s) => {
                let inner = s.inner;
                let now = services.clock.unix_seconds();
                let effective = inner.effective_requests(services, channel, now);
                if effective.is_nan() {
                    return (inner.max_score + inner.min_score) / 2.0;
                }
                let epsilon = 1e-6;
                let normalized = effective / (channel.ordering_weight as f64 / 100.0).max(epsilon);
                (inner.max_score * (-normalized / inner.scale).exp()).clamp(inner.min_score, inner.max_score)
            }
            Strategy::ErrorAware(s) => {
                let Ok(snap) = services.metrics.get_channel_metrics(channel.id) else {
                    return s.max_score / 2.0;
                };
                let now = services.clock.unix_seconds();
                let ratio = match snap.last_failure_at {
                    Some(last) => {
                        let since = now.saturating_sub(last) as f64;
                        if since < s.cooldown_secs {
                            1.0 - (since / s.cooldown_secs)
                        } else {
                            0.0
                        }
                    }
                    None if snap.consecutive_failures > 0 => 1.0,
                    None => 0.0,
                };
                let penalty = (snap.consecutive_failures as f64 * s.penalty_per_consecutive_failure
                    + s.base_penalty)
                    * ratio;
                (s.max_score - penalty).max(0.0)
            }
            Strategy::ConnectionAware(s) => {
                let Some(tracker) = services.connections else {
                    return s.max_score / 2.0;
                };
                let max = tracker.max_connections(channel.id);
                if max == 0 {
                    return s.max_score;
                }
                s.max_score * tracker.utilization(channel.id)
            }
            Strategy::TraceAware(s) => match &ctx.trace {
                Some(trace) if trace.last_successful_channel == Some(channel.id) => s.max_boost,
                _ => 0.0,
            },
            Strategy::ModelAwareCircuitBreaker(s) => match &ctx.requested_model {
                Some(model) => {
                    let weight = services.circuit_breaker.effective_weight(channel.id, model, 1.0);
                    let entropy = tiny_entropy(channel.id, services.clock.now_millis());
                    weight * s.max_score + entropy
                }
                None => s.max_score * 0.5,
            },
            Strategy::Random(_) => rand::rng().random_range(0.0..=0.5),
            Strategy::Composite(composite) => composite
                .children
                .iter()
                .map(|(child, weight)| child.score(services, ctx, channel) * weight)
                .sum(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Weight(_) => "weight",
            Strategy::RoundRobin(_) => "round_robin",
            Strategy::WeightRoundRobin(_) => "weight_round_robin",
            Strategy::ErrorAware(_) => "error_aware",
            Strategy::ConnectionAware(_) => "connection_aware",
            Strategy::TraceAware(_) => "trace_aware",
            Strategy::ModelAwareCircuitBreaker(_) => "model_aware_circuit_breaker",
            Strategy::Random(_) => "random",
            Strategy::Composite(_) => "composite",
        }
    }

    /// Structured breakdown used by the load balancer's debug path. Must
    /// return the same numeric score as [`Strategy::score`].
    pub fn score_with_debug(
        &self,
        services: &StrategyServices,
        ctx: &ScoringContext,
        channel: &Channel,
    ) -> ScoreBreakdown {
        let start = std::time::Instant::now();
        let score = self.score(services, ctx, channel);
        ScoreBreakdown {
            name: self.name(),
            score,
            detail: format!("channel={}", channel.id),
            duration: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::ManualClock;
    use std::sync::Arc;

    fn channel(id: u64, weight: u32) -> Channel {
        Channel {
            id,
            name: format!("ch-{id}"),
            ordering_weight: weight,
            supported_models: vec!["gpt-4".to_string()],
            tags: vec![],
            priority: 0,
            allows_streaming: true,
            allows_non_streaming: true,
        }
    }

    fn services<'a>(
        metrics: &'a MetricsRegistry,
        cb: &'a ModelCircuitBreaker,
        clock: &'a dyn Clock,
    ) -> StrategyServices<'a> {
        StrategyServices { metrics, connections: None, circuit_breaker: cb, clock }
    }

    #[test]
    fn weight_strategy_is_proportional() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        let svc = services(&metrics, &cb, &clock);
        let ctx = ScoringContext { max_observed_weight: 100.0, ..Default::default() };
        let strategy = Strategy::Weight(WeightStrategy::default());

        assert_eq!(strategy.score(&svc, &ctx, &channel(1, 100)), 100.0);
        assert_eq!(strategy.score(&svc, &ctx, &channel(2, 50)), 50.0);
        assert_eq!(strategy.score(&svc, &ctx, &channel(3, 10)), 10.0);
    }

    #[test]
    fn weight_strategy_returns_zero_with_no_positive_weights() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        let svc = services(&metrics, &cb, &clock);
        let ctx = ScoringContext { max_observed_weight: 0.0, ..Default::default() };
        let strategy = Strategy::Weight(WeightStrategy::default());
        assert_eq!(strategy.score(&svc, &ctx, &channel(1, 0)), 0.0);
    }

    #[test]
    fn trace_aware_boosts_matching_channel_only() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        let svc = services(&metrics, &cb, &clock);
        let ctx = ScoringContext {
            trace: Some(TraceContext { trace_id: uuid::Uuid::nil(), last_successful_channel: Some(3) }),
            ..Default::default()
        };
        let strategy = Strategy::TraceAware(TraceAwareStrategy::default());
        assert_eq!(strategy.score(&svc, &ctx, &channel(3, 10)), 1000.0);
        assert_eq!(strategy.score(&svc, &ctx, &channel(1, 100)), 0.0);
    }

    #[test]
    fn error_aware_penalizes_recent_consecutive_failures() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        metrics.record_failure(1);
        metrics.record_failure(1);
        let svc = services(&metrics, &cb, &clock);
        let ctx = ScoringContext::default();
        let strategy = Strategy::ErrorAware(ErrorAwareStrategy::default());
        let score = strategy.score(&svc, &ctx, &channel(1, 100));
        assert!(score < 200.0);
    }

    #[test]
    fn error_aware_recovers_after_cooldown() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        metrics.record_failure(1);
        metrics.record_failure(1);
        let svc = services(&metrics, &cb, &clock);
        let ctx = ScoringContext::default();
        let strategy = Strategy::ErrorAware(ErrorAwareStrategy::default());
        clock.advance(std::time::Duration::from_secs(301));
        let score = strategy.score(&svc, &ctx, &channel(1, 100));
        assert_eq!(score, 200.0);
    }

    #[test]
    fn model_aware_breaker_scales_with_state() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        let svc = services(&metrics, &cb, &clock);
        let ctx = ScoringContext { requested_model: Some("gpt-4".to_string()), ..Default::default() };
        let strategy = Strategy::ModelAwareCircuitBreaker(ModelAwareCircuitBreakerStrategy::default());
        let score = strategy.score(&svc, &ctx, &channel(1, 100));
        assert!(score >= 200.0 && score < 201.0);

        for _ in 0..4 {
            cb.record_error(1, "gpt-4");
        }
        let score_open = strategy.score(&svc, &ctx, &channel(1, 100));
        assert!(score_open < 1.0);
    }

    #[test]
    fn score_and_debug_agree() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        let svc = services(&metrics, &cb, &clock);
        let ctx = ScoringContext { max_observed_weight: 100.0, ..Default::default() };
        let strategy = Strategy::Weight(WeightStrategy::default());
        let ch = channel(1, 50);
        assert_eq!(strategy.score(&svc, &ctx, &ch), strategy.score_with_debug(&svc, &ctx, &ch).score);
    }

    #[test]
    fn composite_sums_weighted_children() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        let svc = services(&metrics, &cb, &clock);
        let ctx = ScoringContext { max_observed_weight: 100.0, ..Default::default() };
        let composite = Strategy::Composite(Box::new(CompositeStrategy {
            name: "test",
            children: vec![
                (Strategy::Weight(WeightStrategy::default()), 1.0),
                (Strategy::Weight(WeightStrategy { max_score: 10.0 }), 0.5),
            ],
        }));
        let score = composite.score(&svc, &ctx, &channel(1, 100));
        assert_eq!(score, 100.0 + 5.0);
    }
}
