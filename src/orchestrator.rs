//! Orchestrator shell (C9): wires model mapping, candidate build, load
//! balancing, and the retry driver into one request-shaped entry point.
//!
//! The shell owns no business rules of its own — it is glue over C1-C8 plus
//! the external ports the core depends on (trace lookup, the active API-key
//! profile, the retry policy to use, the outbound pipeline). Everything it
//! assembles is exposed as data so callers can also drive C5/C6/C7
//! individually (`select_candidates`, `rank_top_k`, `execute`) when they need
//! finer control than the convenience `handle` entry point gives them.

use std::sync::Arc;

use uuid::Uuid;

use crate::candidates::{build_candidates, ActiveProfile, CandidateRequest, Channel, ChannelModelCandidate};
use crate::circuit_breaker::ModelCircuitBreaker;
use crate::clock::Clock;
use crate::config::Config;
use crate::connections::ConnectionTracker;
use crate::error::OrchestratorError;
use crate::load_balancer::{rank_top_k as lb_rank_top_k, LoadBalancerStrategyKind, RankedCandidate, RetryPolicy};
use crate::metrics::{ChannelId, MetricsRegistry};
use crate::model_mapper::{ModelMapper, ModelStampable};
use crate::retry_driver::{OutboundPipeline, RetryDriver};
use crate::sleeper::Sleeper;
use crate::strategy::{
    ConnectionAwareStrategy, ErrorAwareStrategy, ModelAwareCircuitBreakerStrategy, RandomStrategy,
    ScoringContext, Strategy, StrategyServices, TraceAwareStrategy, TraceContext, WeightRoundRobinStrategy,
    WeightStrategy,
};

/// Per-request context threaded through candidate building, ranking, and
/// execution. `api_key` is opaque to the core; it is only used to look up a
/// profile via `APIKeyProvider`.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub api_key: Option<String>,
    pub trace_id: Option<Uuid>,
    pub streaming: bool,
}

/// Supplies the retry policy to use for a request, falling back to a default
/// when the caller (or its profile) has no override.
pub trait RetryPolicyProvider: Send + Sync {
    fn retry_policy_or_default(&self, ctx: &RequestContext) -> RetryPolicy;
}

/// Always returns the same policy, regardless of context.
pub struct StaticRetryPolicyProvider(pub RetryPolicy);

impl RetryPolicyProvider for StaticRetryPolicyProvider {
    fn retry_policy_or_default(&self, _ctx: &RequestContext) -> RetryPolicy {
        self.0
    }
}

/// Looks up the last channel a given trace successfully completed on, for
/// intra-conversation stickiness.
pub trait TraceProvider: Send + Sync {
    fn last_successful_channel_id(&self, ctx: &RequestContext, trace_id: Uuid) -> Option<ChannelId>;
}

/// A `TraceProvider` with no memory of past traces.
#[derive(Debug, Default)]
pub struct NoopTraceProvider;

impl TraceProvider for NoopTraceProvider {
    fn last_successful_channel_id(&self, _ctx: &RequestContext, _trace_id: Uuid) -> Option<ChannelId> {
        None
    }
}

/// Supplies the active profile (model allow-list, mappings, LB override) for
/// a given API key.
pub trait APIKeyProvider: Send + Sync {
    fn active_profile(&self, ctx: &RequestContext) -> Option<ActiveProfile>;
}

/// An `APIKeyProvider` with no profiles; every request is unrestricted.
#[derive(Debug, Default)]
pub struct NoopAPIKeyProvider;

impl APIKeyProvider for NoopAPIKeyProvider {
    fn active_profile(&self, _ctx: &RequestContext) -> Option<ActiveProfile> {
        None
    }
}

/// Builds the strategy stack for a named retry-policy strategy, per the three
/// fixed stacks: `adaptive`, `circuit_breaker`, `failover`. These are
/// assembled here, not inside the load balancer, since they depend on
/// configuration the orchestrator owns.
pub fn build_strategy_stack(kind: LoadBalancerStrategyKind, cfg: &Config) -> Vec<Strategy> {
    match kind {
        LoadBalancerStrategyKind::Adaptive => vec![
            Strategy::TraceAware(TraceAwareStrategy { max_boost: cfg.trace_aware.max_boost }),
            Strategy::ErrorAware(ErrorAwareStrategy {
                max_score: cfg.error_aware.max_score,
                base_penalty: cfg.error_aware.base_penalty,
                penalty_per_consecutive_failure: cfg.error_aware.penalty_per_consecutive_failure,
                cooldown_secs: cfg.error_aware.cooldown_min * 60.0,
            }),
            Strategy::WeightRoundRobin(WeightRoundRobinStrategy {
                inner: crate::strategy::RoundRobinStrategy {
                    max_score: cfg.round_robin.max_score,
                    min_score: cfg.round_robin.min_score,
                    scale: cfg.round_robin.scale,
                    request_count_cap: cfg.round_robin.request_count_cap,
                    inactivity_half_life_secs: cfg.round_robin.inactivity_half_life_min * 60.0,
                },
            }),
            Strategy::ConnectionAware(ConnectionAwareStrategy { max_score: cfg.connection_aware.max_score }),
        ],
        LoadBalancerStrategyKind::CircuitBreaker => vec![
            Strategy::Weight(WeightStrategy::default()),
            Strategy::ModelAwareCircuitBreaker(ModelAwareCircuitBreakerStrategy::default()),
        ],
        LoadBalancerStrategyKind::Failover => {
            vec![Strategy::Weight(WeightStrategy::default()), Strategy::Random(RandomStrategy)]
        }
    }
}

/// Process-wide state plus the external ports the orchestrator depends on.
/// Construct once at startup; `handle` (and the individual `select_candidates`
/// / `rank_top_k` / `execute` steps) are called per request.
pub struct Orchestrator {
    pub metrics: Arc<MetricsRegistry>,
    pub connections: Arc<ConnectionTracker>,
    pub circuit_breaker: Arc<ModelCircuitBreaker>,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
    pub config: Config,
    pub channels: Vec<Arc<Channel>>,
    pub retry_policy_provider: Arc<dyn RetryPolicyProvider>,
    pub trace_provider: Arc<dyn TraceProvider>,
    pub api_key_provider: Arc<dyn APIKeyProvider>,
}

impl Orchestrator {
    /// Model mapping (C8) + candidate build (C6) for a request model. Pure:
    /// no metrics or circuit-breaker reads, no side effects.
    pub fn select_candidates(
        &self,
        ctx: &RequestContext,
        requested_model: &str,
    ) -> Result<Vec<ChannelModelCandidate>, OrchestratorError> {
        let profile = self.api_key_provider.active_profile(ctx);

        let mapper = match &profile {
            Some(p) => ModelMapper::new(p.model_mappings.clone()),
            None => ModelMapper::empty(),
        };
        let actual_model = mapper.map(requested_model);

        let request = CandidateRequest { model: &actual_model, streaming: ctx.streaming };
        let mut candidates = build_candidates(&self.channels, profile.as_ref(), request)?;
        for c in &mut candidates {
            c.request_model = requested_model.to_string();
        }
        Ok(candidates)
    }

    /// Load-balance ranking (C5) over an already-built candidate list. Builds
    /// the strategy stack for this request's resolved retry policy, updates
    /// the selection tracker for the winning candidate, and returns top-K.
    pub fn rank_top_k(
        &self,
        ctx: &RequestContext,
        candidates: Vec<ChannelModelCandidate>,
        requested_model: &str,
        retry_policy: &RetryPolicy,
        debug: bool,
    ) -> Vec<RankedCandidate> {
        let trace = ctx.trace_id.map(|trace_id| TraceContext {
            trace_id,
            last_successful_channel: self.trace_provider.last_successful_channel_id(ctx, trace_id),
        });
        let scoring_ctx =
            ScoringContext { requested_model: Some(requested_model.to_string()), trace, max_observed_weight: 0.0 };
        let strategies = build_strategy_stack(retry_policy.strategy, &self.config);
        let services = StrategyServices {
            metrics: &self.metrics,
            connections: Some(&self.connections),
            circuit_breaker: &self.circuit_breaker,
            clock: self.clock.as_ref(),
        };
        lb_rank_top_k(candidates, scoring_ctx, &strategies, &services, retry_policy, debug)
    }

    /// Drives retries across a ranked candidate slice (C7).
    pub async fn execute<Req: Sync, Res>(
        &self,
        ranked: &[RankedCandidate],
        retry_policy: RetryPolicy,
        request: &Req,
        pipeline: &dyn OutboundPipeline<Req, Res>,
    ) -> Result<Res, OrchestratorError> {
        let driver = RetryDriver {
            metrics: &self.metrics,
            connections: &self.connections,
            circuit_breaker: &self.circuit_breaker,
            sleeper: self.sleeper.clone(),
            retry_policy,
        };
        driver.execute(ranked, request, pipeline).await
    }

    /// End-to-end convenience entry point: mapping, candidate build, ranking,
    /// and retry-driven execution for a single incoming request. Re-stamps
    /// the client-visible model onto the response so callers never observe
    /// the upstream-mapped name (§4.8).
    pub async fn handle<Req: Sync, Res: ModelStampable>(
        &self,
        ctx: &RequestContext,
        requested_model: &str,
        request: &Req,
        pipeline: &dyn OutboundPipeline<Req, Res>,
    ) -> Result<Res, OrchestratorError> {
        let retry_policy = self.retry_policy_provider.retry_policy_or_default(ctx);
        let candidates = self.select_candidates(ctx, requested_model)?;
        let ranked = self.rank_top_k(ctx, candidates, requested_model, &retry_policy, self.config.load_balancer.debug_enabled);
        let mut response = self.execute(&ranked, retry_policy, request, pipeline).await?;
        response.set_visible_model(requested_model);
        Ok(response)
    }
}
