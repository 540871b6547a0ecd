//! Convenient re-exports for the common Switchboard types.
pub use crate::{
    candidates::{ActiveProfile, CandidateRequest, Channel, ChannelModelCandidate},
    circuit_breaker::{CircuitBreakerConfig, CircuitState, ModelCircuitBreaker},
    clock::{Clock, SystemClock},
    config::Config,
    connections::ConnectionTracker,
    error::OrchestratorError,
    load_balancer::{LoadBalancerStrategyKind, RankedCandidate, RetryPolicy},
    metrics::{ChannelId, MetricsRegistry},
    model_mapper::{ModelMapper, ModelStampable},
    orchestrator::{
        APIKeyProvider, NoopAPIKeyProvider, NoopTraceProvider, Orchestrator, RequestContext,
        RetryPolicyProvider, StaticRetryPolicyProvider, TraceProvider,
    },
    retry_driver::{AttemptSummary, OutboundPipeline, RetryDriver},
    sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper},
    strategy::{ScoreBreakdown, ScoringContext, Strategy, StrategyServices, TraceContext},
};
