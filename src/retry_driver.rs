//! Retry Driver (C7): iterates ranked candidates, coordinating with the
//! circuit breaker's probe lifecycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::circuit_breaker::{CircuitState, ModelCircuitBreaker};
use crate::connections::ConnectionTracker;
use crate::error::OrchestratorError;
use crate::load_balancer::{RankedCandidate, RetryPolicy};
use crate::metrics::{ChannelId, MetricsRegistry};
use crate::sleeper::Sleeper;

/// The external transformer+HTTP stack the core drives on each attempt.
#[async_trait]
pub trait OutboundPipeline<Req: Sync, Res>: Send + Sync {
    async fn invoke(
        &self,
        candidate: &crate::candidates::ChannelModelCandidate,
        request: &Req,
    ) -> Result<Res, OrchestratorError>;
}

/// Summary of channels attempted before final failure, for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct AttemptSummary {
    pub attempted_channels: Vec<ChannelId>,
}

/// Drives retries across an already-ranked candidate slice. Candidates are
/// tried strictly in rank order; within-candidate retries never interleave
/// with other candidates.
pub struct RetryDriver<'a> {
    pub metrics: &'a MetricsRegistry,
    pub connections: &'a ConnectionTracker,
    pub circuit_breaker: &'a ModelCircuitBreaker,
    pub sleeper: Arc<dyn Sleeper>,
    pub retry_policy: RetryPolicy,
}

impl<'a> RetryDriver<'a> {
    pub async fn execute<Req: Sync, Res>(
        &self,
        candidates: &[RankedCandidate],
        request: &Req,
        pipeline: &dyn OutboundPipeline<Req, Res>,
    ) -> Result<Res, OrchestratorError> {
        let mut index = 0usize;
        let mut same_channel_attempts = 0u32;
        let mut last_error: Option<OrchestratorError> = None;
        let mut summary = AttemptSummary::default();

        while index < candidates.len() {
            let cand = &candidates[index].candidate;
            let channel_id = cand.channel.id;
            let model = cand.actual_model.as_str();

            let mut probe_leased = false;
            if self.circuit_breaker.state(channel_id, model) == CircuitState::Open {
                if !self.circuit_breaker.try_begin_probe(channel_id, model) {
                    tracing::debug!(channel_id, model, "skipped by circuit breaker");
                    last_error = Some(OrchestratorError::skip_by_circuit_breaker(
                        cand.channel.name.clone(),
                        model.to_string(),
                    ));
                    index += 1;
                    same_channel_attempts = 0;
                    continue;
                }
                probe_leased = true;
            }

            summary.attempted_channels.push(channel_id);
            let _conn_guard = self.connections.guard(channel_id);
            let outcome = pipeline.invoke(cand, request).await;

            match outcome {
                Ok(response) => {
                    self.metrics.record_success(channel_id);
                    self.circuit_breaker.record_success(channel_id, model);
                    if probe_leased {
                        self.circuit_breaker.end_probe(channel_id, model);
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if probe_leased {
                        self.circuit_breaker.end_probe(channel_id, model);
                    }
                    if err.is_cancelled() {
                        return Err(err);
                    }
                    if err.should_record_metrics() {
                        self.metrics.record_failure(channel_id);
                        self.circuit_breaker.record_error(channel_id, model);
                    }

                    if !err.is_retryable() {
                        return Err(err);
                    }

                    if same_channel_attempts < self.retry_policy.max_same_channel_retries {
                        same_channel_attempts += 1;
                        last_error = Some(err);
                        self.sleeper.sleep(Duration::from_millis(self.retry_policy.retry_delay_ms)).await;
                        // Same candidate, index unchanged.
                        continue;
                    }

                    last_error = Some(err);
                    index += 1;
                    same_channel_attempts = 0;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            OrchestratorError::internal("candidates exhausted with no recorded cause")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::{Channel, ChannelModelCandidate};
    use crate::clock::test_support::ManualClock;
    use crate::sleeper::InstantSleeper;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn ranked(id: u64) -> RankedCandidate {
        RankedCandidate {
            candidate: ChannelModelCandidate {
                channel: Arc::new(Channel {
                    id,
                    name: format!("ch-{id}"),
                    ordering_weight: 100,
                    supported_models: vec!["gpt-4".into()],
                    tags: vec![],
                    priority: 0,
                    allows_streaming: true,
                    allows_non_streaming: true,
                }),
                request_model: "gpt-4".into(),
                actual_model: "gpt-4".into(),
                priority: 0,
            },
            total_score: 0.0,
            breakdown: None,
            rank: 0,
        }
    }

    struct ScriptedPipeline {
        outcomes: Mutex<Vec<Result<&'static str, OrchestratorError>>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl OutboundPipeline<(), &'static str> for ScriptedPipeline {
        async fn invoke(
            &self,
            _candidate: &crate::candidates::ChannelModelCandidate,
            _request: &(),
        ) -> Result<&'static str, OrchestratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes.lock().unwrap().remove(0)
        }
    }

    fn driver<'a>(
        metrics: &'a MetricsRegistry,
        connections: &'a ConnectionTracker,
        cb: &'a ModelCircuitBreaker,
        retry_policy: RetryPolicy,
    ) -> RetryDriver<'a> {
        RetryDriver {
            metrics,
            connections,
            circuit_breaker: cb,
            sleeper: Arc::new(InstantSleeper),
            retry_policy,
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_candidate() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let connections = ConnectionTracker::new();
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        let d = driver(&metrics, &connections, &cb, RetryPolicy::default());
        let pipeline = ScriptedPipeline { outcomes: Mutex::new(vec![Ok("ok")]), calls: AtomicU32::new(0) };

        let candidates = vec![ranked(1)];
        let result = d.execute(&candidates, &(), &pipeline).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(connections.active_connections(1), 0);
    }

    #[tokio::test]
    async fn retries_same_channel_within_budget() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let connections = ConnectionTracker::new();
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        let retry_policy = RetryPolicy { max_same_channel_retries: 2, ..Default::default() };
        let d = driver(&metrics, &connections, &cb, retry_policy);
        let pipeline = ScriptedPipeline {
            outcomes: Mutex::new(vec![
                Err(OrchestratorError::retryable_upstream("timeout")),
                Ok("ok"),
            ]),
            calls: AtomicU32::new(0),
        };

        let candidates = vec![ranked(1), ranked(2)];
        let result = d.execute(&candidates, &(), &pipeline).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn advances_candidate_when_same_channel_budget_exhausted() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let connections = ConnectionTracker::new();
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        let retry_policy = RetryPolicy { max_same_channel_retries: 0, ..Default::default() };
        let d = driver(&metrics, &connections, &cb, retry_policy);
        let pipeline = ScriptedPipeline {
            outcomes: Mutex::new(vec![
                Err(OrchestratorError::retryable_upstream("timeout")),
                Ok("ok"),
            ]),
            calls: AtomicU32::new(0),
        };

        let candidates = vec![ranked(1), ranked(2)];
        let result = d.execute(&candidates, &(), &pipeline).await;
        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test]
    async fn cancellation_is_not_recorded_as_channel_error() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let connections = ConnectionTracker::new();
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        let d = driver(&metrics, &connections, &cb, RetryPolicy::default());
        let pipeline =
            ScriptedPipeline { outcomes: Mutex::new(vec![Err(OrchestratorError::Cancelled)]), calls: AtomicU32::new(0) };

        let candidates = vec![ranked(1)];
        let result = d.execute(&candidates, &(), &pipeline).await;
        assert!(result.unwrap_err().is_cancelled());
        let snap = metrics.get_channel_metrics(1).unwrap();
        assert_eq!(snap.failure_count, 0);
        assert_eq!(connections.active_connections(1), 0);
    }

    #[tokio::test]
    async fn open_breaker_without_probe_skips_candidate() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let connections = ConnectionTracker::new();
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        for _ in 0..4 {
            cb.record_error(1, "gpt-4");
        }
        let d = driver(&metrics, &connections, &cb, RetryPolicy::default());
        let pipeline = ScriptedPipeline { outcomes: Mutex::new(vec![Ok("ok")]), calls: AtomicU32::new(0) };

        let candidates = vec![ranked(1), ranked(2)];
        let result = d.execute(&candidates, &(), &pipeline).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausting_all_candidates_surfaces_last_error() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let connections = ConnectionTracker::new();
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        let retry_policy = RetryPolicy { max_same_channel_retries: 0, ..Default::default() };
        let d = driver(&metrics, &connections, &cb, retry_policy);
        let pipeline = ScriptedPipeline {
            outcomes: Mutex::new(vec![
                Err(OrchestratorError::retryable_upstream("timeout 1")),
                Err(OrchestratorError::retryable_upstream("timeout 2")),
            ]),
            calls: AtomicU32::new(0),
        };

        let candidates = vec![ranked(1), ranked(2)];
        let result = d.execute(&candidates, &(), &pipeline).await;
        let err = result.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn non_retryable_error_surfaces_immediately_without_trying_next_candidate() {
        let clock = ManualClock::new();
        let metrics = MetricsRegistry::new(Arc::new(clock.clone()));
        let connections = ConnectionTracker::new();
        let cb = ModelCircuitBreaker::new(Arc::new(clock.clone()));
        let d = driver(&metrics, &connections, &cb, RetryPolicy::default());
        let pipeline = ScriptedPipeline {
            outcomes: Mutex::new(vec![
                Err(OrchestratorError::non_retryable_upstream("400 bad request")),
                Ok("ok"),
            ]),
            calls: AtomicU32::new(0),
        };

        let candidates = vec![ranked(1), ranked(2)];
        let result = d.execute(&candidates, &(), &pipeline).await;
        let err = result.unwrap_err();
        assert!(err.is_non_retryable_upstream());
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 1);
        let snap = metrics.get_channel_metrics(1).unwrap();
        assert_eq!(snap.failure_count, 1);
    }
}
