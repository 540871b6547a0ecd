//! Error taxonomy for the orchestration core.

use thiserror::Error;

/// Unified error type surfaced by candidate building, load balancing, and the
/// retry driver.
///
/// Variants line up with the taxonomy the retry driver and metrics registry
/// use to decide whether to retry, whether to record a circuit-breaker
/// outcome, and whether the error is user-visible.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// No channel/model candidate is reachable for the request (empty
    /// candidate set, or the active profile has no access).
    #[error("invalid model: {message}")]
    InvalidModel { message: String },

    /// The caller cancelled the request before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// Upstream failure that is safe to retry on another candidate: timeout,
    /// 5xx, 429, or connection reset.
    #[error("retryable upstream error: {message}")]
    RetryableUpstream { message: String },

    /// Upstream failure that must not be retried: any 4xx other than 429.
    #[error("non-retryable upstream error: {message}")]
    NonRetryableUpstream { message: String },

    /// The circuit breaker for (channel, model) is open and no probe slot
    /// was available; the driver advances to the next candidate without
    /// counting this as a retry of the same channel.
    #[error("skipped by circuit breaker for channel {channel}, model {model}")]
    SkipByCircuitBreaker { channel: String, model: String },

    /// The metrics backing store failed. Scoring treats the affected channel
    /// neutrally rather than penalizing it.
    #[error("metrics unavailable: {message}")]
    MetricsUnavailable { message: String },

    /// A core invariant was violated, typically surfaced after all
    /// candidates are exhausted with no retryable cause.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl OrchestratorError {
    pub fn invalid_model(message: impl Into<String>) -> Self {
        Self::InvalidModel { message: message.into() }
    }

    pub fn retryable_upstream(message: impl Into<String>) -> Self {
        Self::RetryableUpstream { message: message.into() }
    }

    pub fn non_retryable_upstream(message: impl Into<String>) -> Self {
        Self::NonRetryableUpstream { message: message.into() }
    }

    pub fn skip_by_circuit_breaker(channel: impl Into<String>, model: impl Into<String>) -> Self {
        Self::SkipByCircuitBreaker { channel: channel.into(), model: model.into() }
    }

    pub fn metrics_unavailable(message: impl Into<String>) -> Self {
        Self::MetricsUnavailable { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether the retry driver should attempt another candidate for this
    /// outcome. `SkipByCircuitBreaker` is deliberately excluded: the driver
    /// advances its candidate index for it, but that is not a "retry" of the
    /// failed channel.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableUpstream { .. })
    }

    pub fn is_invalid_model(&self) -> bool {
        matches!(self, Self::InvalidModel { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_non_retryable_upstream(&self) -> bool {
        matches!(self, Self::NonRetryableUpstream { .. })
    }

    pub fn is_skip_by_circuit_breaker(&self) -> bool {
        matches!(self, Self::SkipByCircuitBreaker { .. })
    }

    pub fn is_metrics_unavailable(&self) -> bool {
        matches!(self, Self::MetricsUnavailable { .. })
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Whether a metrics outcome (success/failure counter) should be recorded
    /// for the candidate this error came from. Cancellation and metrics
    /// backing-store failures are excluded.
    pub fn should_record_metrics(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::MetricsUnavailable { .. })
    }

    /// Whether this error is ever shown to the caller, as opposed to being
    /// fully absorbed by retry/circuit-breaker bookkeeping.
    pub fn is_user_visible(&self) -> bool {
        match self {
            Self::MetricsUnavailable { .. } => false,
            _ => true,
        }
    }
}
