#![forbid(unsafe_code)]

//! # Switchboard
//!
//! Channel orchestration core for an LLM request proxy: candidate selection,
//! load-balanced ranking, retry driving, and per-(channel, model) circuit
//! breaking.
//!
//! ## Components
//!
//! - [`metrics`] — sliding-window per-channel counters.
//! - [`connections`] — per-channel in-flight request tracking.
//! - [`circuit_breaker`] — per-(channel, model) health state machine with
//!   probe leases.
//! - [`strategy`] — pure scoring functions composed by the load balancer.
//! - [`load_balancer`] — ranks candidates and returns a bounded top-K.
//! - [`candidates`] — builds the ordered candidate list for a request model.
//! - [`retry_driver`] — iterates ranked candidates across retryable failures.
//! - [`model_mapper`] — per-profile model name rewriting.
//! - [`orchestrator`] — wires the above into a single request entry point.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use switchboard::candidates::Channel;
//! use switchboard::circuit_breaker::ModelCircuitBreaker;
//! use switchboard::clock::SystemClock;
//! use switchboard::config::Config;
//! use switchboard::connections::ConnectionTracker;
//! use switchboard::metrics::MetricsRegistry;
//! use switchboard::orchestrator::{
//!     NoopAPIKeyProvider, NoopTraceProvider, Orchestrator, StaticRetryPolicyProvider,
//! };
//! use switchboard::load_balancer::RetryPolicy;
//! use switchboard::sleeper::TokioSleeper;
//!
//! let clock = Arc::new(SystemClock::default());
//! let orchestrator = Orchestrator {
//!     metrics: Arc::new(MetricsRegistry::new(clock.clone())),
//!     connections: Arc::new(ConnectionTracker::new()),
//!     circuit_breaker: Arc::new(ModelCircuitBreaker::new(clock.clone())),
//!     clock,
//!     sleeper: Arc::new(TokioSleeper),
//!     config: Config::default(),
//!     channels: vec![Arc::new(Channel {
//!         id: 1,
//!         name: "primary".into(),
//!         ordering_weight: 100,
//!         supported_models: vec!["gpt-4".into()],
//!         tags: vec![],
//!         priority: 0,
//!         allows_streaming: true,
//!         allows_non_streaming: true,
//!     })],
//!     retry_policy_provider: Arc::new(StaticRetryPolicyProvider(RetryPolicy::default())),
//!     trace_provider: Arc::new(NoopTraceProvider),
//!     api_key_provider: Arc::new(NoopAPIKeyProvider),
//! };
//! // Wire an `OutboundPipeline` and call `orchestrator.handle(..)` per request.
//! ```

pub mod candidates;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod connections;
pub mod error;
pub mod load_balancer;
pub mod metrics;
pub mod model_mapper;
pub mod orchestrator;
pub mod retry_driver;
pub mod sleeper;
pub mod strategy;

pub mod prelude;
