//! Load balancer (C5): scores and ranks candidates, returns a bounded top-K.

use crate::candidates::ChannelModelCandidate;
use crate::strategy::{ScoreBreakdown, ScoringContext, Strategy, StrategyServices};

/// Named load-balance strategy stack, chosen per request via the active
/// profile's override or the retry policy default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancerStrategyKind {
    Adaptive,
    CircuitBreaker,
    Failover,
}

impl LoadBalancerStrategyKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "adaptive" => Some(Self::Adaptive),
            "circuit_breaker" => Some(Self::CircuitBreaker),
            "failover" => Some(Self::Failover),
            _ => None,
        }
    }
}

/// Per-request retry and load-balance-strategy selection knobs.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_channel_retries: u32,
    pub max_same_channel_retries: u32,
    pub strategy: LoadBalancerStrategyKind,
    pub retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_channel_retries: 2,
            max_same_channel_retries: 1,
            strategy: LoadBalancerStrategyKind::Adaptive,
            retry_delay_ms: 250,
        }
    }
}

/// A candidate with its total score and, in debug mode, a per-strategy
/// breakdown.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub candidate: ChannelModelCandidate,
    pub total_score: f64,
    pub breakdown: Option<Vec<ScoreBreakdown>>,
    /// 0-based position in the final ranking, stamped after sorting.
    pub rank: usize,
}

fn score_candidate(
    candidate: &ChannelModelCandidate,
    ctx: &ScoringContext,
    strategies: &[Strategy],
    services: &StrategyServices,
    debug: bool,
) -> (f64, Option<Vec<ScoreBreakdown>>) {
    if debug {
        let breakdown: Vec<ScoreBreakdown> =
            strategies.iter().map(|s| s.score_with_debug(services, ctx, &candidate.channel)).collect();
        let total = breakdown.iter().map(|b| b.score).sum();
        (total, Some(breakdown))
    } else {
        let total = strategies.iter().map(|s| s.score(services, ctx, &candidate.channel)).sum();
        (total, None)
    }
}

/// Ranks `candidates` and returns the top-K by descending total score.
///
/// Tie-break order: descending total score, then descending channel
/// `ordering_weight`, then input order — never channel id, which would
/// collapse equal-score distributions onto a single channel. Updates the
/// selection tracker for the winning (top-1) channel *before* returning, so
/// concurrent rankers observing the same metrics snapshot spread out rather
/// than converging on the same leader.
pub fn rank_top_k(
    candidates: Vec<ChannelModelCandidate>,
    mut ctx: ScoringContext,
    strategies: &[Strategy],
    services: &StrategyServices,
    retry_policy: &RetryPolicy,
    debug: bool,
) -> Vec<RankedCandidate> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let max_weight =
        candidates.iter().map(|c| c.channel.ordering_weight as f64).fold(0.0_f64, f64::max);
    ctx.max_observed_weight = max_weight;

    if candidates.len() == 1 {
        let only = candidates.into_iter().next().expect("checked len == 1");
        services.metrics.record_selected(only.channel.id);
        let (total_score, breakdown) = score_candidate(&only, &ctx, strategies, services, debug);
        return vec![RankedCandidate { candidate: only, total_score, breakdown, rank: 0 }];
    }

    let k = if retry_policy.enabled { 1 + retry_policy.max_channel_retries as usize } else { 1 }
        .clamp(1, candidates.len());

    let mut scored: Vec<(usize, ChannelModelCandidate, f64, Option<Vec<ScoreBreakdown>>)> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let (total, breakdown) = score_candidate(&c, &ctx, strategies, services, debug);
            (i, c, total, breakdown)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.channel.ordering_weight.cmp(&a.1.channel.ordering_weight))
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(k);

    if let Some((_, top, ..)) = scored.first() {
        services.metrics.record_selected(top.channel.id);
    }

    scored
        .into_iter()
        .enumerate()
        .map(|(rank, (_, candidate, total_score, breakdown))| {
            RankedCandidate { candidate, total_score, breakdown, rank }
        })
        .collect()
}
