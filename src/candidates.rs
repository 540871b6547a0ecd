//! Candidate pipeline: model → ordered list of channel-model candidates.

use std::sync::Arc;

use regex::Regex;

use crate::error::OrchestratorError;
use crate::metrics::ChannelId;

/// An upstream provider connection: immutable for the duration of a request.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    /// Nominal range 0-100; higher wins ties under `WeightStrategy`.
    pub ordering_weight: u32,
    /// Exact names or `*`-wildcard patterns this channel can serve.
    pub supported_models: Vec<String>,
    pub tags: Vec<String>,
    /// Coarse pre-sort bucket; lower is tried earlier before scoring refines.
    pub priority: i32,
    pub allows_streaming: bool,
    pub allows_non_streaming: bool,
}

/// `(channel, requestModel, actualModel, priority)`.
#[derive(Debug, Clone)]
pub struct ChannelModelCandidate {
    pub channel: Arc<Channel>,
    /// What the client asked for (pre-mapping).
    pub request_model: String,
    /// What is sent upstream after model mapping.
    pub actual_model: String,
    pub priority: i32,
}

/// The subset of an API key's active profile the candidate builder consults.
#[derive(Debug, Clone, Default)]
pub struct ActiveProfile {
    pub model_allow_list: Option<Vec<String>>,
    pub channel_tags: Option<Vec<String>>,
    pub load_balance_strategy: Option<String>,
    /// Ordered `(fromPattern, toModel)` pairs applied by the model mapper
    /// before candidates are built; first match wins.
    pub model_mappings: Vec<(String, String)>,
}

/// Per-request inputs the candidate builder needs beyond the channel table.
#[derive(Debug, Clone, Copy)]
pub struct CandidateRequest<'a> {
    pub model: &'a str,
    pub streaming: bool,
}

/// Returns true if `pattern` matches `model`. Bare `*` and patterns containing
/// `*` are treated as anchored wildcards; everything else is exact.
fn model_matches(pattern: &str, model: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == model;
    }
    let escaped = regex::escape(pattern).replace("\\*", ".*");
    Regex::new(&format!("^{escaped}$")).map(|re| re.is_match(model)).unwrap_or(false)
}

/// Builds the ordered candidate list for a mapped request model.
///
/// Pipeline: model lookup (exact + wildcard) → profile allow-list filter →
/// stream-mode policy filter → channel-tag filter → priority assignment.
/// An empty result is always `InvalidModel("no channels available")`.
pub fn build_candidates(
    channels: &[Arc<Channel>],
    profile: Option<&ActiveProfile>,
    request: CandidateRequest<'_>,
) -> Result<Vec<ChannelModelCandidate>, OrchestratorError> {
    let mut candidates = Vec::new();

    for channel in channels {
        let matching_models: Vec<&String> =
            channel.supported_models.iter().filter(|pattern| model_matches(pattern, request.model)).collect();
        if matching_models.is_empty() {
            continue;
        }

        if let Some(profile) = profile {
            if let Some(allow_list) = &profile.model_allow_list {
                if !allow_list.iter().any(|m| m == request.model) {
                    continue;
                }
            }
        }

        if request.streaming && !channel.allows_streaming {
            continue;
        }
        if !request.streaming && !channel.allows_non_streaming {
            continue;
        }

        if let Some(profile) = profile {
            if let Some(required_tags) = &profile.channel_tags {
                if !required_tags.iter().any(|t| channel.tags.contains(t)) {
                    continue;
                }
            }
        }

        candidates.push(ChannelModelCandidate {
            channel: channel.clone(),
            request_model: request.model.to_string(),
            actual_model: request.model.to_string(),
            priority: channel.priority,
        });
    }

    if candidates.is_empty() {
        return Err(OrchestratorError::invalid_model("no channels available"));
    }

    candidates.sort_by_key(|c| c.priority);
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: u64, models: &[&str], weight: u32) -> Arc<Channel> {
        Arc::new(Channel {
            id,
            name: format!("ch-{id}"),
            ordering_weight: weight,
            supported_models: models.iter().map(|s| s.to_string()).collect(),
            tags: vec![],
            priority: 0,
            allows_streaming: true,
            allows_non_streaming: true,
        })
    }

    #[test]
    fn exact_model_match() {
        let channels = vec![channel(1, &["gpt-4"], 100)];
        let req = CandidateRequest { model: "gpt-4", streaming: false };
        let candidates = build_candidates(&channels, None, req).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].channel.id, 1);
    }

    #[test]
    fn wildcard_model_match() {
        let channels = vec![channel(1, &["gpt-*"], 100)];
        let req = CandidateRequest { model: "gpt-4-turbo", streaming: false };
        let candidates = build_candidates(&channels, None, req).unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn no_match_yields_invalid_model() {
        let channels = vec![channel(1, &["claude-3"], 100)];
        let req = CandidateRequest { model: "gpt-4", streaming: false };
        let err = build_candidates(&channels, None, req).unwrap_err();
        assert!(err.is_invalid_model());
    }

    #[test]
    fn empty_channel_list_yields_invalid_model() {
        let channels: Vec<Arc<Channel>> = vec![];
        let req = CandidateRequest { model: "gpt-4", streaming: false };
        let err = build_candidates(&channels, None, req).unwrap_err();
        assert!(err.is_invalid_model());
    }

    #[test]
    fn allow_list_filters_disallowed_models() {
        let channels = vec![channel(1, &["gpt-4"], 100)];
        let profile = ActiveProfile { model_allow_list: Some(vec!["claude-3".into()]), ..Default::default() };
        let req = CandidateRequest { model: "gpt-4", streaming: false };
        let err = build_candidates(&channels, Some(&profile), req).unwrap_err();
        assert!(err.is_invalid_model());
    }

    #[test]
    fn stream_mode_filters_non_streaming_channels() {
        let mut ch = channel(1, &["gpt-4"], 100);
        Arc::get_mut(&mut ch).unwrap().allows_streaming = false;
        let channels = vec![ch];
        let req = CandidateRequest { model: "gpt-4", streaming: true };
        let err = build_candidates(&channels, None, req).unwrap_err();
        assert!(err.is_invalid_model());
    }

    #[test]
    fn channel_tag_filter_requires_intersection() {
        let mut ch = channel(1, &["gpt-4"], 100);
        Arc::get_mut(&mut ch).unwrap().tags = vec!["eu".to_string()];
        let channels = vec![ch];
        let profile = ActiveProfile { channel_tags: Some(vec!["us".into()]), ..Default::default() };
        let req = CandidateRequest { model: "gpt-4", streaming: false };
        let err = build_candidates(&channels, Some(&profile), req).unwrap_err();
        assert!(err.is_invalid_model());
    }

    #[test]
    fn candidates_sorted_by_priority_bucket() {
        let mut low = channel(1, &["gpt-4"], 10);
        Arc::get_mut(&mut low).unwrap().priority = 5;
        let mut high = channel(2, &["gpt-4"], 10);
        Arc::get_mut(&mut high).unwrap().priority = 1;
        let channels = vec![low, high];
        let req = CandidateRequest { model: "gpt-4", streaming: false };
        let candidates = build_candidates(&channels, None, req).unwrap();
        assert_eq!(candidates[0].channel.id, 2);
        assert_eq!(candidates[1].channel.id, 1);
    }
}
