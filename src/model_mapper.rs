//! Model Mapper (C8): per-profile model name rewriting for outbound requests.

use regex::Regex;

/// One `{fromPattern, toModel}` entry from an active profile's ordered
/// `modelMappings`. `fromPattern` is compiled as an anchored regex; a bare
/// `*` is convenience shorthand for "match anything".
struct CompiledMapping {
    to_model: String,
    pattern: Option<Regex>,
}

/// Applies a profile's ordered model mappings: first match wins. Invalid
/// patterns are skipped at match time rather than rejected outright, so one
/// bad entry does not break the rest of the list.
pub struct ModelMapper {
    mappings: Vec<CompiledMapping>,
}

impl ModelMapper {
    /// `mappings` is `(fromPattern, toModel)` in priority order.
    pub fn new(mappings: impl IntoIterator<Item = (String, String)>) -> Self {
        let mappings = mappings
            .into_iter()
            .map(|(from_pattern, to_model)| {
                let body = if from_pattern == "*" { ".*".to_string() } else { from_pattern };
                let anchored = format!("^{body}$");
                CompiledMapping { to_model, pattern: Regex::new(&anchored).ok() }
            })
            .collect();
        Self { mappings }
    }

    pub fn empty() -> Self {
        Self { mappings: Vec::new() }
    }

    /// Returns the upstream model name to use, or the input unchanged if no
    /// mapping matches (or all failed to compile).
    pub fn map(&self, request_model: &str) -> String {
        for mapping in &self.mappings {
            if let Some(pattern) = &mapping.pattern {
                if pattern.is_match(request_model) {
                    return mapping.to_model.clone();
                }
            }
        }
        request_model.to_string()
    }
}

/// Implemented by outbound response/stream-chunk types so the orchestrator
/// can re-stamp the client-visible model name after mapping, without ever
/// exposing the rewritten upstream name downstream.
pub trait ModelStampable {
    fn set_visible_model(&mut self, model: &str);
}
