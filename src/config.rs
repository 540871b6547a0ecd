//! Configuration: defaults, optionally overlaid by a TOML file on disk.
//!
//! `Config::load` reads the path from `SWITCHBOARD_CONFIG` (falling back to
//! `switchboard.toml`); if the file exists its contents are parsed over the
//! defaults, otherwise the defaults are written out so the file can be
//! hand-edited afterward.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub window_seconds: u64,
    pub debug_enabled: bool,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self { window_seconds: 600, debug_enabled: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundRobinConfig {
    pub max_score: f64,
    pub min_score: f64,
    pub scale: f64,
    pub request_count_cap: u64,
    pub inactivity_half_life_min: f64,
}

impl Default for RoundRobinConfig {
    fn default() -> Self {
        Self { max_score: 150.0, min_score: 10.0, scale: 150.0, request_count_cap: 1000, inactivity_half_life_min: 5.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorAwareConfig {
    pub max_score: f64,
    pub base_penalty: f64,
    pub penalty_per_consecutive_failure: f64,
    pub cooldown_min: f64,
}

impl Default for ErrorAwareConfig {
    fn default() -> Self {
        Self { max_score: 200.0, base_penalty: 40.0, penalty_per_consecutive_failure: 30.0, cooldown_min: 5.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionAwareConfig {
    pub max_score: f64,
}

impl Default for ConnectionAwareConfig {
    fn default() -> Self {
        Self { max_score: 50.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceAwareConfig {
    pub max_boost: f64,
}

impl Default for TraceAwareConfig {
    fn default() -> Self {
        Self { max_boost: 1000.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub half_open_threshold: u64,
    pub open_cooldown_sec: u64,
    pub half_open_successes_needed: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self { half_open_threshold: 3, open_cooldown_sec: 60, half_open_successes_needed: 1 }
    }
}

impl From<CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(s: CircuitBreakerSettings) -> Self {
        CircuitBreakerConfig { half_open_threshold: s.half_open_threshold, open_cooldown_secs: s.open_cooldown_sec, half_open_successes_needed: s.half_open_successes_needed, ..Default::default() }
    }
}

/// Top-level configuration for the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub load_balancer: LoadBalancerConfig,
    pub round_robin: RoundRobinConfig,
    pub error_aware: ErrorAwareConfig,
    pub connection_aware: ConnectionAwareConfig,
    pub trace_aware: TraceAwareConfig,
    pub circuit_breaker: CircuitBreakerSettings,
}

const DEFAULT_CONFIG_PATH: &str = "switchboard.toml";
const CONFIG_PATH_ENV: &str = "SWITCHBOARD_CONFIG";

impl Config {
    /// Resolves the config file path from `SWITCHBOARD_CONFIG`, falling back
    /// to `switchboard.toml` in the current directory.
    pub fn config_path() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Loads config from the resolved path if it exists, parsing it over the
    /// defaults. If the file is missing, writes the defaults out to that path
    /// and returns them, so the file is always present for a later edit.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Same as `load`, but against an explicit path. Useful for tests and for
    /// callers that resolve the path themselves.
    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let defaults = Self::default();
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, toml::to_string_pretty(&defaults)?)?;
            Ok(defaults)
        }
    }
}
