use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::serde_utils::{duration_millis, duration_opt_millis};
use crate::model::Topic;

/// Broadcast topic the parent's raw output is mirrored on.
pub const DEFAULT_BROADCAST_TOPIC: &str = "claude-output";

/// Tuning knobs shared by every aggregator opened with this config.
///
/// All fields have defaults, so a config file only needs to name what it
/// changes:
///
/// ```toml
/// dedup_window_ms = 250
/// broadcast_topics = ["claude-output", "legacy-output"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Width of the timestamp bucket used for fingerprinting.
    #[serde(rename = "dedup_window_ms", with = "duration_millis")]
    pub dedup_window: Duration,

    /// Fingerprints remembered per session. The oldest are forgotten first.
    pub dedup_history: usize,

    /// How long after an accepted start event an otherwise unattributable
    /// broadcast event is still accepted.
    #[serde(rename = "fallback_window_ms", with = "duration_millis")]
    pub fallback_window: Duration,

    /// Trailing characters of the parent session id searched for in broadcast text.
    pub session_fragment_len: usize,

    /// Time the live subscription is kept after a terminal state so late
    /// stragglers still land. `None` keeps it until `close()`.
    #[serde(rename = "grace_period_ms", with = "duration_opt_millis")]
    pub grace_period: Option<Duration>,

    /// Per-aggregator inbound queue size. Overflow drops events.
    pub channel_capacity: usize,

    /// Generic topics consulted when fallback listening is enabled.
    pub broadcast_topics: Vec<String>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_millis(100),
            dedup_history: 4096,
            fallback_window: Duration::from_millis(2000),
            session_fragment_len: 8,
            grace_period: Some(Duration::from_millis(5000)),
            channel_capacity: 1024,
            broadcast_topics: vec![DEFAULT_BROADCAST_TOPIC.to_string()],
        }
    }
}

impl AggregatorConfig {
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Toml {
            path: origin.to_string(),
            source,
        })
    }

    /// Load a TOML config file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    pub fn broadcast_topics(&self) -> Vec<Topic> {
        self.broadcast_topics.iter().map(Topic::broadcast).collect()
    }

    pub fn with_grace_period(mut self, grace_period: Option<Duration>) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_fallback_window(mut self, window: Duration) -> Self {
        self.fallback_window = window;
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }
}
