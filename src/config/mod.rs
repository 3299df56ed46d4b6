//! Engine configuration.
//!
//! Every threshold the engine uses is supplied at construction time through
//! [`EngineConfig`]. Hosts usually build it in code; it can also be read from
//! a `ctxwatch.toml` in the data directory:
//!
//! ```toml
//! [storage]
//! max_clear_events = 100
//! flush_every = 10
//!
//! [capacity]
//! capacity = 200000
//! warning_limit = "85%"
//! emergency_limit = "95%"
//!
//! [drift]
//! stale_after_messages = 50
//! task_switch_threshold = 5
//!
//! [eviction]
//! medium_recent_limit = 10
//! never_filter = ["security_scan"]
//!
//! [eviction.priority_overrides]
//! web_fetch = "low"
//! ```
//!
//! Missing keys take the documented defaults; unknown keys are ignored.

mod limit;

pub use limit::{ContextLimit, parse_context_limit};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::EngineError;

/// Name of the per-user data directory under `$HOME`.
pub const DEFAULT_DATA_DIR: &str = ".ctxwatch";

/// Name of the optional config file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "ctxwatch.toml";

/// Default hard token capacity of the context window.
pub const DEFAULT_CAPACITY: u64 = 200_000;

/// Top-level configuration for the context engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub eviction: EvictionConfig,
}

/// Durable storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for logs and model state (default: `~/.ctxwatch`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Rolling cap on retained clear events
    #[serde(default = "default_max_clear_events")]
    pub max_clear_events: usize,
    /// Rolling cap on retained memory-like operations
    #[serde(default = "default_max_access_ops")]
    pub max_access_ops: usize,
    /// Rolling cap on finalized session records
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Flush dirty logs after this many writes (1 = every write)
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
}

fn default_max_clear_events() -> usize {
    100
}

fn default_max_access_ops() -> usize {
    500
}

fn default_max_sessions() -> usize {
    100
}

fn default_flush_every() -> usize {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_clear_events: default_max_clear_events(),
            max_access_ops: default_max_access_ops(),
            max_sessions: default_max_sessions(),
            flush_every: default_flush_every(),
        }
    }
}

/// Window capacity and the two clearing thresholds derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Hard token capacity of the context window
    #[serde(default = "default_capacity")]
    pub capacity: u64,
    /// Warning threshold, percentage or absolute tokens
    #[serde(default = "default_warning_limit")]
    pub warning_limit: String,
    /// Emergency threshold, percentage or absolute tokens
    #[serde(default = "default_emergency_limit")]
    pub emergency_limit: String,
}

fn default_capacity() -> u64 {
    DEFAULT_CAPACITY
}

fn default_warning_limit() -> String {
    "85%".to_string()
}

fn default_emergency_limit() -> String {
    "95%".to_string()
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            warning_limit: default_warning_limit(),
            emergency_limit: default_emergency_limit(),
        }
    }
}

impl CapacityConfig {
    /// Capacity-derived configuration with the default 85%/95% limits.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Token count at which extraction should start (default 85%).
    pub fn warning_threshold(&self) -> u64 {
        resolve_limit(&self.warning_limit, 85.0, self.capacity)
    }

    /// Token count at which the window is considered full (default 95%).
    pub fn emergency_threshold(&self) -> u64 {
        resolve_limit(&self.emergency_limit, 95.0, self.capacity)
    }
}

fn resolve_limit(raw: &str, fallback_pct: f64, capacity: u64) -> u64 {
    parse_context_limit(raw)
        .unwrap_or(ContextLimit::Percentage(fallback_pct))
        .effective_limit(capacity)
}

/// Access pattern tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Records untouched for longer than this are pruned
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Width of the "recent accesses" window
    #[serde(default = "default_recent_window_days")]
    pub recent_window_days: i64,
    /// Minimum prediction score (0-100) for a candidate to be returned
    #[serde(default = "default_prediction_cutoff")]
    pub prediction_cutoff: f64,
    /// Maximum number of predictions returned
    #[serde(default = "default_prediction_limit")]
    pub prediction_limit: usize,
}

fn default_retention_days() -> i64 {
    90
}

fn default_recent_window_days() -> i64 {
    7
}

fn default_prediction_cutoff() -> f64 {
    20.0
}

fn default_prediction_limit() -> usize {
    10
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            recent_window_days: default_recent_window_days(),
            prediction_cutoff: default_prediction_cutoff(),
            prediction_limit: default_prediction_limit(),
        }
    }
}

/// Usage forecaster settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Assumed wall-clock minutes per message for time-to-threshold
    #[serde(default = "default_minutes_per_message")]
    pub minutes_per_message: f64,
    /// Re-fit the weights every N recorded samples
    #[serde(default = "default_retrain_every")]
    pub retrain_every: usize,
    /// Minimum stored samples before a re-fit is attempted
    #[serde(default = "default_min_samples_for_fit")]
    pub min_samples_for_fit: usize,
    /// FIFO cap on stored training samples
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Run re-fits on the tokio blocking pool when a runtime is available
    #[serde(default = "default_background_refit")]
    pub background_refit: bool,
}

fn default_minutes_per_message() -> f64 {
    2.0
}

fn default_retrain_every() -> usize {
    50
}

fn default_min_samples_for_fit() -> usize {
    50
}

fn default_max_samples() -> usize {
    1000
}

fn default_background_refit() -> bool {
    true
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            minutes_per_message: default_minutes_per_message(),
            retrain_every: default_retrain_every(),
            min_samples_for_fit: default_min_samples_for_fit(),
            max_samples: default_max_samples(),
            background_refit: default_background_refit(),
        }
    }
}

/// Drift detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// A resource is stale once untouched for this many messages
    #[serde(default = "default_stale_after_messages")]
    pub stale_after_messages: u64,
    /// How many recent task / actor events are considered for switching
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Distinct tasks in the window that trigger a task-switch indicator
    #[serde(default = "default_task_switch_threshold")]
    pub task_switch_threshold: usize,
    /// Distinct actors in the window that trigger an actor-switch indicator
    #[serde(default = "default_actor_switch_threshold")]
    pub actor_switch_threshold: usize,
    /// Message count beyond which session depth is flagged (medium)
    #[serde(default = "default_session_depth_threshold")]
    pub session_depth_threshold: u64,
    /// Message count beyond which session depth is high
    #[serde(default = "default_session_depth_high")]
    pub session_depth_high: u64,
    /// Message count beyond which session depth is critical
    #[serde(default = "default_session_depth_critical")]
    pub session_depth_critical: u64,
}

fn default_stale_after_messages() -> u64 {
    50
}

fn default_history_window() -> usize {
    10
}

fn default_task_switch_threshold() -> usize {
    5
}

fn default_actor_switch_threshold() -> usize {
    4
}

fn default_session_depth_threshold() -> u64 {
    200
}

fn default_session_depth_high() -> u64 {
    250
}

fn default_session_depth_critical() -> u64 {
    300
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            stale_after_messages: default_stale_after_messages(),
            history_window: default_history_window(),
            task_switch_threshold: default_task_switch_threshold(),
            actor_switch_threshold: default_actor_switch_threshold(),
            session_depth_threshold: default_session_depth_threshold(),
            session_depth_high: default_session_depth_high(),
            session_depth_critical: default_session_depth_critical(),
        }
    }
}

/// Eviction filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Medium-priority records kept (newest first) below the warning threshold
    #[serde(default = "default_medium_recent_limit")]
    pub medium_recent_limit: usize,
    /// Low-priority records kept (newest first) below the warning threshold
    #[serde(default = "default_low_recent_limit")]
    pub low_recent_limit: usize,
    /// Tool identities that are always retained
    #[serde(default)]
    pub never_filter: Vec<String>,
    /// Tool identity -> priority name; unknown names resolve to medium
    #[serde(default)]
    pub priority_overrides: BTreeMap<String, String>,
}

fn default_medium_recent_limit() -> usize {
    10
}

fn default_low_recent_limit() -> usize {
    3
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            medium_recent_limit: default_medium_recent_limit(),
            low_recent_limit: default_low_recent_limit(),
            never_filter: Vec::new(),
            priority_overrides: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            EngineError::StorageUnavailable {
                path: path.to_path_buf(),
                source,
            }
        })?;
        toml::from_str(&content).map_err(|source| EngineError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `ctxwatch.toml` from `dir`, or defaults when it doesn't exist.
    ///
    /// The returned config always points its storage at `dir`.
    pub fn load_or_default(dir: &Path) -> Result<Self, EngineError> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        let mut config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            Self::default()
        };
        if config.storage.data_dir.is_none() {
            config.storage.data_dir = Some(dir.to_path_buf());
        }
        Ok(config)
    }

    /// Default configuration rooted at an explicit data directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.data_dir = Some(dir.into());
        config
    }

    /// Resolve the data directory, falling back to `~/.ctxwatch`.
    pub fn data_dir(&self) -> Result<PathBuf, EngineError> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    /// Serialize to TOML for display.
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        use anyhow::Context;
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Check the configuration and return human-readable warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.capacity.capacity == 0 {
            warnings.push("capacity is 0: the engine will refuse to open".to_string());
        }
        for (name, raw) in [
            ("warning_limit", &self.capacity.warning_limit),
            ("emergency_limit", &self.capacity.emergency_limit),
        ] {
            if let Err(e) = parse_context_limit(raw) {
                warnings.push(format!("Invalid {} '{}': {}", name, raw, e));
            }
        }
        if self.capacity.warning_threshold() >= self.capacity.emergency_threshold() {
            warnings.push(format!(
                "warning threshold ({}) should be below emergency threshold ({})",
                self.capacity.warning_threshold(),
                self.capacity.emergency_threshold()
            ));
        }
        if self.storage.flush_every == 0 {
            warnings.push("flush_every = 0 is treated as 1".to_string());
        }
        if self.forecast.minutes_per_message <= 0.0 {
            warnings.push("minutes_per_message must be positive".to_string());
        }
        if self.drift.session_depth_threshold > self.drift.session_depth_high
            || self.drift.session_depth_high > self.drift.session_depth_critical
        {
            warnings.push(
                "session depth thresholds should be ordered: threshold <= high <= critical"
                    .to_string(),
            );
        }
        for (tool, priority) in &self.eviction.priority_overrides {
            if priority.parse::<crate::eviction::Priority>().is_err() {
                warnings.push(format!(
                    "Unknown priority '{}' for tool '{}' (treated as medium)",
                    priority, tool
                ));
            }
        }

        warnings
    }
}

/// `~/.ctxwatch`
pub fn default_data_dir() -> Result<PathBuf, EngineError> {
    let home = dirs::home_dir().ok_or(EngineError::NoHomeDir)?;
    Ok(home.join(DEFAULT_DATA_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.capacity.capacity, 200_000);
        assert_eq!(config.capacity.warning_threshold(), 170_000);
        assert_eq!(config.capacity.emergency_threshold(), 190_000);
        assert_eq!(config.storage.flush_every, 10);
        assert_eq!(config.access.retention_days, 90);
        assert_eq!(config.forecast.max_samples, 1000);
        assert_eq!(config.drift.stale_after_messages, 50);
        assert_eq!(config.eviction.medium_recent_limit, 10);
        assert_eq!(config.eviction.low_recent_limit, 3);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
[capacity]
capacity = 100000
warning_limit = "80000"

[drift]
task_switch_threshold = 3
some_future_key = true

[eviction.priority_overrides]
web_fetch = "low"
"#;
        let config: EngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.capacity.warning_threshold(), 80_000);
        assert_eq!(config.capacity.emergency_threshold(), 95_000);
        assert_eq!(config.drift.task_switch_threshold, 3);
        assert_eq!(config.drift.actor_switch_threshold, 4);
        assert_eq!(
            config.eviction.priority_overrides.get("web_fetch"),
            Some(&"low".to_string())
        );
    }

    #[test]
    fn test_invalid_limit_falls_back_and_warns() {
        let mut config = EngineConfig::default();
        config.capacity.warning_limit = "lots".to_string();
        assert_eq!(config.capacity.warning_threshold(), 170_000);
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("warning_limit")));
    }

    #[test]
    fn test_unknown_priority_override_warns() {
        let mut config = EngineConfig::default();
        config
            .eviction
            .priority_overrides
            .insert("bash".into(), "urgent".into());
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("urgent")));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.data_dir().unwrap(), dir.path());
        assert_eq!(config.capacity.capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn test_load_or_default_reads_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[storage]\nflush_every = 1\n",
        )
        .unwrap();
        let config = EngineConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.storage.flush_every, 1);
        assert_eq!(config.storage.max_clear_events, 100);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[capacity\n").unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(err, EngineError::ConfigParse { .. }));
    }

    #[test]
    fn test_toml_round_trip_keeps_thresholds() {
        let mut config = EngineConfig::default();
        config.capacity.capacity = 128_000;
        let text = config.to_toml_string().unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.capacity.warning_threshold(), 108_800);
    }
}
