//! Token-usage forecasting.
//!
//! | Submodule    | What it owns                                              |
//! |--------------|-----------------------------------------------------------|
//! | `weights`    | [`ForecastWeights`]: per-message delta and the refit rule |
//! | `forecaster` | [`UsageForecaster`]: forecasts, samples, model state      |
//! | `accuracy`   | [`ForecastAccuracy`]: error metrics over stored samples   |
//!
//! The per-message token delta is a weighted blend of four estimates:
//! recent tokens/message scaled by task complexity, the average tool-result
//! size, the memory-op rate in tokens, and recent tokens/message scaled by a
//! time-of-day factor.

use chrono::{DateTime, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};

mod accuracy;
mod forecaster;
mod weights;

pub use accuracy::ForecastAccuracy;
pub use forecaster::UsageForecaster;
pub use weights::ForecastWeights;

/// How demanding the current task is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskComplexity {
    Simple,
    #[default]
    Medium,
    Complex,
}

impl TaskComplexity {
    pub fn multiplier(&self) -> f64 {
        match self {
            TaskComplexity::Simple => 1.0,
            TaskComplexity::Medium => 1.5,
            TaskComplexity::Complex => 2.2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskComplexity::Simple => "simple",
            TaskComplexity::Medium => "medium",
            TaskComplexity::Complex => "complex",
        }
    }

    /// Guess the complexity of a task from its description.
    pub fn classify(description: &str) -> Self {
        let text = description.to_lowercase();

        if text.contains("architect")
            || text.contains("redesign")
            || text.contains("migrat")
            || text.contains("refactor")
            || text.contains("rewrite")
            || text.contains("distributed")
            || text.contains("concurren")
            || text.contains("security audit")
            || text.contains("performance")
        {
            return TaskComplexity::Complex;
        }

        if text.contains("typo")
            || text.contains("rename")
            || text.contains("bump")
            || text.contains("format")
            || text.contains("comment")
            || text.contains("readme")
            || text.contains("docs")
            || text.contains("lint")
        {
            return TaskComplexity::Simple;
        }

        TaskComplexity::Medium
    }
}

impl std::fmt::Display for TaskComplexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse time-of-day bucket; sessions run differently through the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeOfDay::Morning,
            12..=17 => TimeOfDay::Afternoon,
            18..=21 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            TimeOfDay::Morning => 0.9,
            TimeOfDay::Afternoon => 1.1,
            TimeOfDay::Evening => 1.0,
            TimeOfDay::Night => 0.8,
        }
    }
}

/// Features describing a session at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub current_tokens: u64,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub recent_tokens_per_message: f64,
    #[serde(default)]
    pub task_complexity: TaskComplexity,
    /// Local hour, 0-23
    #[serde(default)]
    pub hour: u32,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub avg_tool_result_tokens: f64,
    /// Memory-like operations per message
    #[serde(default)]
    pub memory_op_rate: f64,
    /// Overrides the configured wall-clock minutes per message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes_per_message: Option<f64>,
}

impl SessionSnapshot {
    /// Snapshot at `current_tokens`, stamped with the local hour.
    pub fn new(current_tokens: u64) -> Self {
        Self {
            current_tokens,
            message_count: 0,
            recent_tokens_per_message: 0.0,
            task_complexity: TaskComplexity::default(),
            hour: Local::now().hour(),
            actor: None,
            avg_tool_result_tokens: 0.0,
            memory_op_rate: 0.0,
            minutes_per_message: None,
        }
    }

    pub fn time_of_day(&self) -> TimeOfDay {
        TimeOfDay::from_hour(self.hour)
    }
}

/// One observed outcome: the features at some message plus the real token
/// counts 5 and 10 messages later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub recorded_at: DateTime<Utc>,
    pub features: SessionSnapshot,
    pub actual_after_5: u64,
    pub actual_after_10: u64,
}

impl TrainingSample {
    /// Observed tokens per message over the 5-message horizon.
    pub fn observed_delta(&self) -> f64 {
        self.actual_after_5.saturating_sub(self.features.current_tokens) as f64 / 5.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Continue,
    ExtractSoon,
    ExtractNow,
    Emergency,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Continue => "continue",
            Recommendation::ExtractSoon => "extract_soon",
            Recommendation::ExtractNow => "extract_now",
            Recommendation::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub predicted_after_5: u64,
    pub predicted_after_10: u64,
    /// Estimated per-message token delta behind the predictions
    pub tokens_per_message: f64,
    /// `Some(0)` once the threshold is reached; `None` when usage is flat
    pub messages_to_warning: Option<u64>,
    pub messages_to_emergency: Option<u64>,
    pub minutes_to_warning: Option<f64>,
    pub confidence: f64,
    pub recommendation: Recommendation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_complex_keywords() {
        for text in &["Refactor the auth layer", "Migrate to Postgres", "Redesign caching"] {
            assert_eq!(TaskComplexity::classify(text), TaskComplexity::Complex, "{:?}", text);
        }
    }

    #[test]
    fn test_classify_simple_keywords() {
        for text in &["Fix typo in README", "Rename variable", "Bump version"] {
            assert_eq!(TaskComplexity::classify(text), TaskComplexity::Simple, "{:?}", text);
        }
    }

    #[test]
    fn test_classify_defaults_to_medium() {
        assert_eq!(TaskComplexity::classify("Add pagination to list endpoint"), TaskComplexity::Medium);
        assert_eq!(TaskComplexity::classify(""), TaskComplexity::Medium);
    }

    #[test]
    fn test_time_of_day_buckets() {
        assert_eq!(TimeOfDay::from_hour(6), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(12), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(21), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(23), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_hour(3), TimeOfDay::Night);
        assert!((TimeOfDay::Afternoon.multiplier() - 1.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_observed_delta_never_negative() {
        let sample = TrainingSample {
            recorded_at: Utc::now(),
            features: SessionSnapshot::new(10_000),
            actual_after_5: 4_000,
            actual_after_10: 4_000,
        };
        assert_eq!(sample.observed_delta(), 0.0);
    }

    #[test]
    fn test_recommendation_serializes_snake_case() {
        let json = serde_json::to_string(&Recommendation::ExtractSoon).unwrap();
        assert_eq!(json, "\"extract_soon\"");
    }
}
