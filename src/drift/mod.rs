//! Context drift detection.
//!
//! | Submodule  | What it owns                                              |
//! |------------|-----------------------------------------------------------|
//! | `detector` | [`DriftDetector`]: tracked history and indicator scoring  |
//! | `probe`    | [`ResourceProbe`]: existence checks for obsolete refs     |
//!
//! Indicator points by severity: critical 40, high 25, medium 15, low 5,
//! summed and capped at 100.

use serde::{Deserialize, Serialize};

mod detector;
mod probe;

pub use detector::DriftDetector;
pub use probe::{AssumeExists, FsProbe, ResourceProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftCategory {
    ResourceStaleness,
    TaskSwitch,
    ObsoleteReference,
    ActorSwitch,
    SessionDepth,
}

impl DriftCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftCategory::ResourceStaleness => "resource_staleness",
            DriftCategory::TaskSwitch => "task_switch",
            DriftCategory::ObsoleteReference => "obsolete_reference",
            DriftCategory::ActorSwitch => "actor_switch",
            DriftCategory::SessionDepth => "session_depth",
        }
    }
}

impl std::fmt::Display for DriftCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Contribution of one indicator at this severity to the drift score.
    pub fn points(&self) -> u32 {
        match self {
            Severity::None => 0,
            Severity::Low => 5,
            Severity::Medium => 15,
            Severity::High => 25,
            Severity::Critical => 40,
        }
    }

    /// Overall severity for a drift score.
    pub fn from_score(score: u32) -> Self {
        match score {
            80.. => Severity::Critical,
            60..=79 => Severity::High,
            30..=59 => Severity::Medium,
            10..=29 => Severity::Low,
            _ => Severity::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One reason the accumulated context may no longer fit the current work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftIndicator {
    pub category: DriftCategory,
    pub severity: Severity,
    pub description: String,
    pub recommendation: String,
    /// Tokens this indicator suggests are wasted
    pub estimated_waste: u64,
}

/// Result of one detection cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriftReport {
    pub indicators: Vec<DriftIndicator>,
    /// 0-100
    pub drift_score: u32,
    pub severity: Severity,
    pub should_clear_context: bool,
    pub estimated_token_waste: u64,
    pub message_count: u64,
}

impl DriftReport {
    pub fn indicator(&self, category: DriftCategory) -> Option<&DriftIndicator> {
        self.indicators.iter().find(|i| i.category == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_buckets() {
        assert_eq!(Severity::from_score(0), Severity::None);
        assert_eq!(Severity::from_score(9), Severity::None);
        assert_eq!(Severity::from_score(10), Severity::Low);
        assert_eq!(Severity::from_score(30), Severity::Medium);
        assert_eq!(Severity::from_score(60), Severity::High);
        assert_eq!(Severity::from_score(79), Severity::High);
        assert_eq!(Severity::from_score(80), Severity::Critical);
        assert_eq!(Severity::from_score(100), Severity::Critical);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::None);
    }

    #[test]
    fn test_category_names() {
        let json = serde_json::to_string(&DriftCategory::ObsoleteReference).unwrap();
        assert_eq!(json, "\"obsolete_reference\"");
        assert_eq!(DriftCategory::TaskSwitch.to_string(), "task_switch");
    }
}
