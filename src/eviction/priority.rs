//! Priority taxonomy and the tool-result records it classifies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Four-level eviction priority. Declaration order is most to least important.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Security, test and build failures. Never evicted.
    Critical,
    /// Recent edits, API/database results, test outcomes.
    High,
    /// Searches, lint results.
    #[default]
    Medium,
    /// Ephemeral logs and debug output.
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// Parse a priority name, falling back to [`Priority::Medium`].
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => anyhow::bail!(
                "Invalid priority '{}'. Valid values: critical, high, medium, low",
                s
            ),
        }
    }
}

/// Built-in tool identity -> priority table.
pub(crate) const DEFAULT_PRIORITIES: &[(&str, Priority)] = &[
    // Failures the session must not forget
    ("security_scan", Priority::Critical),
    ("security_audit", Priority::Critical),
    ("test_failure", Priority::Critical),
    ("build_failure", Priority::Critical),
    ("compile_error", Priority::Critical),
    // Work product and external state
    ("edit_file", Priority::High),
    ("write_file", Priority::High),
    ("multi_edit", Priority::High),
    ("api_call", Priority::High),
    ("http_request", Priority::High),
    ("database_query", Priority::High),
    ("sql_query", Priority::High),
    ("run_tests", Priority::High),
    ("test_results", Priority::High),
    // Re-derivable lookups
    ("grep", Priority::Medium),
    ("search", Priority::Medium),
    ("glob", Priority::Medium),
    ("find_files", Priority::Medium),
    ("web_search", Priority::Medium),
    ("read_file", Priority::Medium),
    ("lint", Priority::Medium),
    ("clippy", Priority::Medium),
    // Noise
    ("log", Priority::Low),
    ("debug", Priority::Low),
    ("list_files", Priority::Low),
    ("bash_output", Priority::Low),
    ("status", Priority::Low),
];

/// One retained tool invocation result awaiting a possible clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    /// Tool identity (e.g. `edit_file`)
    pub tool: String,
    /// When the result entered the context
    pub timestamp: DateTime<Utc>,
    /// Estimated token cost of the result
    pub token_cost: u64,
    /// Priority class. `None` on input means "resolve from the tool identity";
    /// the filter always fills it in on output.
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Actor that invoked the tool
    #[serde(default)]
    pub actor: Option<String>,
    /// Free-text context (arguments, file path, ...)
    #[serde(default)]
    pub context: String,
}

impl ToolResultRecord {
    pub fn new(tool: impl Into<String>, token_cost: u64) -> Self {
        Self {
            tool: tool.into(),
            timestamp: Utc::now(),
            token_cost,
            priority: None,
            actor: None,
            context: String::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_parse() {
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::Critical);
        assert_eq!(" HIGH ".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
        assert_eq!(Priority::parse_lenient("urgent"), Priority::Medium);
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::Medium < Priority::Low);
    }

    #[test]
    fn test_default_table_has_no_duplicates() {
        let mut names: Vec<&str> = DEFAULT_PRIORITIES.iter().map(|(n, _)| *n).collect();
        let before = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[test]
    fn test_record_deserializes_without_optional_fields() {
        let json = r#"{"tool":"grep","timestamp":"2026-01-01T00:00:00Z","token_cost":120}"#;
        let record: ToolResultRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.tool, "grep");
        assert!(record.priority.is_none());
        assert!(record.context.is_empty());
    }
}
