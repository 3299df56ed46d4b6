//! Threshold limit parsing (`"85%"` or an absolute token count).

use anyhow::{Context, Result};

/// A token threshold expressed relative to the window capacity or as an
/// absolute token count.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextLimit {
    /// Percentage of the window capacity (e.g., 85%)
    Percentage(f64),
    /// Absolute token count
    Absolute(u64),
}

impl ContextLimit {
    /// Resolve the threshold in tokens for a window of `capacity` tokens.
    pub fn effective_limit(&self, capacity: u64) -> u64 {
        match self {
            ContextLimit::Percentage(pct) => (capacity as f64 * pct / 100.0).round() as u64,
            ContextLimit::Absolute(tokens) => *tokens,
        }
    }
}

impl std::fmt::Display for ContextLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextLimit::Percentage(pct) => write!(f, "{}%", pct),
            ContextLimit::Absolute(tokens) => write!(f, "{}", tokens),
        }
    }
}

impl std::str::FromStr for ContextLimit {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let text = raw.trim();
        anyhow::ensure!(!text.is_empty(), "threshold is empty");

        let Some(pct) = text.strip_suffix('%') else {
            let tokens: u64 = text
                .parse()
                .with_context(|| format!("'{}' is neither a percentage nor a token count", text))?;
            anyhow::ensure!(tokens > 0, "absolute threshold must be at least one token");
            return Ok(ContextLimit::Absolute(tokens));
        };

        let pct: f64 = pct
            .trim()
            .parse()
            .with_context(|| format!("'{}' is not a valid percentage", text))?;
        anyhow::ensure!(
            pct > 0.0 && pct <= 100.0,
            "percentage threshold must be in (0, 100], got {}",
            pct
        );
        Ok(ContextLimit::Percentage(pct))
    }
}

/// Parse a threshold such as `"85%"` or `"170000"`.
pub fn parse_context_limit(raw: &str) -> Result<ContextLimit> {
    raw.parse()
}
