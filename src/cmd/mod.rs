//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled               |
//! |------------|--------------------------------|
//! | `report`   | `Report`                       |
//! | `patterns` | `Patterns`, `Predict`, `Prune` |
//! | `model`    | `Model`                        |
//! | `config`   | `Config`                       |

pub mod config;
pub mod model;
pub mod patterns;
pub mod report;

pub use config::cmd_config;
pub use model::cmd_model;
pub use patterns::{cmd_patterns, cmd_predict, cmd_prune};
pub use report::cmd_report;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use ctxwatch::config::{EngineConfig, default_data_dir};
use std::path::{Path, PathBuf};

/// `--data-dir`, else `~/.ctxwatch`.
pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Ok(default_data_dir()?),
    }
}

pub fn load_config(data_dir: &Path) -> Result<EngineConfig> {
    EngineConfig::load_or_default(data_dir)
        .with_context(|| format!("Failed to load configuration from {}", data_dir.display()))
}

/// Parse a range bound. A bare date is the start of that day, or its last
/// second when `end_of_day` is set.
pub fn parse_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}': expected RFC 3339 or YYYY-MM-DD", raw))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .with_context(|| format!("Invalid date '{}'", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bound_date_only() {
        let start = parse_bound("2026-03-01", false).unwrap();
        let end = parse_bound("2026-03-01", true).unwrap();
        assert_eq!(start.to_rfc3339(), "2026-03-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2026-03-01T23:59:59+00:00");
    }

    #[test]
    fn test_parse_bound_rfc3339() {
        let ts = parse_bound("2026-03-01T10:30:00+02:00", false).unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-03-01T08:30:00+00:00");
    }

    #[test]
    fn test_parse_bound_rejects_garbage() {
        assert!(parse_bound("last tuesday", false).is_err());
    }
}
