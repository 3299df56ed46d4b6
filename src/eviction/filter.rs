//! Threshold-sensitive retention of tool results during a clear.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::priority::{DEFAULT_PRIORITIES, Priority, ToolResultRecord};
use crate::config::{CapacityConfig, EvictionConfig};

/// Why a record was kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetainReason {
    NeverFilter,
    Critical,
    BelowEmergency,
    RecentWindow,
}

/// Why a record was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// High priority, but the window is at or past the emergency threshold.
    EmergencyThreshold,
    /// Medium/low priority and the window is at or past the warning threshold.
    WarningThreshold,
    /// Medium/low priority and older than the per-class recent window.
    OutsideRecentWindow,
}

/// A discarded record together with the rule that dropped it.
#[derive(Debug, Clone, PartialEq)]
pub struct Discarded {
    pub record: ToolResultRecord,
    pub reason: DiscardReason,
}

/// Count and token totals for one priority class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStats {
    pub count_before: usize,
    pub count_after: usize,
    pub tokens_before: u64,
    pub tokens_after: u64,
}

/// Per-priority before/after totals for one filter run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub critical: BucketStats,
    pub high: BucketStats,
    pub medium: BucketStats,
    pub low: BucketStats,
}

impl FilterStats {
    pub fn bucket(&self, priority: Priority) -> &BucketStats {
        match priority {
            Priority::Critical => &self.critical,
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }

    fn bucket_mut(&mut self, priority: Priority) -> &mut BucketStats {
        match priority {
            Priority::Critical => &mut self.critical,
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }

    fn buckets(&self) -> impl Iterator<Item = &BucketStats> {
        [&self.critical, &self.high, &self.medium, &self.low].into_iter()
    }

    pub fn tokens_before(&self) -> u64 {
        self.buckets().map(|b| b.tokens_before).sum()
    }

    pub fn tokens_after(&self) -> u64 {
        self.buckets().map(|b| b.tokens_after).sum()
    }

    pub fn tokens_reclaimed(&self) -> u64 {
        self.tokens_before().saturating_sub(self.tokens_after())
    }

    pub fn entries_removed(&self) -> usize {
        self.buckets()
            .map(|b| b.count_before.saturating_sub(b.count_after))
            .sum()
    }

    /// One line per non-empty bucket, for logs and reports.
    pub fn summary(&self) -> String {
        Priority::ALL
            .iter()
            .filter(|p| self.bucket(**p).count_before > 0)
            .map(|p| {
                let b = self.bucket(*p);
                format!(
                    "{}: {}/{} kept, {} -> {} tokens",
                    p, b.count_after, b.count_before, b.tokens_before, b.tokens_after
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of one filter run. `retained` and `discarded` preserve input order
/// and carry their resolved priority.
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub retained: Vec<ToolResultRecord>,
    pub discarded: Vec<Discarded>,
    pub stats: FilterStats,
}

/// Decides which tool results survive a context clear.
#[derive(Debug, Clone)]
pub struct EvictionFilter {
    warning_threshold: u64,
    emergency_threshold: u64,
    medium_recent_limit: usize,
    low_recent_limit: usize,
    never_filter: HashSet<String>,
    overrides: HashMap<String, Priority>,
    defaults: HashMap<&'static str, Priority>,
}

impl Default for EvictionFilter {
    fn default() -> Self {
        Self::new(&CapacityConfig::default(), &EvictionConfig::default())
    }
}

impl EvictionFilter {
    pub fn new(capacity: &CapacityConfig, config: &EvictionConfig) -> Self {
        let overrides = config
            .priority_overrides
            .iter()
            .map(|(tool, name)| (tool.clone(), Priority::parse_lenient(name)))
            .collect();

        Self {
            warning_threshold: capacity.warning_threshold(),
            emergency_threshold: capacity.emergency_threshold(),
            medium_recent_limit: config.medium_recent_limit,
            low_recent_limit: config.low_recent_limit,
            never_filter: config.never_filter.iter().cloned().collect(),
            overrides,
            defaults: DEFAULT_PRIORITIES.iter().copied().collect(),
        }
    }

    /// Add a tool identity that is always retained.
    pub fn never_filter(mut self, tool: impl Into<String>) -> Self {
        self.never_filter.insert(tool.into());
        self
    }

    /// Override the priority of a tool identity.
    pub fn with_override(mut self, tool: impl Into<String>, priority: Priority) -> Self {
        self.overrides.insert(tool.into(), priority);
        self
    }

    pub fn warning_threshold(&self) -> u64 {
        self.warning_threshold
    }

    pub fn emergency_threshold(&self) -> u64 {
        self.emergency_threshold
    }

    /// Resolve a tool identity: override map, then built-in table, then medium.
    pub fn resolve_priority(&self, tool: &str) -> Priority {
        self.overrides
            .get(tool)
            .or_else(|| self.defaults.get(tool))
            .copied()
            .unwrap_or_default()
    }

    fn priority_of(&self, record: &ToolResultRecord) -> Priority {
        record
            .priority
            .unwrap_or_else(|| self.resolve_priority(&record.tool))
    }

    /// Split `records` into retained and discarded sets for a clear at
    /// `current_tokens`. Total over its inputs; never fails.
    pub fn filter(&self, records: Vec<ToolResultRecord>, current_tokens: u64) -> FilterOutcome {
        let above_warning = current_tokens >= self.warning_threshold;
        let above_emergency = current_tokens >= self.emergency_threshold;

        // Newest first; on equal timestamps the later input is treated as newer.
        let mut order: Vec<usize> = (0..records.len()).collect();
        order.sort_by(|&a, &b| {
            records[b]
                .timestamp
                .cmp(&records[a].timestamp)
                .then_with(|| b.cmp(&a))
        });

        let mut decisions: Vec<Option<Result<RetainReason, DiscardReason>>> =
            vec![None; records.len()];
        let mut medium_kept = 0usize;
        let mut low_kept = 0usize;

        for idx in order {
            let record = &records[idx];
            let priority = self.priority_of(record);

            let decision = if self.never_filter.contains(&record.tool) {
                Ok(RetainReason::NeverFilter)
            } else {
                match priority {
                    Priority::Critical => Ok(RetainReason::Critical),
                    Priority::High if above_emergency => Err(DiscardReason::EmergencyThreshold),
                    Priority::High => Ok(RetainReason::BelowEmergency),
                    Priority::Medium | Priority::Low if above_warning => {
                        Err(DiscardReason::WarningThreshold)
                    }
                    Priority::Medium => {
                        take_recent(&mut medium_kept, self.medium_recent_limit)
                    }
                    Priority::Low => take_recent(&mut low_kept, self.low_recent_limit),
                }
            };

            if let Err(reason) = decision {
                debug!(
                    tool = %record.tool,
                    %priority,
                    tokens = record.token_cost,
                    ?reason,
                    "Evicting tool result"
                );
            }
            decisions[idx] = Some(decision);
        }

        let mut outcome = FilterOutcome::default();
        for (mut record, decision) in records.into_iter().zip(decisions) {
            let priority = self.priority_of(&record);
            record.priority = Some(priority);

            let bucket = outcome.stats.bucket_mut(priority);
            bucket.count_before += 1;
            bucket.tokens_before += record.token_cost;

            match decision {
                Some(Ok(_)) | None => {
                    bucket.count_after += 1;
                    bucket.tokens_after += record.token_cost;
                    outcome.retained.push(record);
                }
                Some(Err(reason)) => outcome.discarded.push(Discarded { record, reason }),
            }
        }

        debug!(
            current_tokens,
            retained = outcome.retained.len(),
            discarded = outcome.discarded.len(),
            reclaimed = outcome.stats.tokens_reclaimed(),
            "Eviction filter complete"
        );
        outcome
    }
}

fn take_recent(kept: &mut usize, limit: usize) -> Result<RetainReason, DiscardReason> {
    if *kept < limit {
        *kept += 1;
        Ok(RetainReason::RecentWindow)
    } else {
        Err(DiscardReason::OutsideRecentWindow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(tool: &str, minute: i64, tokens: u64) -> ToolResultRecord {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        ToolResultRecord::new(tool, tokens).at(base + Duration::minutes(minute))
    }

    #[test]
    fn test_resolve_priority_fallbacks() {
        let filter = EvictionFilter::default().with_override("grep", Priority::Low);
        assert_eq!(filter.resolve_priority("grep"), Priority::Low);
        assert_eq!(filter.resolve_priority("edit_file"), Priority::High);
        assert_eq!(filter.resolve_priority("security_scan"), Priority::Critical);
        assert_eq!(filter.resolve_priority("mystery_tool"), Priority::Medium);
    }

    #[test]
    fn test_unknown_override_name_is_medium() {
        let mut config = EvictionConfig::default();
        config
            .priority_overrides
            .insert("log".into(), "whenever".into());
        let filter = EvictionFilter::new(&CapacityConfig::default(), &config);
        assert_eq!(filter.resolve_priority("log"), Priority::Medium);
    }

    #[test]
    fn test_mixed_set_below_thresholds() {
        let filter = EvictionFilter::default();
        let mut records = vec![
            record("security_scan", 0, 400),
            record("edit_file", 1, 300),
            record("api_call", 2, 200),
        ];
        for i in 0..5 {
            records.push(record("debug", 3 + i, 50));
        }

        let outcome = filter.filter(records, 10_000);

        let critical = outcome
            .retained
            .iter()
            .filter(|r| r.priority == Some(Priority::Critical))
            .count();
        let high = outcome
            .retained
            .iter()
            .filter(|r| r.priority == Some(Priority::High))
            .count();
        let low: Vec<_> = outcome
            .retained
            .iter()
            .filter(|r| r.priority == Some(Priority::Low))
            .collect();
        assert_eq!(critical, 1);
        assert_eq!(high, 2);
        assert_eq!(low.len(), 3);
        // The three newest debug records survive.
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        assert!(low.iter().all(|r| r.timestamp >= base + Duration::minutes(5)));
        assert_eq!(outcome.stats.low.count_before, 5);
        assert_eq!(outcome.stats.low.count_after, 3);
        assert_eq!(outcome.stats.tokens_reclaimed(), 100);
        assert!(
            outcome
                .discarded
                .iter()
                .all(|d| d.reason == DiscardReason::OutsideRecentWindow)
        );
    }

    #[test]
    fn test_above_warning_drops_medium_and_low() {
        let filter = EvictionFilter::default();
        let records = vec![
            record("grep", 0, 100),
            record("debug", 1, 100),
            record("edit_file", 2, 100),
        ];
        let outcome = filter.filter(records, 170_000);
        assert_eq!(outcome.retained.len(), 1);
        assert_eq!(outcome.retained[0].tool, "edit_file");
        assert!(
            outcome
                .discarded
                .iter()
                .all(|d| d.reason == DiscardReason::WarningThreshold)
        );
    }

    #[test]
    fn test_emergency_drops_high_but_never_critical() {
        let filter = EvictionFilter::default();
        let records = vec![
            record("edit_file", 0, 100),
            record("build_failure", 1, 100),
            record("test_failure", 2, 100),
        ];
        let outcome = filter.filter(records, 190_000);
        assert_eq!(outcome.retained.len(), 2);
        assert!(outcome.discarded.iter().all(|d| {
            d.record.priority != Some(Priority::Critical)
                && d.reason == DiscardReason::EmergencyThreshold
        }));
    }

    #[test]
    fn test_critical_never_discarded_for_any_token_count() {
        let filter = EvictionFilter::default();
        for tokens in [0, 169_999, 170_000, 189_999, 190_000, u64::MAX] {
            let records: Vec<_> = (0..20)
                .map(|i| {
                    let tool = if i % 3 == 0 { "compile_error" } else { "log" };
                    record(tool, 20 - i, 10)
                })
                .collect();
            let outcome = filter.filter(records, tokens);
            assert!(
                outcome
                    .discarded
                    .iter()
                    .all(|d| d.record.priority != Some(Priority::Critical)),
                "critical record discarded at {} tokens",
                tokens
            );
            assert_eq!(outcome.stats.critical.count_after, 7);
        }
    }

    #[test]
    fn test_never_filter_wins_over_priority() {
        let filter = EvictionFilter::default().never_filter("debug");
        let records = (0..6).map(|i| record("debug", i, 10)).collect();
        let outcome = filter.filter(records, 195_000);
        assert_eq!(outcome.retained.len(), 6);
        assert!(outcome.discarded.is_empty());
    }

    #[test]
    fn test_explicit_record_priority_is_honoured() {
        let filter = EvictionFilter::default();
        let records = vec![record("bash_output", 0, 500).with_priority(Priority::Critical)];
        let outcome = filter.filter(records, 199_000);
        assert_eq!(outcome.retained.len(), 1);
        assert_eq!(outcome.retained[0].priority, Some(Priority::Critical));
    }

    #[test]
    fn test_medium_recent_window_keeps_latest_ten() {
        let filter = EvictionFilter::default();
        // Supplied newest-first to check ordering does not depend on input order.
        let records: Vec<_> = (0..15).rev().map(|i| record("grep", i, 10)).collect();
        let outcome = filter.filter(records, 1_000);
        assert_eq!(outcome.retained.len(), 10);
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        assert!(
            outcome
                .retained
                .iter()
                .all(|r| r.timestamp >= base + Duration::minutes(5))
        );
    }

    #[test]
    fn test_output_preserves_input_order() {
        let filter = EvictionFilter::default();
        let records = vec![
            record("edit_file", 5, 1),
            record("api_call", 1, 1),
            record("security_scan", 3, 1),
        ];
        let outcome = filter.filter(records, 0);
        let tools: Vec<_> = outcome.retained.iter().map(|r| r.tool.as_str()).collect();
        assert_eq!(tools, vec!["edit_file", "api_call", "security_scan"]);
    }

    #[test]
    fn test_empty_input() {
        let outcome = EvictionFilter::default().filter(Vec::new(), 100);
        assert!(outcome.retained.is_empty());
        assert_eq!(outcome.stats, FilterStats::default());
        assert!(outcome.stats.summary().is_empty());
    }
}
