//! Aggregated statistics over a time range.
//!
//! [`StatsReport`] renders as a summary table via `Display`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{AccessOp, ClearEvent, SessionMetrics, TriggerKind};

/// Per-actor clear totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorSummary {
    pub clears: usize,
    pub tokens_saved: u64,
    pub patterns_extracted: u64,
}

/// Aggregates over clear events, memory-like operations and sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub clear_count: usize,
    pub threshold_clears: usize,
    pub manual_clears: usize,
    pub total_tokens_saved: u64,
    pub avg_tokens_saved: f64,
    pub avg_tokens_at_trigger: f64,
    pub entries_removed: usize,
    pub patterns_extracted: u64,
    pub access_ops: usize,
    pub ops_by_kind: BTreeMap<String, usize>,
    pub sessions: usize,
    pub avg_session_messages: f64,
    pub avg_peak_tokens: f64,
    pub by_actor: BTreeMap<String, ActorSummary>,
}

impl StatsReport {
    /// Build a report from already range-filtered records.
    pub fn build(
        clears: &[ClearEvent],
        ops: &[AccessOp],
        sessions: &[SessionMetrics],
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        let mut report = StatsReport {
            since,
            until,
            ..Self::default()
        };

        for event in clears {
            report.clear_count += 1;
            match event.trigger {
                TriggerKind::Threshold => report.threshold_clears += 1,
                TriggerKind::Manual => report.manual_clears += 1,
            }
            report.total_tokens_saved += event.tokens_saved;
            report.entries_removed += event.entries_removed;
            report.patterns_extracted += u64::from(event.patterns_extracted);

            let actor = event.actor.clone().unwrap_or_else(|| "unknown".to_string());
            let summary = report.by_actor.entry(actor).or_default();
            summary.clears += 1;
            summary.tokens_saved += event.tokens_saved;
            summary.patterns_extracted += u64::from(event.patterns_extracted);
        }
        if !clears.is_empty() {
            let n = clears.len() as f64;
            report.avg_tokens_saved = report.total_tokens_saved as f64 / n;
            report.avg_tokens_at_trigger =
                clears.iter().map(|e| e.tokens_before as f64).sum::<f64>() / n;
        }

        report.access_ops = ops.len();
        for op in ops {
            *report
                .ops_by_kind
                .entry(op.kind.as_str().to_string())
                .or_default() += 1;
        }

        report.sessions = sessions.len();
        if !sessions.is_empty() {
            let n = sessions.len() as f64;
            report.avg_session_messages = sessions.iter().map(|s| s.messages as f64).sum::<f64>() / n;
            report.avg_peak_tokens = sessions.iter().map(|s| s.peak_tokens as f64).sum::<f64>() / n;
        }

        report
    }
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_bound = |b: Option<DateTime<Utc>>| {
            b.map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        writeln!(
            f,
            "Context statistics ({} .. {})",
            fmt_bound(self.since),
            fmt_bound(self.until)
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "Clears:            {} ({} threshold, {} manual)",
            self.clear_count, self.threshold_clears, self.manual_clears
        )?;
        writeln!(f, "Tokens saved:      {}", self.total_tokens_saved)?;
        writeln!(f, "Avg saved/clear:   {:.0}", self.avg_tokens_saved)?;
        writeln!(f, "Avg at trigger:    {:.0}", self.avg_tokens_at_trigger)?;
        writeln!(f, "Entries removed:   {}", self.entries_removed)?;
        writeln!(f, "Patterns kept:     {}", self.patterns_extracted)?;
        writeln!(f, "Memory ops:        {}", self.access_ops)?;
        for (kind, count) in &self.ops_by_kind {
            writeln!(f, "  {:<10} {}", kind, count)?;
        }
        writeln!(
            f,
            "Sessions:          {} (avg {:.1} messages, avg peak {:.0} tokens)",
            self.sessions, self.avg_session_messages, self.avg_peak_tokens
        )?;

        if !self.by_actor.is_empty() {
            writeln!(f)?;
            writeln!(f, "{:<24} {:<8} {:<14} {:<8}", "Actor", "Clears", "Tokens saved", "Patterns")?;
            writeln!(
                f,
                "{:<24} {:<8} {:<14} {:<8}",
                "------------------------", "--------", "--------------", "--------"
            )?;
            for (actor, summary) in &self.by_actor {
                writeln!(
                    f,
                    "{:<24} {:<8} {:<14} {:<8}",
                    actor, summary.clears, summary.tokens_saved, summary.patterns_extracted
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::AccessOpKind;

    #[test]
    fn test_build_aggregates() {
        let clears = vec![
            ClearEvent::new(170_000, 10, 50_000, TriggerKind::Threshold)
                .by("backend-agent")
                .with_patterns(3),
            ClearEvent::new(90_000, 4, 20_000, TriggerKind::Manual).by("frontend-agent"),
            ClearEvent::new(100_000, 6, 30_000, TriggerKind::Threshold).by("backend-agent"),
        ];
        let ops = vec![
            AccessOp::new(AccessOpKind::Read, "a"),
            AccessOp::new(AccessOpKind::Read, "b"),
            AccessOp::new(AccessOpKind::Extract, "c"),
        ];

        let report = StatsReport::build(&clears, &ops, &[], None, None);
        assert_eq!(report.clear_count, 3);
        assert_eq!(report.threshold_clears, 2);
        assert_eq!(report.manual_clears, 1);
        assert_eq!(report.total_tokens_saved, 100_000);
        assert!((report.avg_tokens_at_trigger - 120_000.0).abs() < 1e-6);
        assert_eq!(report.entries_removed, 20);
        assert_eq!(report.patterns_extracted, 3);
        assert_eq!(report.ops_by_kind.get("read"), Some(&2));
        let backend = &report.by_actor["backend-agent"];
        assert_eq!(backend.clears, 2);
        assert_eq!(backend.tokens_saved, 80_000);
    }

    #[test]
    fn test_display_lists_actors() {
        let clears = vec![ClearEvent::new(10, 1, 5, TriggerKind::Manual).by("docs-agent")];
        let text = StatsReport::build(&clears, &[], &[], None, None).to_string();
        assert!(text.contains("docs-agent"));
        assert!(text.contains("1 manual"));
    }

    #[test]
    fn test_unattributed_clears_group_as_unknown() {
        let clears = vec![ClearEvent::new(10, 1, 5, TriggerKind::Threshold)];
        let report = StatsReport::build(&clears, &[], &[], None, None);
        assert!(report.by_actor.contains_key("unknown"));
    }
}
