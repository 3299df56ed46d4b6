use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{
    AssumeExists, DriftCategory, DriftIndicator, DriftReport, ResourceProbe, Severity,
};
use crate::config::DriftConfig;

const STALE_WASTE_PER_RESOURCE: u64 = 500;
const OBSOLETE_WASTE_PER_REFERENCE: u64 = 500;
const TASK_SWITCH_WASTE_PCT: u64 = 10;
const ACTOR_SWITCH_WASTE_PCT: u64 = 5;
const SESSION_DEPTH_WASTE_PCT: u64 = 25;

const CLEAR_SCORE: u32 = 70;
const MAX_SCORE: u32 = 100;

#[derive(Debug, Default)]
struct DriftState {
    messages: u64,
    /// resource id -> message count at its latest touch
    last_touch: BTreeMap<String, u64>,
    tasks: VecDeque<String>,
    actors: VecDeque<String>,
}

/// Tracks session activity since the last clear and scores how far the
/// accumulated context has drifted from current work.
///
/// Never fails: with no history the report is empty with a score of 0.
pub struct DriftDetector {
    config: DriftConfig,
    probe: Arc<dyn ResourceProbe>,
    state: Mutex<DriftState>,
}

impl DriftDetector {
    pub fn new(config: DriftConfig) -> Self {
        Self::with_probe(config, Arc::new(AssumeExists))
    }

    pub fn with_probe(config: DriftConfig, probe: Arc<dyn ResourceProbe>) -> Self {
        Self {
            config,
            probe,
            state: Mutex::new(DriftState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DriftState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn track_access(&self, resource_id: &str) {
        let resource_id = resource_id.trim();
        if resource_id.is_empty() {
            return;
        }
        let mut state = self.lock();
        let now = state.messages;
        state.last_touch.insert(resource_id.to_string(), now);
    }

    /// Record the current task. Descriptions are compared case-insensitively.
    pub fn track_task(&self, description: &str) {
        let task = description.trim().to_lowercase();
        if task.is_empty() {
            return;
        }
        let window = self.config.history_window.max(1);
        push_capped(&mut self.lock().tasks, task, window);
    }

    pub fn track_actor(&self, actor: &str) {
        let actor = actor.trim();
        if actor.is_empty() {
            return;
        }
        let window = self.config.history_window.max(1);
        push_capped(&mut self.lock().actors, actor.to_string(), window);
    }

    /// Call once per user turn.
    pub fn track_message(&self) {
        self.lock().messages += 1;
    }

    pub fn message_count(&self) -> u64 {
        self.lock().messages
    }

    /// Forget everything tracked; called after a context clear.
    pub fn reset(&self) {
        *self.lock() = DriftState::default();
        debug!("Drift history reset");
    }

    /// Score the tracked history. Takes no lock while probing resources.
    pub fn detect_drift(&self, current_tokens: u64) -> DriftReport {
        let (messages, stale, tracked, distinct_tasks, distinct_actors) = {
            let state = self.lock();
            let stale = state
                .last_touch
                .values()
                .filter(|&&touched| state.messages - touched >= self.config.stale_after_messages)
                .count();
            let tracked: Vec<String> = state.last_touch.keys().cloned().collect();
            (
                state.messages,
                stale,
                tracked,
                distinct(&state.tasks),
                distinct(&state.actors),
            )
        };

        let mut indicators = Vec::new();

        if stale > 0 {
            let severity = if stale > 10 {
                Severity::High
            } else if stale > 5 {
                Severity::Medium
            } else {
                Severity::Low
            };
            indicators.push(DriftIndicator {
                category: DriftCategory::ResourceStaleness,
                severity,
                description: format!(
                    "{} resources untouched for {}+ messages",
                    stale, self.config.stale_after_messages
                ),
                recommendation: "Drop stale file contents from context".to_string(),
                estimated_waste: (stale as u64).saturating_mul(STALE_WASTE_PER_RESOURCE),
            });
        }

        if distinct_tasks >= self.config.task_switch_threshold {
            indicators.push(DriftIndicator {
                category: DriftCategory::TaskSwitch,
                severity: switch_severity(distinct_tasks, self.config.task_switch_threshold),
                description: format!(
                    "{} distinct tasks in the last {} tracked",
                    distinct_tasks, self.config.history_window
                ),
                recommendation: "Extract patterns from finished tasks, then clear".to_string(),
                estimated_waste: percent_of(current_tokens, TASK_SWITCH_WASTE_PCT),
            });
        }

        let missing = tracked.iter().filter(|r| !self.probe.exists(r)).count();
        if missing > 0 {
            let severity = if missing > 5 {
                Severity::High
            } else if missing > 2 {
                Severity::Medium
            } else {
                Severity::Low
            };
            indicators.push(DriftIndicator {
                category: DriftCategory::ObsoleteReference,
                severity,
                description: format!("{} referenced resources no longer exist", missing),
                recommendation: "Discard results for deleted or moved resources".to_string(),
                estimated_waste: (missing as u64).saturating_mul(OBSOLETE_WASTE_PER_REFERENCE),
            });
        }

        if distinct_actors >= self.config.actor_switch_threshold {
            indicators.push(DriftIndicator {
                category: DriftCategory::ActorSwitch,
                severity: switch_severity(distinct_actors, self.config.actor_switch_threshold),
                description: format!(
                    "{} distinct actors in the last {} activations",
                    distinct_actors, self.config.history_window
                ),
                recommendation: "Keep only context relevant to the active actor".to_string(),
                estimated_waste: percent_of(current_tokens, ACTOR_SWITCH_WASTE_PCT),
            });
        }

        if messages > self.config.session_depth_threshold {
            let severity = if messages > self.config.session_depth_critical {
                Severity::Critical
            } else if messages > self.config.session_depth_high {
                Severity::High
            } else {
                Severity::Medium
            };
            indicators.push(DriftIndicator {
                category: DriftCategory::SessionDepth,
                severity,
                description: format!("{} messages since the last clear", messages),
                recommendation: "Start a fresh context after extracting patterns".to_string(),
                estimated_waste: percent_of(current_tokens, SESSION_DEPTH_WASTE_PCT),
            });
        }

        let drift_score = indicators
            .iter()
            .map(|i| i.severity.points())
            .sum::<u32>()
            .min(MAX_SCORE);
        let severity = Severity::from_score(drift_score);
        let estimated_token_waste = indicators
            .iter()
            .fold(0u64, |total, i| total.saturating_add(i.estimated_waste));

        DriftReport {
            should_clear_context: drift_score >= CLEAR_SCORE || severity == Severity::Critical,
            indicators,
            drift_score,
            severity,
            estimated_token_waste,
            message_count: messages,
        }
    }
}

fn percent_of(tokens: u64, pct: u64) -> u64 {
    (tokens as u128 * pct as u128 / 100) as u64
}

fn push_capped(history: &mut VecDeque<String>, value: String, cap: usize) {
    history.push_back(value);
    while history.len() > cap {
        history.pop_front();
    }
}

fn distinct(history: &VecDeque<String>) -> usize {
    history.iter().collect::<BTreeSet<_>>().len()
}

/// Low at the threshold, medium from one past it, high from three past it.
fn switch_severity(distinct: usize, threshold: usize) -> Severity {
    if distinct >= threshold + 3 {
        Severity::High
    } else if distinct > threshold {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::FsProbe;
    use tempfile::TempDir;

    fn detector() -> DriftDetector {
        DriftDetector::new(DriftConfig::default())
    }

    #[test]
    fn test_empty_history_scores_zero() {
        let report = detector().detect_drift(50_000);
        assert!(report.indicators.is_empty());
        assert_eq!(report.drift_score, 0);
        assert_eq!(report.severity, Severity::None);
        assert!(!report.should_clear_context);
    }

    #[test]
    fn test_six_distinct_tasks_flag_task_switch() {
        let d = detector();
        for task in ["auth", "billing", "search", "docs", "deploy", "metrics"] {
            d.track_task(task);
        }
        let report = d.detect_drift(100_000);
        let indicator = report.indicator(DriftCategory::TaskSwitch).unwrap();
        assert!(indicator.severity >= Severity::Medium);
        assert_eq!(indicator.estimated_waste, 10_000);
    }

    #[test]
    fn test_waste_estimate_handles_huge_token_counts() {
        let d = detector();
        for task in ["auth", "billing", "search", "docs", "deploy", "metrics"] {
            d.track_task(task);
        }
        for _ in 0..201 {
            d.track_message();
        }
        let report = d.detect_drift(u64::MAX);
        let depth = report.indicator(DriftCategory::SessionDepth).unwrap();
        assert_eq!(depth.estimated_waste, 4_611_686_018_427_387_903);
        let switch = report.indicator(DriftCategory::TaskSwitch).unwrap();
        assert_eq!(switch.estimated_waste, 1_844_674_407_370_955_161);
        assert_eq!(report.estimated_token_waste, 6_456_360_425_798_343_064);

        // Exact for ordinary sizes.
        assert_eq!(percent_of(1_050, 10), 105);
    }

    #[test]
    fn test_repeated_tasks_do_not_switch() {
        let d = detector();
        for _ in 0..10 {
            d.track_task("Implement login");
            d.track_task("implement LOGIN ");
        }
        assert!(d.detect_drift(0).indicator(DriftCategory::TaskSwitch).is_none());
    }

    #[test]
    fn test_task_window_forgets_old_tasks() {
        let d = detector();
        for i in 0..6 {
            d.track_task(&format!("task {}", i));
        }
        for _ in 0..10 {
            d.track_task("same task");
        }
        assert!(d.detect_drift(0).indicator(DriftCategory::TaskSwitch).is_none());
    }

    #[test]
    fn test_session_depth_escalates() {
        let d = detector();
        for _ in 0..201 {
            d.track_message();
        }
        assert_eq!(
            d.detect_drift(0).indicator(DriftCategory::SessionDepth).unwrap().severity,
            Severity::Medium
        );
        for _ in 0..50 {
            d.track_message();
        }
        assert_eq!(
            d.detect_drift(0).indicator(DriftCategory::SessionDepth).unwrap().severity,
            Severity::High
        );
        for _ in 0..50 {
            d.track_message();
        }
        let report = d.detect_drift(100_000);
        let depth = report.indicator(DriftCategory::SessionDepth).unwrap();
        assert_eq!(report.message_count, 301);
        assert_eq!(depth.severity, Severity::Critical);
        assert_eq!(depth.estimated_waste, 25_000);
    }

    #[test]
    fn test_stale_resources() {
        let d = detector();
        for i in 0..7 {
            d.track_access(&format!("file{}.rs", i));
        }
        for _ in 0..50 {
            d.track_message();
        }
        d.track_access("file0.rs");

        let report = d.detect_drift(0);
        let stale = report.indicator(DriftCategory::ResourceStaleness).unwrap();
        assert_eq!(stale.severity, Severity::Medium);
        assert_eq!(stale.estimated_waste, 3_000);
    }

    #[test]
    fn test_actor_switching() {
        let d = detector();
        for actor in ["backend", "frontend", "docs"] {
            d.track_actor(actor);
        }
        assert!(d.detect_drift(0).indicator(DriftCategory::ActorSwitch).is_none());
        d.track_actor("security");
        let report = d.detect_drift(40_000);
        let indicator = report.indicator(DriftCategory::ActorSwitch).unwrap();
        assert_eq!(indicator.severity, Severity::Low);
        assert_eq!(indicator.estimated_waste, 2_000);
    }

    #[test]
    fn test_obsolete_references_with_fs_probe() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("kept.rs"), "").unwrap();
        let d = DriftDetector::with_probe(DriftConfig::default(), Arc::new(FsProbe::new(dir.path())));
        for name in ["kept.rs", "gone1.rs", "gone2.rs", "gone3.rs"] {
            d.track_access(name);
        }
        let report = d.detect_drift(0);
        let obsolete = report.indicator(DriftCategory::ObsoleteReference).unwrap();
        assert_eq!(obsolete.severity, Severity::Medium);
        assert_eq!(obsolete.estimated_waste, 1_500);
    }

    #[test]
    fn test_default_probe_reports_no_obsolete_references() {
        let d = detector();
        d.track_access("/definitely/not/here.rs");
        assert!(d.detect_drift(0).indicator(DriftCategory::ObsoleteReference).is_none());
    }

    #[test]
    fn test_detect_is_idempotent() {
        let d = detector();
        for task in ["a", "b", "c", "d", "e", "f", "g", "h"] {
            d.track_task(task);
        }
        for _ in 0..260 {
            d.track_message();
        }
        let first = d.detect_drift(120_000);
        let second = d.detect_drift(120_000);
        assert_eq!(first, second);
    }

    #[test]
    fn test_critical_combination_requests_clear() {
        let d = detector();
        for task in ["a", "b", "c", "d", "e", "f", "g", "h"] {
            d.track_task(task);
        }
        for _ in 0..301 {
            d.track_message();
        }
        // task switch high (25) + depth critical (40)
        let report = d.detect_drift(100_000);
        assert_eq!(report.drift_score, 65);
        assert_eq!(report.severity, Severity::High);
        assert!(!report.should_clear_context);

        for actor in ["a", "b", "c", "d", "e", "f", "g"] {
            d.track_actor(actor);
        }
        let report = d.detect_drift(100_000);
        assert_eq!(report.drift_score, 90);
        assert_eq!(report.severity, Severity::Critical);
        assert!(report.should_clear_context);
    }

    #[test]
    fn test_reset_clears_history() {
        let d = detector();
        for _ in 0..301 {
            d.track_message();
        }
        d.track_task("x");
        d.reset();
        let report = d.detect_drift(10_000);
        assert_eq!(report.drift_score, 0);
        assert_eq!(report.message_count, 0);
    }
}
