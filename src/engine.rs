//! The context engine: one entry point that feeds host events to the stats
//! store, access tracker, drift detector and forecaster, decides when to
//! clear, and runs the eviction filter when it does.
//!
//! Each message also becomes a pending forecaster observation; once the 5th
//! and 10th following messages have been seen it is stored as a training
//! sample. A clear drops pending observations since token counts before and
//! after it are not comparable.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::access::AccessTracker;
use crate::config::EngineConfig;
use crate::drift::{DriftDetector, DriftReport};
use crate::errors::EngineError;
use crate::eviction::{EvictionFilter, FilterOutcome, ToolResultRecord};
use crate::forecast::{
    ForecastResult, Recommendation, SessionSnapshot, TaskComplexity, UsageForecaster,
};
use crate::stats::{AccessOp, AccessOpKind, ClearEvent, SessionId, SessionMetrics, StatsStore, TriggerKind};

/// Messages averaged for the recent tokens/message feature.
const RECENT_MESSAGES: usize = 10;
/// Tool results averaged for the tool-size feature.
const RECENT_TOOL_RESULTS: usize = 10;
const SHORT_HORIZON: u64 = 5;
const LONG_HORIZON: u64 = 10;

/// What `evaluate` concluded.
#[derive(Debug, Clone, PartialEq)]
pub struct ClearDecision {
    pub forecast: ForecastResult,
    pub drift: DriftReport,
    pub should_clear: bool,
    /// Why a clear is warranted, when it is
    pub reason: Option<String>,
}

#[derive(Debug)]
struct PendingObservation {
    snapshot: SessionSnapshot,
    at_message: u64,
    after_short: Option<u64>,
}

#[derive(Debug, Default)]
struct SessionState {
    id: Option<SessionId>,
    actor: Option<String>,
    complexity: TaskComplexity,
    messages: u64,
    memory_ops: u64,
    last_tokens: Option<u64>,
    recent_deltas: VecDeque<u64>,
    tool_results: VecDeque<u64>,
    pending: VecDeque<PendingObservation>,
}

impl SessionState {
    fn snapshot(&self, current_tokens: u64) -> SessionSnapshot {
        SessionSnapshot {
            message_count: self.messages,
            recent_tokens_per_message: mean(&self.recent_deltas),
            task_complexity: self.complexity,
            actor: self.actor.clone(),
            avg_tool_result_tokens: mean(&self.tool_results),
            memory_op_rate: if self.messages == 0 {
                0.0
            } else {
                self.memory_ops as f64 / self.messages as f64
            },
            ..SessionSnapshot::new(current_tokens)
        }
    }
}

/// Wires the five components together for one host session at a time.
///
/// Components are injected (see [`ContextEngine::with_components`]) so
/// several engines can share or isolate state as the host needs.
pub struct ContextEngine {
    config: EngineConfig,
    stats: Arc<StatsStore>,
    access: Arc<AccessTracker>,
    forecaster: Arc<UsageForecaster>,
    drift: Arc<DriftDetector>,
    filter: EvictionFilter,
    session: Mutex<SessionState>,
}

impl ContextEngine {
    /// Open every component under the configured data directory.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        if config.capacity.capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "capacity must be greater than 0".to_string(),
            ));
        }
        let dir = config.data_dir()?;
        let stats = StatsStore::open(&dir, &config.storage)?;
        let access = AccessTracker::open(&dir, config.access.clone())?;
        let forecaster =
            UsageForecaster::open(&dir, config.capacity.clone(), config.forecast.clone())?;
        let drift = DriftDetector::new(config.drift.clone());
        info!(dir = %dir.display(), "Context engine ready");

        Ok(Self::with_components(
            config,
            Arc::new(stats),
            Arc::new(access),
            Arc::new(forecaster),
            Arc::new(drift),
        ))
    }

    pub fn with_components(
        config: EngineConfig,
        stats: Arc<StatsStore>,
        access: Arc<AccessTracker>,
        forecaster: Arc<UsageForecaster>,
        drift: Arc<DriftDetector>,
    ) -> Self {
        let filter = EvictionFilter::new(&config.capacity, &config.eviction);
        Self {
            config,
            stats,
            access,
            forecaster,
            drift,
            filter,
            session: Mutex::new(SessionState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<StatsStore> {
        &self.stats
    }

    pub fn access(&self) -> &Arc<AccessTracker> {
        &self.access
    }

    pub fn forecaster(&self) -> &Arc<UsageForecaster> {
        &self.forecaster
    }

    pub fn drift(&self) -> &Arc<DriftDetector> {
        &self.drift
    }

    pub fn filter(&self) -> &EvictionFilter {
        &self.filter
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.lock().id
    }

    /// Begin a session for `actor`. Ends nothing: call `end_session` first
    /// if one is already running.
    pub fn start_session(&self, actor: &str) -> SessionId {
        let id = self.stats.start_session(actor);
        let actor = (!actor.trim().is_empty()).then(|| actor.trim().to_string());
        *self.lock() = SessionState {
            id: Some(id),
            actor: actor.clone(),
            ..SessionState::default()
        };
        self.drift.reset();
        if let Some(actor) = &actor {
            self.drift.track_actor(actor);
        }
        id
    }

    /// Record one user turn. `current_tokens` is the context size after it.
    pub fn on_message(&self, input_tokens: u64, output_tokens: u64, current_tokens: u64) {
        self.drift.track_message();

        let (session_id, completed) = {
            let mut state = self.lock();
            let delta = match state.last_tokens {
                Some(last) => current_tokens.saturating_sub(last),
                None => input_tokens + output_tokens,
            };
            push_capped(&mut state.recent_deltas, delta, RECENT_MESSAGES);
            state.last_tokens = Some(current_tokens);
            state.messages += 1;

            let messages = state.messages;
            let mut completed = Vec::new();
            let mut still_pending = VecDeque::with_capacity(state.pending.len() + 1);
            for mut obs in state.pending.drain(..) {
                let elapsed = messages - obs.at_message;
                if elapsed == SHORT_HORIZON {
                    obs.after_short = Some(current_tokens);
                }
                if elapsed >= LONG_HORIZON {
                    let after_short = obs.after_short.unwrap_or(current_tokens);
                    completed.push((obs.snapshot, after_short, current_tokens));
                } else {
                    still_pending.push_back(obs);
                }
            }
            let snapshot = state.snapshot(current_tokens);
            still_pending.push_back(PendingObservation {
                snapshot,
                at_message: messages,
                after_short: None,
            });
            state.pending = still_pending;
            (state.id, completed)
        };

        if let Some(id) = session_id {
            self.stats
                .record_usage(id, input_tokens, output_tokens, current_tokens);
        }
        for (snapshot, after_5, after_10) in completed {
            self.forecaster.record_outcome(snapshot, after_5, after_10);
        }
    }

    /// Record the size of a tool result that entered the context.
    pub fn on_tool_result(&self, tokens: u64) {
        push_capped(&mut self.lock().tool_results, tokens, RECENT_TOOL_RESULTS);
    }

    /// Record a resource touch (file read, edit, ...).
    pub fn on_access(&self, resource_id: &str) {
        let actor = self.lock().actor.clone();
        self.access.record_access(resource_id, actor.as_deref());
        self.drift.track_access(resource_id);
    }

    /// Record a new task description and return its classified complexity.
    pub fn on_task(&self, description: &str) -> TaskComplexity {
        let complexity = TaskComplexity::classify(description);
        self.on_task_with(description, complexity);
        complexity
    }

    /// Record a task whose complexity the host already knows.
    pub fn on_task_with(&self, description: &str, complexity: TaskComplexity) {
        self.drift.track_task(description);
        self.lock().complexity = complexity;
    }

    /// Record that `actor` became the active agent.
    pub fn on_actor(&self, actor: &str) {
        let actor = actor.trim();
        if actor.is_empty() {
            return;
        }
        self.drift.track_actor(actor);
        self.lock().actor = Some(actor.to_string());
    }

    /// Record a memory-like operation on a named pattern.
    pub fn on_memory_op(&self, kind: AccessOpKind, resource: &str) {
        let (session_id, actor) = {
            let mut state = self.lock();
            state.memory_ops += 1;
            (state.id, state.actor.clone())
        };
        let mut op = AccessOp::new(kind, resource);
        if let Some(actor) = &actor {
            op = op.by(actor.clone());
        }
        if let Some(id) = session_id {
            op = op.in_session(id);
        }
        self.stats.record_access_op(op);
        self.access.record_access(resource, actor.as_deref());
    }

    /// Features the forecaster would see right now.
    pub fn snapshot(&self, current_tokens: u64) -> SessionSnapshot {
        self.lock().snapshot(current_tokens)
    }

    /// Forecast and score drift; say whether to clear.
    pub fn evaluate(&self, current_tokens: u64) -> ClearDecision {
        let forecast = self.forecaster.forecast(&self.snapshot(current_tokens));
        let drift = self.drift.detect_drift(current_tokens);

        let reason = if forecast.recommendation >= Recommendation::ExtractNow {
            Some(format!("forecast recommends {}", forecast.recommendation))
        } else if drift.should_clear_context {
            Some(format!(
                "drift score {} ({})",
                drift.drift_score, drift.severity
            ))
        } else {
            None
        };

        debug!(
            current_tokens,
            recommendation = %forecast.recommendation,
            drift_score = drift.drift_score,
            should_clear = reason.is_some(),
            "Evaluated context"
        );

        ClearDecision {
            should_clear: reason.is_some(),
            forecast,
            drift,
            reason,
        }
    }

    /// Filter `records` for a clear at `current_tokens`, log the clear, and
    /// reset drift history and pending observations.
    pub fn clear(
        &self,
        records: Vec<ToolResultRecord>,
        current_tokens: u64,
        trigger: TriggerKind,
        patterns_extracted: u32,
    ) -> FilterOutcome {
        let outcome = self.filter.filter(records, current_tokens);
        let reclaimed = outcome.stats.tokens_reclaimed();

        let (session_id, actor) = {
            let mut state = self.lock();
            state.pending.clear();
            state.last_tokens = Some(current_tokens.saturating_sub(reclaimed));
            (state.id, state.actor.clone())
        };

        let mut event = ClearEvent::new(
            current_tokens,
            outcome.stats.entries_removed(),
            reclaimed,
            trigger,
        )
        .with_patterns(patterns_extracted);
        if let Some(actor) = actor {
            event = event.by(actor);
        }
        if let Some(id) = session_id {
            event = event.in_session(id);
        }
        self.stats.record_clear(event);
        self.drift.reset();

        info!(
            trigger = %trigger,
            current_tokens,
            removed = outcome.stats.entries_removed(),
            reclaimed,
            "Context cleared"
        );
        outcome
    }

    /// Finalize the running session and persist every component.
    pub fn end_session(&self) -> Option<SessionMetrics> {
        let id = std::mem::take(&mut *self.lock()).id?;
        let metrics = self.stats.end_session(id);
        self.access.save();
        self.forecaster.flush();
        metrics
    }
}

fn push_capped(window: &mut VecDeque<u64>, value: u64, cap: usize) {
    window.push_back(value);
    while window.len() > cap {
        window.pop_front();
    }
}

fn mean(values: &VecDeque<u64>) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<u64>() as f64 / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_engine() -> (ContextEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::in_dir(dir.path());
        config.forecast.background_refit = false;
        let engine = ContextEngine::open(config).unwrap();
        (engine, dir)
    }

    #[test]
    fn test_snapshot_uses_recent_message_deltas() {
        let (engine, _dir) = setup_engine();
        engine.start_session("backend-agent");
        engine.on_message(500, 500, 1_000);
        engine.on_message(300, 700, 3_000);
        engine.on_tool_result(400);
        engine.on_tool_result(600);

        let snap = engine.snapshot(3_000);
        // deltas: 1_000 (first message), then 2_000
        assert!((snap.recent_tokens_per_message - 1_500.0).abs() < 1e-9);
        assert!((snap.avg_tool_result_tokens - 500.0).abs() < 1e-9);
        assert_eq!(snap.message_count, 2);
        assert_eq!(snap.actor.as_deref(), Some("backend-agent"));
    }

    #[test]
    fn test_outcomes_become_training_samples() {
        let (engine, _dir) = setup_engine();
        engine.start_session("backend-agent");
        for i in 1..=10u64 {
            engine.on_message(100, 100, i * 1_000);
        }
        assert_eq!(engine.forecaster().sample_count(), 0);
        engine.on_message(100, 100, 11_000);
        assert_eq!(engine.forecaster().sample_count(), 1);
    }

    #[test]
    fn test_clear_drops_pending_observations() {
        let (engine, _dir) = setup_engine();
        engine.start_session("backend-agent");
        for i in 1..=8u64 {
            engine.on_message(100, 100, i * 1_000);
        }
        engine.clear(Vec::new(), 8_000, TriggerKind::Manual, 0);
        for i in 1..=5u64 {
            engine.on_message(100, 100, 8_000 + i * 1_000);
        }
        assert_eq!(engine.forecaster().sample_count(), 0);
    }

    #[test]
    fn test_memory_ops_feed_stats_and_rate() {
        let (engine, _dir) = setup_engine();
        let id = engine.start_session("docs-agent");
        engine.on_message(10, 10, 20);
        engine.on_memory_op(AccessOpKind::Extract, "api-conventions");
        engine.on_memory_op(AccessOpKind::Read, "api-conventions");

        assert!((engine.snapshot(20).memory_op_rate - 2.0).abs() < 1e-9);
        assert_eq!(engine.stats().session(id).unwrap().memory_ops, 2);
        assert_eq!(engine.access().get("api-conventions").unwrap().access_count, 2);
    }

    #[test]
    fn test_on_task_classifies() {
        let (engine, _dir) = setup_engine();
        assert_eq!(engine.on_task("Migrate the job queue"), TaskComplexity::Complex);
        assert_eq!(engine.snapshot(0).task_complexity, TaskComplexity::Complex);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::in_dir(dir.path());
        config.capacity.capacity = 0;
        let err = ContextEngine::open(config).err().unwrap();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_end_session_without_start_is_none() {
        let (engine, _dir) = setup_engine();
        assert!(engine.end_session().is_none());
    }
}
