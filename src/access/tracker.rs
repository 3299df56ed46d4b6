//! The access tracker: ranking, next-access prediction and pruning over
//! [`ResourceAccessRecord`]s, persisted as `access_patterns.json`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::ResourceAccessRecord;
use crate::config::AccessConfig;
use crate::errors::EngineError;
use crate::persist;

const PATTERNS_FILE: &str = "access_patterns.json";
const FILE_VERSION: u32 = 1;

/// Unsaved accesses tolerated before the tracker writes itself out.
const AUTOSAVE_EVERY: usize = 25;

// top_patterns weights
const WEIGHT_RECENT: f64 = 0.6;
const WEIGHT_TOTAL: f64 = 0.3;
const WEIGHT_RECENCY: f64 = 0.1;
const RECENCY_SCALE: f64 = 10.0;
const RECENCY_HALF_LIFE_DAYS: f64 = 7.0;
/// Upper bound on the recent-access window.
const MAX_WINDOW_DAYS: i64 = 36_500;

// predict_next point budget
const VOLUME_POINTS: f64 = 40.0;
const VOLUME_SATURATION: f64 = 10.0;
const REGULAR_BASE_POINTS: f64 = 10.0;
const REGULAR_DUE_POINTS: f64 = 20.0;
const ACTOR_POINTS: f64 = 20.0;
const RECENT_TOUCH_POINTS: f64 = 10.0;

#[derive(Debug, Serialize, Deserialize)]
struct PatternsFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    resources: Vec<ResourceAccessRecord>,
}

/// A resource with its `top_patterns` score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResource {
    pub score: f64,
    pub record: ResourceAccessRecord,
}

/// A resource the actor is likely to need next.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictedAccess {
    pub resource_id: String,
    /// 0-100
    pub score: f64,
    /// Human-readable contributing factors
    pub reasons: Vec<String>,
}

#[derive(Debug, Default)]
struct TrackerState {
    records: BTreeMap<String, ResourceAccessRecord>,
    unsaved: usize,
}

/// Tracks how often and how regularly resources are accessed.
///
/// Thread-safe: updates to one resource are serialized by an internal mutex,
/// so concurrent `record_access` calls never lose counts.
pub struct AccessTracker {
    path: Option<PathBuf>,
    config: AccessConfig,
    state: Mutex<TrackerState>,
}

impl AccessTracker {
    /// In-memory tracker that never touches disk.
    pub fn new(config: AccessConfig) -> Self {
        Self {
            path: None,
            config,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Open the tracker stored under `dir`, creating the directory if needed.
    /// A missing or corrupt patterns file starts an empty tracker.
    pub fn open(dir: &Path, config: AccessConfig) -> Result<Self, EngineError> {
        persist::ensure_dir(dir)?;
        let path = dir.join(PATTERNS_FILE);
        let records: BTreeMap<String, ResourceAccessRecord> = persist::read_json::<PatternsFile>(&path)
            .map(|file| {
                file.resources
                    .into_iter()
                    .map(|r| (r.resource_id.clone(), r))
                    .collect()
            })
            .unwrap_or_default();
        debug!(path = %path.display(), resources = records.len(), "Loaded access patterns");

        Ok(Self {
            path: Some(path),
            config,
            state: Mutex::new(TrackerState {
                records,
                unsaved: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn window(&self) -> Duration {
        Duration::days(self.config.recent_window_days.clamp(1, MAX_WINDOW_DAYS))
    }

    /// Record an access now.
    pub fn record_access(&self, resource_id: &str, actor: Option<&str>) {
        self.record_access_at(resource_id, actor, Utc::now());
    }

    /// Record an access at an explicit time. Empty resource ids are ignored.
    pub fn record_access_at(&self, resource_id: &str, actor: Option<&str>, at: DateTime<Utc>) {
        let resource_id = resource_id.trim();
        if resource_id.is_empty() {
            debug!("Ignoring access with empty resource id");
            return;
        }
        let window = self.window();
        let save_due = {
            let mut state = self.lock();
            match state.records.get_mut(resource_id) {
                Some(record) => record.record(actor, at, window),
                None => {
                    state.records.insert(
                        resource_id.to_string(),
                        ResourceAccessRecord::new(resource_id, actor, at),
                    );
                }
            }
            state.unsaved += 1;
            self.path.is_some() && state.unsaved >= AUTOSAVE_EVERY
        };
        if save_due {
            self.save();
        }
    }

    pub fn get(&self, resource_id: &str) -> Option<ResourceAccessRecord> {
        self.lock().records.get(resource_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `n` most relevant resources, best first.
    pub fn top_patterns(&self, n: usize) -> Vec<RankedResource> {
        self.top_patterns_at(n, Utc::now())
    }

    pub fn top_patterns_at(&self, n: usize, now: DateTime<Utc>) -> Vec<RankedResource> {
        if n == 0 {
            return Vec::new();
        }
        let window = self.window();
        let mut ranked: Vec<RankedResource> = self
            .lock()
            .records
            .values()
            .map(|record| RankedResource {
                score: relevance(record, now, window),
                record: record.clone(),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.record.resource_id.cmp(&b.record.resource_id))
        });
        ranked.truncate(n);
        ranked
    }

    /// Resources `actor` is likely to need next, best first. Only scores
    /// above the configured cutoff are returned.
    pub fn predict_next(&self, actor: &str) -> Vec<PredictedAccess> {
        self.predict_next_at(actor, Utc::now())
    }

    pub fn predict_next_at(&self, actor: &str, now: DateTime<Utc>) -> Vec<PredictedAccess> {
        let window = self.window();
        let mut predictions: Vec<PredictedAccess> = self
            .lock()
            .records
            .values()
            .map(|record| score_next_access(record, actor, now, window))
            .filter(|p| p.score > self.config.prediction_cutoff)
            .collect();
        predictions.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        predictions.truncate(self.config.prediction_limit);
        predictions
    }

    /// Drop records not accessed in the last `days` days. Returns how many
    /// were removed.
    pub fn prune(&self, days: i64) -> usize {
        self.prune_at(days, Utc::now())
    }

    pub fn prune_at(&self, days: i64, now: DateTime<Utc>) -> usize {
        // A cutoff before the representable range means nothing is older.
        let Some(cutoff) =
            Duration::try_days(days.max(0)).and_then(|age| now.checked_sub_signed(age))
        else {
            return 0;
        };
        let removed = {
            let mut state = self.lock();
            let before = state.records.len();
            state.records.retain(|_, r| r.last_accessed >= cutoff);
            let removed = before - state.records.len();
            if removed > 0 {
                state.unsaved += removed;
            }
            removed
        };
        if removed > 0 {
            info!(removed, days, "Pruned stale access records");
            self.save();
        }
        removed
    }

    /// Write the tracker to disk. Returns `false` when the write failed twice;
    /// in-memory state is kept either way. In-memory trackers always succeed.
    pub fn save(&self) -> bool {
        let Some(path) = &self.path else {
            return true;
        };
        let file = {
            let state = self.lock();
            if state.unsaved == 0 && path.exists() {
                return true;
            }
            PatternsFile {
                version: FILE_VERSION,
                updated_at: Some(Utc::now()),
                resources: state.records.values().cloned().collect(),
            }
        };
        let saved = persist::write_with_retry(PATTERNS_FILE, || persist::write_json(path, &file));
        if saved {
            self.lock().unsaved = 0;
        }
        saved
    }
}

impl Drop for AccessTracker {
    fn drop(&mut self) {
        let unsaved = self.lock().unsaved;
        if unsaved > 0 {
            self.save();
        }
    }
}

fn relevance(record: &ResourceAccessRecord, now: DateTime<Utc>, window: Duration) -> f64 {
    let recent = record.accesses_within(now, window) as f64;
    let days_since = (now - record.last_accessed).num_seconds().max(0) as f64 / 86_400.0;
    let recency = RECENCY_SCALE * (-days_since / RECENCY_HALF_LIFE_DAYS).exp();
    WEIGHT_RECENT * recent + WEIGHT_TOTAL * record.access_count as f64 + WEIGHT_RECENCY * recency
}

fn score_next_access(
    record: &ResourceAccessRecord,
    actor: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> PredictedAccess {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    let recent = record.accesses_within(now, window);
    if recent > 0 {
        score += (recent as f64 / VOLUME_SATURATION).min(1.0) * VOLUME_POINTS;
        reasons.push(format!(
            "accessed {} times in the last {} days",
            recent,
            window.num_days()
        ));
    }

    if let Some(expected) = record.predicted_next_access() {
        score += REGULAR_BASE_POINTS;
        if (now - expected).num_seconds().abs() <= Duration::hours(2).num_seconds() {
            score += REGULAR_DUE_POINTS;
            reasons.push(format!("due around {}", expected.format("%H:%M")));
        } else {
            reasons.push("accessed at a regular interval".to_string());
        }
    }

    if !actor.is_empty() {
        if record.last_actor.as_deref() == Some(actor) {
            score += ACTOR_POINTS;
            reasons.push(format!("last used by {}", actor));
        } else {
            let share = record.actor_share(actor);
            if share > 0.0 {
                score += ACTOR_POINTS * share;
                reasons.push(format!("{:.0}% of accesses by {}", share * 100.0, actor));
            }
        }
    }

    let since_last = now - record.last_accessed;
    if since_last >= Duration::zero() && since_last <= Duration::hours(1) {
        score += RECENT_TOUCH_POINTS;
        reasons.push("touched within the last hour".to_string());
    }

    PredictedAccess {
        resource_id: record.resource_id.clone(),
        score: score.min(100.0),
        reasons,
    }
}
