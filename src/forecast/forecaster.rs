//! The usage forecaster: predictions from the current weights, a capped
//! sample log, and periodic refits that may run off the caller's thread.

use chrono::Utc;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    ForecastAccuracy, ForecastResult, ForecastWeights, Recommendation, SessionSnapshot,
    TrainingSample,
};
use crate::config::{CapacityConfig, ForecastConfig};
use crate::errors::EngineError;
use crate::persist;

const SAMPLES_FILE: &str = "training_samples.jsonl";
const MODEL_FILE: &str = "forecast_model.json";

/// Unsaved samples tolerated before the sample log is rewritten.
const SAMPLE_FLUSH_EVERY: usize = 10;

const BASE_CONFIDENCE: f64 = 0.5;
const SAME_COMPLEXITY_SAMPLES: usize = 50;
const SAME_ACTOR_SAMPLES: usize = 20;

#[derive(Debug, Default)]
struct SampleLog {
    samples: VecDeque<TrainingSample>,
    since_refit: usize,
    unsaved: usize,
}

/// Predicts when the context window will reach its thresholds and learns
/// blend weights from confirmed outcomes.
///
/// Forecasts read the last fitted weights through an `RwLock`; a refit only
/// takes the write lock to swap in the finished result, so forecasts are
/// never blocked behind a running refit.
pub struct UsageForecaster {
    dir: Option<PathBuf>,
    capacity: CapacityConfig,
    config: ForecastConfig,
    weights: Arc<RwLock<ForecastWeights>>,
    log: Mutex<SampleLog>,
    refitting: Arc<AtomicBool>,
    pending_refit: Mutex<Option<JoinHandle<()>>>,
}

impl UsageForecaster {
    /// In-memory forecaster with default weights.
    pub fn new(capacity: CapacityConfig, config: ForecastConfig) -> Self {
        Self {
            dir: None,
            capacity,
            config,
            weights: Arc::new(RwLock::new(ForecastWeights::default())),
            log: Mutex::new(SampleLog::default()),
            refitting: Arc::new(AtomicBool::new(false)),
            pending_refit: Mutex::new(None),
        }
    }

    /// Open the forecaster under `dir`, restoring weights and samples.
    pub fn open(
        dir: &Path,
        capacity: CapacityConfig,
        config: ForecastConfig,
    ) -> Result<Self, EngineError> {
        persist::ensure_dir(dir)?;

        let weights = persist::read_json::<ForecastWeights>(&dir.join(MODEL_FILE))
            .filter(|w| (w.sum() - 1.0).abs() < 1e-6)
            .unwrap_or_default();
        let mut samples: VecDeque<TrainingSample> =
            persist::read_jsonl(&dir.join(SAMPLES_FILE)).into();
        while samples.len() > config.max_samples {
            samples.pop_front();
        }
        debug!(
            dir = %dir.display(),
            samples = samples.len(),
            fitted = weights.fitted_at.is_some(),
            "Opened forecaster"
        );

        Ok(Self {
            dir: Some(dir.to_path_buf()),
            capacity,
            config,
            weights: Arc::new(RwLock::new(weights)),
            log: Mutex::new(SampleLog {
                samples,
                ..SampleLog::default()
            }),
            refitting: Arc::new(AtomicBool::new(false)),
            pending_refit: Mutex::new(None),
        })
    }

    fn lock_log(&self) -> MutexGuard<'_, SampleLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The weights forecasts currently use.
    pub fn weights(&self) -> ForecastWeights {
        self.weights
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn sample_count(&self) -> usize {
        self.lock_log().samples.len()
    }

    pub fn warning_threshold(&self) -> u64 {
        self.capacity.warning_threshold()
    }

    pub fn emergency_threshold(&self) -> u64 {
        self.capacity.emergency_threshold()
    }

    /// Forecast usage for `snapshot`. Works with no training data at all.
    pub fn forecast(&self, snapshot: &SessionSnapshot) -> ForecastResult {
        // One message can never add more than a full window.
        let delta = self
            .weights()
            .per_message_delta(snapshot)
            .min(self.capacity.capacity as f64);
        let current = snapshot.current_tokens;
        let warning = self.warning_threshold();
        let emergency = self.emergency_threshold();

        let messages_to_warning = messages_until(current, warning, delta);
        let messages_to_emergency = messages_until(current, emergency, delta);
        let minutes_per_message = snapshot
            .minutes_per_message
            .filter(|m| m.is_finite() && *m >= 0.0)
            .unwrap_or(self.config.minutes_per_message);

        let recommendation = if current >= emergency {
            Recommendation::Emergency
        } else {
            match messages_to_warning {
                Some(m) if m <= 5 => Recommendation::ExtractNow,
                Some(m) if m <= 10 => Recommendation::ExtractSoon,
                _ => Recommendation::Continue,
            }
        };

        ForecastResult {
            predicted_after_5: current.saturating_add((delta * 5.0).round() as u64),
            predicted_after_10: current.saturating_add((delta * 10.0).round() as u64),
            tokens_per_message: delta,
            messages_to_warning,
            messages_to_emergency,
            minutes_to_warning: messages_to_warning.map(|m| m as f64 * minutes_per_message),
            confidence: self.confidence(snapshot),
            recommendation,
        }
    }

    fn confidence(&self, snapshot: &SessionSnapshot) -> f64 {
        let log = self.lock_log();
        let n = log.samples.len();
        let mut confidence = BASE_CONFIDENCE;
        confidence += if n >= 500 {
            0.3
        } else if n >= 100 {
            0.2
        } else if n >= 50 {
            0.1
        } else {
            0.0
        };

        let same_complexity = log
            .samples
            .iter()
            .filter(|s| s.features.task_complexity == snapshot.task_complexity)
            .count();
        if same_complexity >= SAME_COMPLEXITY_SAMPLES {
            confidence += 0.1;
        }

        if let Some(actor) = &snapshot.actor {
            let same_actor = log
                .samples
                .iter()
                .filter(|s| s.features.actor.as_ref() == Some(actor))
                .count();
            if same_actor >= SAME_ACTOR_SAMPLES {
                confidence += 0.1;
            }
        }

        confidence.min(1.0)
    }

    /// Store an observed outcome. Every `retrain_every`th sample triggers a
    /// refit once enough samples exist.
    pub fn record_outcome(&self, snapshot: SessionSnapshot, actual_after_5: u64, actual_after_10: u64) {
        let sample = TrainingSample {
            recorded_at: Utc::now(),
            features: snapshot,
            actual_after_5,
            actual_after_10,
        };

        let (refit_due, flush_due) = {
            let mut log = self.lock_log();
            log.samples.push_back(sample);
            while log.samples.len() > self.config.max_samples {
                log.samples.pop_front();
            }
            log.since_refit += 1;
            log.unsaved += 1;
            let refit_due = log.since_refit >= self.config.retrain_every.max(1)
                && log.samples.len() >= self.config.min_samples_for_fit;
            if refit_due {
                log.since_refit = 0;
            }
            (refit_due, log.unsaved >= SAMPLE_FLUSH_EVERY)
        };

        if flush_due {
            self.flush();
        }
        if refit_due {
            self.schedule_refit();
        }
    }

    fn schedule_refit(&self) {
        if self.refitting.swap(true, Ordering::AcqRel) {
            debug!("Refit already running, skipping");
            return;
        }
        let samples: Vec<TrainingSample> = self.lock_log().samples.iter().cloned().collect();
        let weights = Arc::clone(&self.weights);
        let refitting = Arc::clone(&self.refitting);
        let model_path = self.dir.as_ref().map(|d| d.join(MODEL_FILE));

        let job = move || {
            refit_into(&weights, &samples, model_path.as_deref());
            refitting.store(false, Ordering::Release);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) if self.config.background_refit => {
                let task = handle.spawn_blocking(job);
                *self.pending_refit.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
            }
            _ => job(),
        }
    }

    /// Refit synchronously from all stored samples. Returns whether the
    /// weights changed.
    pub fn refit_now(&self) -> bool {
        let samples: Vec<TrainingSample> = self.lock_log().samples.iter().cloned().collect();
        let model_path = self.dir.as_ref().map(|d| d.join(MODEL_FILE));
        refit_into(&self.weights, &samples, model_path.as_deref())
    }

    /// Wait for a background refit started by `record_outcome`, if any.
    pub async fn wait_for_refit(&self) {
        let task = self
            .pending_refit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Background refit task failed");
        }
    }

    /// Error metrics of the current weights over stored samples.
    pub fn accuracy(&self) -> Option<ForecastAccuracy> {
        let samples: Vec<TrainingSample> = self.lock_log().samples.iter().cloned().collect();
        ForecastAccuracy::evaluate(&self.weights(), &samples)
    }

    /// Persist the sample log if it has unsaved entries.
    pub fn flush(&self) -> bool {
        let Some(dir) = &self.dir else {
            return true;
        };
        let (samples, unsaved) = {
            let log = self.lock_log();
            (log.samples.iter().cloned().collect::<Vec<_>>(), log.unsaved)
        };
        if unsaved == 0 {
            return true;
        }
        let path = dir.join(SAMPLES_FILE);
        let ok = persist::write_with_retry(SAMPLES_FILE, || persist::write_jsonl(&path, &samples));
        if ok {
            let mut log = self.lock_log();
            log.unsaved = log.unsaved.saturating_sub(unsaved);
        }
        ok
    }
}

impl Drop for UsageForecaster {
    fn drop(&mut self) {
        self.flush();
    }
}

fn messages_until(current: u64, threshold: u64, delta: f64) -> Option<u64> {
    if current >= threshold {
        return Some(0);
    }
    if delta <= 0.0 {
        return None;
    }
    Some(((threshold - current) as f64 / delta).ceil() as u64)
}

fn refit_into(
    weights: &RwLock<ForecastWeights>,
    samples: &[TrainingSample],
    model_path: Option<&Path>,
) -> bool {
    let current = weights.read().unwrap_or_else(|e| e.into_inner()).clone();
    let Some(fitted) = current.refit(samples) else {
        debug!(samples = samples.len(), "Refit found no usable signal; keeping weights");
        return false;
    };
    info!(
        samples = samples.len(),
        complexity = fitted.complexity,
        tool_results = fitted.tool_results,
        memory_ops = fitted.memory_ops,
        time_of_day = fitted.time_of_day,
        "Refit forecast weights"
    );
    *weights.write().unwrap_or_else(|e| e.into_inner()) = fitted.clone();
    if let Some(path) = model_path {
        persist::write_with_retry(MODEL_FILE, || persist::write_json(path, &fitted));
    }
    true
}
