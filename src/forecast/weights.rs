use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SessionSnapshot, TrainingSample};

/// Tokens attributed to one memory-like operation when turning the op rate
/// into a per-message estimate.
pub const MEMORY_OP_TOKEN_COST: f64 = 500.0;

const COMPLEXITY_RATIO_BOUNDS: (f64, f64) = (0.25, 4.0);
const TOOL_SHARE_BOUNDS: (f64, f64) = (0.02, 0.8);

/// The four blend weights. Always normalized to sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastWeights {
    pub complexity: f64,
    pub tool_results: f64,
    pub memory_ops: f64,
    pub time_of_day: f64,
    #[serde(default)]
    pub fitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub samples_used: usize,
}

impl Default for ForecastWeights {
    fn default() -> Self {
        Self {
            complexity: 0.4,
            tool_results: 0.2,
            memory_ops: 0.3,
            time_of_day: 0.1,
            fitted_at: None,
            samples_used: 0,
        }
    }
}

impl ForecastWeights {
    pub fn sum(&self) -> f64 {
        self.complexity + self.tool_results + self.memory_ops + self.time_of_day
    }

    /// Estimated tokens added per message. Never negative.
    pub fn per_message_delta(&self, snapshot: &SessionSnapshot) -> f64 {
        let tpm = snapshot.recent_tokens_per_message.max(0.0);
        let delta = self.complexity * tpm * snapshot.task_complexity.multiplier()
            + self.tool_results * snapshot.avg_tool_result_tokens.max(0.0)
            + self.memory_ops * snapshot.memory_op_rate.max(0.0) * MEMORY_OP_TOKEN_COST
            + self.time_of_day * tpm * snapshot.time_of_day().multiplier();
        if delta.is_finite() { delta.max(0.0) } else { 0.0 }
    }

    /// Re-estimate from observed outcomes.
    ///
    /// The complexity weight is scaled by how far real growth departed from
    /// the nominal complexity multiplier, the tool-result weight becomes the
    /// observed share of growth explained by tool results, and the other two
    /// carry over. The result is renormalized. Returns `None` when no sample
    /// carries usable signal.
    pub fn refit(&self, samples: &[TrainingSample]) -> Option<ForecastWeights> {
        let mut complexity_ratios = Vec::new();
        let mut tool_shares = Vec::new();

        for sample in samples {
            let observed = sample.observed_delta();
            if observed <= 0.0 {
                continue;
            }
            let f = &sample.features;
            let nominal = f.recent_tokens_per_message * f.task_complexity.multiplier();
            if nominal > 0.0 {
                complexity_ratios.push(observed / nominal);
            }
            if f.avg_tool_result_tokens > 0.0 {
                tool_shares.push(f.avg_tool_result_tokens / observed);
            }
        }

        if complexity_ratios.is_empty() && tool_shares.is_empty() {
            return None;
        }

        let defaults = ForecastWeights::default();
        let complexity = mean(&complexity_ratios)
            .map(|r| defaults.complexity * r.clamp(COMPLEXITY_RATIO_BOUNDS.0, COMPLEXITY_RATIO_BOUNDS.1))
            .unwrap_or(self.complexity);
        let tool_results = mean(&tool_shares)
            .map(|s| s.clamp(TOOL_SHARE_BOUNDS.0, TOOL_SHARE_BOUNDS.1))
            .unwrap_or(self.tool_results);

        let raw = ForecastWeights {
            complexity,
            tool_results,
            memory_ops: self.memory_ops,
            time_of_day: self.time_of_day,
            fitted_at: Some(Utc::now()),
            samples_used: samples.len(),
        };
        raw.normalized()
    }

    fn normalized(mut self) -> Option<ForecastWeights> {
        let total = self.sum();
        if !total.is_finite() || total <= 0.0 {
            return None;
        }
        self.complexity /= total;
        self.tool_results /= total;
        self.memory_ops /= total;
        self.time_of_day /= total;
        Some(self)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::TaskComplexity;

    fn snapshot(tpm: f64, tool: f64) -> SessionSnapshot {
        SessionSnapshot {
            hour: 20,
            recent_tokens_per_message: tpm,
            avg_tool_result_tokens: tool,
            task_complexity: TaskComplexity::Simple,
            ..SessionSnapshot::new(50_000)
        }
    }

    fn sample(tpm: f64, tool: f64, observed_per_message: u64) -> TrainingSample {
        TrainingSample {
            recorded_at: Utc::now(),
            features: snapshot(tpm, tool),
            actual_after_5: 50_000 + observed_per_message * 5,
            actual_after_10: 50_000 + observed_per_message * 10,
        }
    }

    #[test]
    fn test_defaults_sum_to_one() {
        assert!((ForecastWeights::default().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_per_message_delta_with_defaults() {
        // evening (1.0), simple (1.0): 0.4*1000 + 0.2*500 + 0 + 0.1*1000
        let delta = ForecastWeights::default().per_message_delta(&snapshot(1_000.0, 500.0));
        assert!((delta - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_refit_renormalizes() {
        let samples: Vec<_> = (0..60).map(|_| sample(1_000.0, 400.0, 2_000)).collect();
        let fitted = ForecastWeights::default().refit(&samples).unwrap();
        assert!((fitted.sum() - 1.0).abs() < 1e-9);
        assert!(fitted.complexity > fitted.time_of_day);
        assert_eq!(fitted.samples_used, 60);
        assert!(fitted.fitted_at.is_some());
    }

    #[test]
    fn test_refit_without_signal_is_none() {
        let samples: Vec<_> = (0..60).map(|_| sample(0.0, 0.0, 0)).collect();
        assert!(ForecastWeights::default().refit(&samples).is_none());
    }

    #[test]
    fn test_refit_raises_complexity_when_growth_outpaces_it() {
        let slow: Vec<_> = (0..60).map(|_| sample(1_000.0, 100.0, 500)).collect();
        let fast: Vec<_> = (0..60).map(|_| sample(1_000.0, 100.0, 3_000)).collect();
        let slow_fit = ForecastWeights::default().refit(&slow).unwrap();
        let fast_fit = ForecastWeights::default().refit(&fast).unwrap();
        assert!(fast_fit.complexity > slow_fit.complexity);
    }
}
