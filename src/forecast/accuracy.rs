use serde::Serialize;

use super::{ForecastWeights, TrainingSample};

/// Guards the percentage error against zero actuals.
const EPSILON: f64 = 1e-7;

/// Error metrics of the 5-message prediction against stored outcomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastAccuracy {
    pub samples: usize,
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    /// Mean absolute percentage error, in percent
    pub mape: f64,
    /// Coefficient of determination; 0 when the actuals have no variance
    pub r2: f64,
}

impl ForecastAccuracy {
    /// Score `weights` on `samples`. `None` when there is nothing to score.
    pub fn evaluate(weights: &ForecastWeights, samples: &[TrainingSample]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let pairs: Vec<(f64, f64)> = samples
            .iter()
            .map(|s| {
                let predicted = s.features.current_tokens as f64
                    + 5.0 * weights.per_message_delta(&s.features);
                (s.actual_after_5 as f64, predicted)
            })
            .collect();
        let n = pairs.len() as f64;

        let mae = pairs.iter().map(|(y, p)| (y - p).abs()).sum::<f64>() / n;
        let mse = pairs.iter().map(|(y, p)| (y - p).powi(2)).sum::<f64>() / n;
        let mape = pairs
            .iter()
            .map(|(y, p)| (y - p).abs() / y.abs().max(EPSILON))
            .sum::<f64>()
            / n
            * 100.0;

        let mean_y = pairs.iter().map(|(y, _)| y).sum::<f64>() / n;
        let ss_tot = pairs.iter().map(|(y, _)| (y - mean_y).powi(2)).sum::<f64>();
        let ss_res = mse * n;
        let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

        Some(Self {
            samples: pairs.len(),
            mae,
            mse,
            rmse: mse.sqrt(),
            mape,
            r2,
        })
    }
}

impl std::fmt::Display for ForecastAccuracy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "n={} MAE={:.1} RMSE={:.1} MAPE={:.2}% R²={:.3}",
            self.samples, self.mae, self.rmse, self.mape, self.r2
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::{SessionSnapshot, TaskComplexity};
    use chrono::Utc;

    fn sample(current: u64, tpm: f64, actual_after_5: u64) -> TrainingSample {
        TrainingSample {
            recorded_at: Utc::now(),
            features: SessionSnapshot {
                hour: 20,
                recent_tokens_per_message: tpm,
                task_complexity: TaskComplexity::Simple,
                ..SessionSnapshot::new(current)
            },
            actual_after_5,
            actual_after_10: actual_after_5,
        }
    }

    #[test]
    fn test_empty_is_none() {
        assert!(ForecastAccuracy::evaluate(&ForecastWeights::default(), &[]).is_none());
    }

    #[test]
    fn test_perfect_predictions() {
        // Default weights, evening, simple: delta = 0.5 * tpm.
        let samples = vec![
            sample(10_000, 1_000.0, 12_500),
            sample(20_000, 2_000.0, 25_000),
            sample(30_000, 400.0, 31_000),
        ];
        let acc = ForecastAccuracy::evaluate(&ForecastWeights::default(), &samples).unwrap();
        assert_eq!(acc.samples, 3);
        assert!(acc.mae < 1e-6);
        assert!(acc.rmse < 1e-6);
        assert!((acc.r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_metrics() {
        let samples = vec![sample(10_000, 1_000.0, 13_500), sample(10_000, 1_000.0, 11_500)];
        let acc = ForecastAccuracy::evaluate(&ForecastWeights::default(), &samples).unwrap();
        // predicted 12_500 both times; errors of 1_000
        assert!((acc.mae - 1_000.0).abs() < 1e-6);
        assert!((acc.rmse - 1_000.0).abs() < 1e-6);
        assert!(acc.mape > 0.0);
    }
}
