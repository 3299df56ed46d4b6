//! Per-resource access statistics and pre-fetch prediction.
//!
//! | Submodule | What it owns                                                    |
//! |-----------|-----------------------------------------------------------------|
//! | `record`  | [`ResourceAccessRecord`]: counts, recency, interval, 7-day ring |
//! | `tracker` | [`AccessTracker`]: ranking, prediction, pruning, persistence    |
//!
//! Ranking weights (`top_patterns`):
//! - accesses in the trailing window: 60%
//! - total accesses: 30%
//! - recency decay: 10%
//!
//! Prediction weights (`predict_next`, 0-100 points):
//! - recent-access volume: 40
//! - interval regularity (boosted within ±2h of the expected next access): 30
//! - same-actor affinity: 20
//! - touched within the last hour: 10

mod record;
mod tracker;

pub use record::ResourceAccessRecord;
pub use tracker::{AccessTracker, PredictedAccess, RankedResource};
