//! Context-window management for long-running assistant sessions: usage
//! statistics, access-pattern learning, token forecasting, drift scoring and
//! priority-based eviction of tool results.

pub mod access;
pub mod config;
pub mod drift;
pub mod engine;
pub mod errors;
pub mod eviction;
pub mod forecast;
pub mod logging;
pub mod persist;
pub mod stats;

pub use access::{AccessTracker, PredictedAccess, RankedResource, ResourceAccessRecord};
pub use config::EngineConfig;
pub use drift::{DriftCategory, DriftDetector, DriftIndicator, DriftReport, Severity};
pub use engine::{ClearDecision, ContextEngine};
pub use errors::EngineError;
pub use eviction::{EvictionFilter, FilterOutcome, FilterStats, Priority, ToolResultRecord};
pub use forecast::{
    ForecastResult, Recommendation, SessionSnapshot, TaskComplexity, TrainingSample,
    UsageForecaster,
};
pub use stats::{
    AccessOp, AccessOpKind, ClearEvent, SessionId, SessionMetrics, StatsReport, StatsStore,
    TriggerKind,
};
