//! Priority-based eviction of tool results.
//!
//! When a clear is triggered the host hands every retained
//! [`ToolResultRecord`] to [`EvictionFilter::filter`] together with the current
//! token count. Each record resolves to a [`Priority`]:
//!
//! | Priority   | Kept when                                                   |
//! |------------|-------------------------------------------------------------|
//! | `critical` | always                                                      |
//! | `high`     | `current_tokens < emergency_threshold`                      |
//! | `medium`   | below the warning threshold and among the newest 10         |
//! | `low`      | below the warning threshold and among the newest 3          |
//!
//! Tools on the never-filter list are kept ahead of all of the above.

mod filter;
mod priority;

pub use filter::{
    BucketStats, Discarded, DiscardReason, EvictionFilter, FilterOutcome, FilterStats,
    RetainReason,
};
pub use priority::{Priority, ToolResultRecord};
