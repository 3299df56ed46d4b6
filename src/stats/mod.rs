//! Durable session statistics.
//!
//! | Submodule | What it owns                                                  |
//! |-----------|---------------------------------------------------------------|
//! | `store`   | [`StatsStore`]: rolling logs, session counters, batched flush |
//! | `report`  | [`StatsReport`]: aggregates over a time range                 |
//!
//! Records are serialized as one JSON object per line. Fields added in later
//! versions carry `#[serde(default)]` so older logs keep loading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod report;
mod store;

pub use report::{ActorSummary, StatsReport};
pub use store::StatsStore;

/// Identifier handed out by [`StatsStore::start_session`].
pub type SessionId = Uuid;

/// What caused a context clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Forecast or drift signalled that the window needed clearing
    #[default]
    Threshold,
    /// The user or host asked for it
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Threshold => "threshold",
            TriggerKind::Manual => "manual",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One context-clearing action. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearEvent {
    pub timestamp: DateTime<Utc>,
    /// Token count when the clear was triggered
    pub tokens_before: u64,
    /// Tool-result entries removed
    pub entries_removed: usize,
    /// Tokens reclaimed; never more than `tokens_before`
    pub tokens_saved: u64,
    #[serde(default)]
    pub trigger: TriggerKind,
    #[serde(default)]
    pub actor: Option<String>,
    /// Durable facts extracted before clearing
    #[serde(default)]
    pub patterns_extracted: u32,
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

impl ClearEvent {
    pub fn new(
        tokens_before: u64,
        entries_removed: usize,
        tokens_saved: u64,
        trigger: TriggerKind,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            tokens_before,
            entries_removed,
            tokens_saved: tokens_saved.min(tokens_before),
            trigger,
            actor: None,
            patterns_extracted: 0,
            session_id: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_patterns(mut self, patterns_extracted: u32) -> Self {
        self.patterns_extracted = patterns_extracted;
        self
    }

    pub fn in_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Kind of memory-like operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessOpKind {
    #[default]
    Read,
    Write,
    Search,
    /// A pattern was extracted into durable memory
    Extract,
}

impl AccessOpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessOpKind::Read => "read",
            AccessOpKind::Write => "write",
            AccessOpKind::Search => "search",
            AccessOpKind::Extract => "extract",
        }
    }
}

impl std::fmt::Display for AccessOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One memory-like operation (pattern read/write/search).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessOp {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub kind: AccessOpKind,
    pub resource: String,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

impl AccessOp {
    pub fn new(kind: AccessOpKind, resource: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            resource: resource.into(),
            actor: None,
            session_id: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn in_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Per-session counters. Created by `start_session`, finalized by
/// `end_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub session_id: SessionId,
    #[serde(default)]
    pub actor: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub clear_count: u32,
    #[serde(default)]
    pub tokens_saved: u64,
    #[serde(default)]
    pub memory_ops: u64,
    #[serde(default)]
    pub peak_tokens: u64,
}

impl SessionMetrics {
    pub fn new(actor: Option<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            actor,
            started_at: Utc::now(),
            ended_at: None,
            input_tokens: 0,
            output_tokens: 0,
            messages: 0,
            clear_count: 0,
            tokens_saved: 0,
            memory_ops: 0,
            peak_tokens: 0,
        }
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Memory-like operations per message so far.
    pub fn memory_op_rate(&self) -> f64 {
        if self.messages == 0 {
            0.0
        } else {
            self.memory_ops as f64 / self.messages as f64
        }
    }
}
