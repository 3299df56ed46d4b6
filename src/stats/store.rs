//! The stats store: rolling clear / access-op / session logs on disk.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{AccessOp, ClearEvent, SessionId, SessionMetrics, StatsReport};
use crate::config::StorageConfig;
use crate::errors::EngineError;
use crate::persist;

const CLEARS_FILE: &str = "clears.jsonl";
const ACCESS_OPS_FILE: &str = "access_ops.jsonl";
const SESSIONS_FILE: &str = "sessions.jsonl";

#[derive(Debug, Default, Clone, Copy)]
struct Dirty {
    clears: bool,
    ops: bool,
    sessions: bool,
}

impl Dirty {
    fn any(&self) -> bool {
        self.clears || self.ops || self.sessions
    }
}

#[derive(Debug, Default)]
struct StoreState {
    clears: VecDeque<ClearEvent>,
    ops: VecDeque<AccessOp>,
    sessions: VecDeque<SessionMetrics>,
    active: HashMap<SessionId, SessionMetrics>,
    writes_since_flush: usize,
    dirty: Dirty,
}

/// Append-only, capped logs of clear events, memory-like operations and
/// finalized sessions, plus counters for sessions still in progress.
///
/// All methods take `&self`; mutations are serialized by an internal mutex
/// and flushes by a second one, so the store can be shared behind an `Arc`
/// by several event sources.
pub struct StatsStore {
    dir: PathBuf,
    max_clear_events: usize,
    max_access_ops: usize,
    max_sessions: usize,
    flush_every: usize,
    state: Mutex<StoreState>,
    flush_lock: Mutex<()>,
}

impl StatsStore {
    /// Open (or create) the store under `dir`, loading existing logs.
    ///
    /// Fails only when the directory cannot be created.
    pub fn open(dir: &Path, config: &StorageConfig) -> Result<Self, EngineError> {
        persist::ensure_dir(dir)?;

        let mut state = StoreState {
            clears: persist::read_jsonl(&dir.join(CLEARS_FILE)).into(),
            ops: persist::read_jsonl(&dir.join(ACCESS_OPS_FILE)).into(),
            sessions: persist::read_jsonl(&dir.join(SESSIONS_FILE)).into(),
            ..StoreState::default()
        };
        trim(&mut state.clears, config.max_clear_events);
        trim(&mut state.ops, config.max_access_ops);
        trim(&mut state.sessions, config.max_sessions);

        debug!(
            dir = %dir.display(),
            clears = state.clears.len(),
            ops = state.ops.len(),
            sessions = state.sessions.len(),
            "Opened stats store"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            max_clear_events: config.max_clear_events,
            max_access_ops: config.max_access_ops,
            max_sessions: config.max_sessions,
            flush_every: config.flush_every.max(1),
            state: Mutex::new(state),
            flush_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a context clear. Attributed to its session, or to the most
    /// recently started active session when it names none.
    pub fn record_clear(&self, mut event: ClearEvent) {
        event.tokens_saved = event.tokens_saved.min(event.tokens_before);
        let flush_due = {
            let mut state = self.lock();
            if let Some(session) = target_session(&mut state.active, event.session_id) {
                session.clear_count += 1;
                session.tokens_saved += event.tokens_saved;
                event.session_id.get_or_insert(session.session_id);
            }
            state.clears.push_back(event);
            trim(&mut state.clears, self.max_clear_events);
            state.dirty.clears = true;
            self.note_write(&mut state)
        };
        if flush_due {
            self.flush();
        }
    }

    /// Record a memory-like operation.
    pub fn record_access_op(&self, mut op: AccessOp) {
        let flush_due = {
            let mut state = self.lock();
            if let Some(session) = target_session(&mut state.active, op.session_id) {
                session.memory_ops += 1;
                op.session_id.get_or_insert(session.session_id);
            }
            state.ops.push_back(op);
            trim(&mut state.ops, self.max_access_ops);
            state.dirty.ops = true;
            self.note_write(&mut state)
        };
        if flush_due {
            self.flush();
        }
    }

    /// Begin tracking a session and return its id.
    pub fn start_session(&self, actor: &str) -> SessionId {
        let actor = (!actor.trim().is_empty()).then(|| actor.to_string());
        let session = SessionMetrics::new(actor);
        let id = session.session_id;
        self.lock().active.insert(id, session);
        info!(session = %id, "Session started");
        id
    }

    /// Add one message's token usage to a session. `current_tokens` is the
    /// context size after the message and feeds the peak counter.
    pub fn record_usage(
        &self,
        session_id: SessionId,
        input_tokens: u64,
        output_tokens: u64,
        current_tokens: u64,
    ) {
        let mut state = self.lock();
        match state.active.get_mut(&session_id) {
            Some(session) => {
                session.input_tokens += input_tokens;
                session.output_tokens += output_tokens;
                session.messages += 1;
                session.peak_tokens = session.peak_tokens.max(current_tokens);
            }
            None => debug!(session = %session_id, "Usage for unknown session ignored"),
        }
    }

    /// Snapshot of an in-progress session.
    pub fn session(&self, session_id: SessionId) -> Option<SessionMetrics> {
        self.lock().active.get(&session_id).cloned()
    }

    /// Finalize a session, persist it and return its metrics.
    ///
    /// Returns `None` for an unknown or already-ended session.
    pub fn end_session(&self, session_id: SessionId) -> Option<SessionMetrics> {
        let metrics = {
            let mut state = self.lock();
            let mut metrics = state.active.remove(&session_id)?;
            metrics.finish();
            state.sessions.push_back(metrics.clone());
            trim(&mut state.sessions, self.max_sessions);
            state.dirty.sessions = true;
            metrics
        };
        info!(
            session = %session_id,
            messages = metrics.messages,
            clears = metrics.clear_count,
            tokens_saved = metrics.tokens_saved,
            "Session ended"
        );
        self.flush();
        Some(metrics)
    }

    /// Clear events with `since <= timestamp <= until`, oldest first.
    pub fn query(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<ClearEvent> {
        self.lock()
            .clears
            .iter()
            .filter(|e| in_range(e.timestamp, since, until))
            .cloned()
            .collect()
    }

    /// Memory-like operations in the range, oldest first.
    pub fn query_access_ops(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<AccessOp> {
        self.lock()
            .ops
            .iter()
            .filter(|op| in_range(op.timestamp, since, until))
            .cloned()
            .collect()
    }

    /// Finalized sessions that started in the range, oldest first.
    pub fn query_sessions(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<SessionMetrics> {
        self.lock()
            .sessions
            .iter()
            .filter(|s| in_range(s.started_at, since, until))
            .cloned()
            .collect()
    }

    /// Aggregate everything in the range. Zero-valued when empty.
    pub fn report(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> StatsReport {
        let clears = self.query(since, until);
        let ops = self.query_access_ops(since, until);
        let sessions = self.query_sessions(since, until);
        StatsReport::build(&clears, &ops, &sessions, since, until)
    }

    fn note_write(&self, state: &mut StoreState) -> bool {
        state.writes_since_flush += 1;
        state.writes_since_flush >= self.flush_every
    }

    /// Write dirty logs to disk. Returns `false` if any write failed twice;
    /// the records stay in memory and are retried on the next flush.
    pub fn flush(&self) -> bool {
        let _serial = self.flush_lock.lock().unwrap_or_else(|e| e.into_inner());

        let (dirty, clears, ops, sessions) = {
            let mut state = self.lock();
            let dirty = state.dirty;
            if !dirty.any() {
                return true;
            }
            state.dirty = Dirty::default();
            state.writes_since_flush = 0;
            (
                dirty,
                dirty.clears.then(|| state.clears.clone()),
                dirty.ops.then(|| state.ops.clone()),
                dirty.sessions.then(|| state.sessions.clone()),
            )
        };

        let mut failed = Dirty::default();
        if let Some(clears) = clears {
            let path = self.dir.join(CLEARS_FILE);
            failed.clears =
                !persist::write_with_retry(CLEARS_FILE, || persist::write_jsonl(&path, &clears));
        }
        if let Some(ops) = ops {
            let path = self.dir.join(ACCESS_OPS_FILE);
            failed.ops =
                !persist::write_with_retry(ACCESS_OPS_FILE, || persist::write_jsonl(&path, &ops));
        }
        if let Some(sessions) = sessions {
            let path = self.dir.join(SESSIONS_FILE);
            failed.sessions = !persist::write_with_retry(SESSIONS_FILE, || {
                persist::write_jsonl(&path, &sessions)
            });
        }

        if failed.any() {
            warn!(dir = %self.dir.display(), "Stats flush incomplete; will retry on next write");
            let mut state = self.lock();
            state.dirty.clears |= failed.clears;
            state.dirty.ops |= failed.ops;
            state.dirty.sessions |= failed.sessions;
            return false;
        }

        debug!(
            clears = dirty.clears,
            ops = dirty.ops,
            sessions = dirty.sessions,
            "Stats flushed"
        );
        true
    }
}

impl Drop for StatsStore {
    fn drop(&mut self) {
        self.flush();
    }
}

fn trim<T>(log: &mut VecDeque<T>, cap: usize) {
    while log.len() > cap {
        log.pop_front();
    }
}

fn in_range(at: DateTime<Utc>, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> bool {
    since.is_none_or(|s| at >= s) && until.is_none_or(|u| at <= u)
}

fn target_session(
    active: &mut HashMap<SessionId, SessionMetrics>,
    requested: Option<SessionId>,
) -> Option<&mut SessionMetrics> {
    match requested {
        Some(id) => active.get_mut(&id),
        None => active.values_mut().max_by_key(|s| s.started_at),
    }
}
