use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Access statistics for one named resource (a file, a stored pattern, ...).
///
/// `recent_accesses` holds the timestamps inside the trailing window in
/// ascending order, so window counts are a binary search rather than a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAccessRecord {
    pub resource_id: String,
    pub access_count: u64,
    pub first_accessed: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub last_actor: Option<String>,
    #[serde(default)]
    pub actor_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub recent_accesses: VecDeque<DateTime<Utc>>,
    /// Running mean of the gap between consecutive accesses; 0 until the
    /// second access.
    #[serde(default)]
    pub avg_interval_secs: f64,
}

impl ResourceAccessRecord {
    pub fn new(resource_id: impl Into<String>, actor: Option<&str>, at: DateTime<Utc>) -> Self {
        let mut record = Self {
            resource_id: resource_id.into(),
            access_count: 1,
            first_accessed: at,
            last_accessed: at,
            last_actor: None,
            actor_counts: BTreeMap::new(),
            recent_accesses: VecDeque::from([at]),
            avg_interval_secs: 0.0,
        };
        record.note_actor(actor, true);
        record
    }

    /// Apply one more access at `at`, then drop ring entries older than
    /// `window` relative to the newest access.
    pub fn record(&mut self, actor: Option<&str>, at: DateTime<Utc>, window: Duration) {
        let gap = (at - self.last_accessed).num_milliseconds().max(0) as f64 / 1000.0;
        self.access_count += 1;
        let intervals = (self.access_count - 1) as f64;
        self.avg_interval_secs += (gap - self.avg_interval_secs) / intervals;

        let newest = at >= self.last_accessed;
        self.first_accessed = self.first_accessed.min(at);
        self.last_accessed = self.last_accessed.max(at);
        self.note_actor(actor, newest);

        let pos = self.recent_accesses.partition_point(|t| *t <= at);
        self.recent_accesses.insert(pos, at);
        self.expire_before(self.last_accessed - window);
    }

    fn note_actor(&mut self, actor: Option<&str>, newest: bool) {
        if let Some(actor) = actor.filter(|a| !a.is_empty()) {
            if newest {
                self.last_actor = Some(actor.to_string());
            }
            *self.actor_counts.entry(actor.to_string()).or_default() += 1;
        }
    }

    fn expire_before(&mut self, cutoff: DateTime<Utc>) {
        while self.recent_accesses.front().is_some_and(|t| *t < cutoff) {
            self.recent_accesses.pop_front();
        }
    }

    /// Accesses within `window` before `now`.
    pub fn accesses_within(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let cutoff = now - window;
        let start = self.recent_accesses.partition_point(|t| *t < cutoff);
        let end = self.recent_accesses.partition_point(|t| *t <= now);
        end.saturating_sub(start)
    }

    /// Mean gap between accesses, `None` for a resource touched once.
    pub fn avg_interval(&self) -> Option<Duration> {
        (self.access_count > 1 && self.avg_interval_secs > 0.0)
            .then(|| Duration::milliseconds((self.avg_interval_secs * 1000.0) as i64))
    }

    /// When the next access is expected if the historical rhythm holds.
    pub fn predicted_next_access(&self) -> Option<DateTime<Utc>> {
        self.avg_interval().map(|gap| self.last_accessed + gap)
    }

    /// Share of accesses made by `actor`.
    pub fn actor_share(&self, actor: &str) -> f64 {
        let by_actor = self.actor_counts.get(actor).copied().unwrap_or(0);
        if self.access_count == 0 {
            0.0
        } else {
            by_actor as f64 / self.access_count as f64
        }
    }
}
