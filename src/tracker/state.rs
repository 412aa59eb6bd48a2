//! Persisted Run State, the only continuity between runs.

use std::collections::BTreeMap;
use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version of the persisted state.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Seen-set plus last-run timestamp.
///
/// Each seen id maps to the last time a run examined it. Pruning by that
/// timestamp keeps ids that are still inside the fetch window alive, so a
/// message that keeps showing up is never forgotten and re-notified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub version: u32,
    pub seen: BTreeMap<String, DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::empty()
    }
}

impl RunState {
    /// Initial state for a first run.
    pub fn empty() -> Self {
        Self {
            version: STATE_SCHEMA_VERSION,
            seen: BTreeMap::new(),
            last_run: None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Record `id` as examined at `at`.
    pub fn mark_seen(&mut self, id: &str, at: DateTime<Utc>) {
        self.seen
            .entry(id.to_string())
            .and_modify(|t| *t = (*t).max(at))
            .or_insert(at);
    }

    /// Drop entries last seen before `now - retention`, then enforce the
    /// optional entry cap by evicting the least recently seen ids outside
    /// `protected`. Returns the number of entries removed.
    pub fn prune(
        &mut self,
        now: DateTime<Utc>,
        retention: Duration,
        max_entries: Option<usize>,
        protected: &HashSet<String>,
    ) -> usize {
        let before = self.seen.len();
        // A window reaching past the representable range keeps everything.
        if let Some(cutoff) = now.checked_sub_signed(retention) {
            self.seen.retain(|_, last_seen| *last_seen >= cutoff);
        }

        if let Some(max) = max_entries
            && self.seen.len() > max
        {
            let mut evictable: Vec<(DateTime<Utc>, String)> = self
                .seen
                .iter()
                .filter(|(id, _)| !protected.contains(*id))
                .map(|(id, t)| (*t, id.clone()))
                .collect();
            evictable.sort();
            let excess = self.seen.len() - max;
            for (_, id) in evictable.into_iter().take(excess) {
                self.seen.remove(&id);
            }
        }

        before - self.seen.len()
    }

    /// Oldest `last_seen` timestamp in the set.
    pub fn oldest_entry(&self) -> Option<DateTime<Utc>> {
        self.seen.values().min().copied()
    }

    /// Decode persisted state, accepting the current schema and the legacy
    /// `{"seen_emails": [...], "last_run": "..."}` layout.
    ///
    /// Legacy ids carry no timestamps; they are stamped with `loaded_at`.
    pub fn from_json(raw: &str, loaded_at: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        match serde_json::from_str::<StoredState>(raw)? {
            StoredState::Current(state) => Ok(state),
            StoredState::Legacy(legacy) => Ok(legacy.migrate(loaded_at)),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Any on-disk shape we know how to read.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredState {
    Current(RunState),
    Legacy(LegacyState),
}

#[derive(Deserialize)]
struct LegacyState {
    seen_emails: Vec<String>,
    #[serde(default)]
    last_run: Option<String>,
}

impl LegacyState {
    fn migrate(self, loaded_at: DateTime<Utc>) -> RunState {
        let last_run = self.last_run.as_deref().and_then(parse_legacy_timestamp);
        let mut state = RunState::empty();
        for id in &self.seen_emails {
            state.mark_seen(id, loaded_at);
        }
        state.last_run = last_run;
        state
    }
}

/// Legacy timestamps are naive ISO-8601 local times; read them as UTC.
fn parse_legacy_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(day: u32) -> DateTime<Utc> {
        format!("2026-03-{day:02}T12:00:00Z").parse().unwrap()
    }

    #[test]
    fn mark_seen_keeps_latest_timestamp() {
        let mut state = RunState::empty();
        state.mark_seen("a", ts(5));
        state.mark_seen("a", ts(3));
        assert_eq!(state.seen["a"], ts(5));
        state.mark_seen("a", ts(7));
        assert_eq!(state.seen["a"], ts(7));
    }

    #[test]
    fn prune_by_age() {
        let mut state = RunState::empty();
        state.mark_seen("old", ts(1));
        state.mark_seen("edge", ts(6));
        state.mark_seen("new", ts(19));

        let removed = state.prune(ts(20), Duration::days(14), None, &HashSet::new());
        assert_eq!(removed, 1);
        assert!(!state.contains("old"));
        // Exactly at the cutoff is kept.
        assert!(state.contains("edge"));
        assert!(state.contains("new"));
    }

    #[test]
    fn prune_with_unrepresentable_window_keeps_everything() {
        let mut state = RunState::empty();
        state.mark_seen("a", ts(1));
        state.mark_seen("b", ts(19));

        let removed = state.prune(ts(20), Duration::MAX, None, &HashSet::new());
        assert_eq!(removed, 0);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn prune_cap_evicts_least_recent_and_spares_protected() {
        let mut state = RunState::empty();
        state.mark_seen("a", ts(1));
        state.mark_seen("b", ts(2));
        state.mark_seen("c", ts(3));
        state.mark_seen("d", ts(4));

        let protected: HashSet<String> = ["a".to_string()].into_iter().collect();
        let removed = state.prune(ts(5), Duration::days(30), Some(2), &protected);
        assert_eq!(removed, 2);
        assert!(state.contains("a"));
        assert!(!state.contains("b"));
        assert!(!state.contains("c"));
        assert!(state.contains("d"));
    }

    #[test]
    fn json_roundtrip_current_schema() {
        let mut state = RunState::empty();
        state.mark_seen("18c2f", ts(2));
        state.last_run = Some(ts(2));
        let json = state.to_json().unwrap();
        let parsed = RunState::from_json(&json, ts(9)).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn legacy_state_is_migrated() {
        let json = r#"{
            "seen_emails": ["a1", "b2"],
            "last_run": "2026-03-01T08:30:00.123456"
        }"#;
        let state = RunState::from_json(json, ts(4)).unwrap();
        assert_eq!(state.version, STATE_SCHEMA_VERSION);
        assert_eq!(state.len(), 2);
        assert_eq!(state.seen["a1"], ts(4));
        assert_eq!(
            state.last_run.unwrap().to_rfc3339(),
            "2026-03-01T08:30:00.123456+00:00"
        );
    }

    #[test]
    fn legacy_state_without_last_run() {
        let json = r#"{ "seen_emails": [], "last_run": null }"#;
        let state = RunState::from_json(json, ts(4)).unwrap();
        assert!(state.is_empty());
        assert!(state.last_run.is_none());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(RunState::from_json("{ not json", ts(1)).is_err());
        assert!(RunState::from_json(r#"{"seen": 42}"#, ts(1)).is_err());
    }
}
