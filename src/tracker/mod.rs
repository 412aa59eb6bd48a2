//! Seen-email tracker: delta detection across stateless runs.
//!
//! `SeenTracker::evaluate` is pure: it takes the previous Run State and the
//! run's classified messages and returns the Notification Batch together
//! with the next Run State. Loading and committing state is done by the
//! caller through a `StateStore`.
//!
//! **Core invariant: an id that was part of a delivered batch never shows
//! up in a later batch.** Every examined id is recorded, notified or not.

pub mod state;
pub mod store;

pub use state::{RunState, STATE_SCHEMA_VERSION};
pub use store::{FileStateStore, MemoryStateStore, StateStore};

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ClassifierError;
use crate::mail::types::{ClassifiedMessage, Message};

/// Default seen-set retention window.
pub const DEFAULT_RETENTION_DAYS: i64 = 14;

/// Default "application received/submitted" patterns.
pub const DEFAULT_CONFIRMATION_PATTERNS: &[&str] = &[
    r"application (has been |was )?(received|submitted)",
    r"thanks? (you )?for (applying|your application|your interest)",
    r"we('ve| have) received your application",
    r"your application (to|for) .+ (has been|was) (received|submitted)",
    r"application confirmation",
];

// ── Confirmation exclusion ──────────────────────────────────────────

/// Suppresses application-submission acknowledgments.
#[derive(Debug, Clone)]
pub struct ConfirmationRule {
    patterns: Vec<Regex>,
}

impl ConfirmationRule {
    /// Compile case-insensitive patterns.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ClassifierError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p.as_ref())
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ClassifierError::InvalidRule {
                        pattern: p.as_ref().to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Rule over `DEFAULT_CONFIRMATION_PATTERNS`.
    pub fn default_rule() -> Result<Self, ClassifierError> {
        Self::new(DEFAULT_CONFIRMATION_PATTERNS)
    }

    /// Rule that never matches.
    pub fn disabled() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// True if the subject or body looks like a submission acknowledgment.
    pub fn matches(&self, message: &Message) -> bool {
        self.patterns.iter().any(|re| {
            re.is_match(&message.subject)
                || re.is_match(&message.snippet)
                || re.is_match(&message.body)
        })
    }
}

// ── Tracker ─────────────────────────────────────────────────────────

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Seen entries not examined within this window are dropped.
    pub retention: Duration,
    /// Optional hard cap on seen entries.
    pub max_entries: Option<usize>,
    pub confirmation: ConfirmationRule,
}

impl TrackerConfig {
    pub fn new(retention: Duration, confirmation: ConfirmationRule) -> Self {
        Self {
            retention,
            max_entries: None,
            confirmation,
        }
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }
}

/// Why examined messages stayed out of the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipTally {
    pub already_seen: usize,
    pub not_job_related: usize,
    pub confirmations: usize,
}

/// Result of evaluating one run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Newly discovered job-related messages, in source order.
    pub batch: Vec<ClassifiedMessage>,
    /// State to commit once the batch has been delivered.
    pub state: RunState,
    pub skipped: SkipTally,
    /// Seen entries dropped by retention.
    pub pruned: usize,
}

/// Computes Notification Batches against the persisted seen-set.
#[derive(Debug, Clone)]
pub struct SeenTracker {
    config: TrackerConfig,
}

impl SeenTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Diff the run's messages against `previous` at time `now`.
    pub fn evaluate(
        &self,
        previous: &RunState,
        messages: &[ClassifiedMessage],
        now: DateTime<Utc>,
    ) -> RunOutcome {
        let mut next = previous.clone();
        let mut examined: HashSet<String> = HashSet::with_capacity(messages.len());
        let mut batch = Vec::new();
        let mut skipped = SkipTally::default();

        for item in messages {
            let id = item.id();
            let first_sighting = !previous.contains(id) && examined.insert(id.to_string());
            next.mark_seen(id, now);

            if !first_sighting {
                examined.insert(id.to_string());
                skipped.already_seen += 1;
                continue;
            }
            if !item.classification.is_job_related() {
                skipped.not_job_related += 1;
                continue;
            }
            if self.config.confirmation.matches(&item.message) {
                debug!(
                    id = %id,
                    subject = %item.message.subject,
                    "Skipping application confirmation"
                );
                skipped.confirmations += 1;
                continue;
            }
            batch.push(item.clone());
        }

        let pruned = next.prune(now, self.config.retention, self.config.max_entries, &examined);
        next.last_run = Some(now);

        debug!(
            examined = messages.len(),
            new = batch.len(),
            already_seen = skipped.already_seen,
            pruned,
            seen = next.len(),
            "Evaluated run against seen-set"
        );

        RunOutcome {
            batch,
            state: next,
            skipped,
            pruned,
        }
    }
}

/// Load the previous state, failing open.
///
/// A missing state is a first run. An unreadable or corrupt state is
/// replaced by an empty one and reported as a warning; it never fails the
/// run.
pub async fn load_or_empty(store: &dyn StateStore) -> (RunState, Option<String>) {
    match store.load().await {
        Ok(Some(state)) => (state, None),
        Ok(None) => {
            debug!(location = %store.location(), "No previous run state, starting fresh");
            (RunState::empty(), None)
        }
        Err(e) => {
            warn!(error = %e, "Previous run state unusable, starting fresh");
            (RunState::empty(), Some(e.to_string()))
        }
    }
}
