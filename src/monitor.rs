//! Monitor runs: fetch → classify → diff → notify → commit.
//!
//! **A run either commits its Run State after a successful notification or
//! leaves the stored state untouched.** Upstream failures and deadline
//! overruns never write partial state; the next scheduled run is the retry.
//! The run deadline covers everything up to delivery. Once delivery starts,
//! delivery and commit run to completion.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::error::{ConfigError, Error, Result};
use crate::mail::source::EmailSource;
use crate::mail::types::ClassifiedMessage;
use crate::notify::{DEFAULT_DIGEST_SUBJECT, Digest, Notifier};
use crate::tracker::{RunOutcome, RunState, SeenTracker, StateStore, load_or_empty};

/// External collaborators of a run.
pub struct MonitorDeps {
    pub source: Arc<dyn EmailSource>,
    pub classifier: Arc<dyn Classifier>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn StateStore>,
}

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub max_results: usize,
    pub run_timeout: Duration,
    pub digest_subject: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_results: 50,
            run_timeout: Duration::from_secs(240),
            digest_subject: DEFAULT_DIGEST_SUBJECT.to_string(),
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub emails_checked: usize,
    pub job_related_found: usize,
    pub new_emails: usize,
    pub already_seen: usize,
    pub confirmations_excluded: usize,
    pub seen_set_size: usize,
    pub pruned: usize,
    pub notified_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Snapshot of the persisted state.
#[derive(Debug, Clone, Serialize)]
pub struct StateStats {
    pub location: String,
    pub total_seen: usize,
    pub last_run: Option<DateTime<Utc>>,
    pub oldest_entry: Option<DateTime<Utc>>,
}

/// Everything computed before the commit.
struct PreparedRun {
    outcome: RunOutcome,
    evaluated_at: DateTime<Utc>,
    emails_checked: usize,
    job_related_found: usize,
    warnings: Vec<String>,
}

/// Runs the email check against persisted state.
pub struct Monitor {
    deps: MonitorDeps,
    tracker: SeenTracker,
    settings: RunSettings,
}

impl Monitor {
    pub fn new(deps: MonitorDeps, tracker: SeenTracker, settings: RunSettings) -> Self {
        Self {
            deps,
            tracker,
            settings,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Perform one run.
    pub async fn run_once(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, source = self.deps.source.name(), "Checking for new emails");

        let deadline = self.settings.run_timeout;
        let prepared = tokio::time::timeout(deadline, self.prepare(run_id))
            .await
            .map_err(|_| {
                error!(%run_id, ?deadline, "Run timed out before delivery, state not persisted");
                Error::Timeout { after: deadline }
            })??;

        // Past this point the run is not cancelled: a started delivery may
        // complete even if dropped, so it must be followed by its commit.
        if !prepared.outcome.batch.is_empty() {
            let digest = Digest::from_batch(
                &self.settings.digest_subject,
                &prepared.outcome.batch,
                prepared.evaluated_at,
            );
            self.deps.notifier.deliver(&digest).await?;
            info!(
                %run_id,
                notifier = self.deps.notifier.name(),
                count = digest.total(),
                "Notifications sent"
            );
        }

        if let Err(e) = self.deps.store.save(&prepared.outcome.state).await {
            error!(%run_id, error = %e, "Failed to persist run state");
            return Err(e.into());
        }

        let outcome = prepared.outcome;
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            emails_checked: prepared.emails_checked,
            job_related_found: prepared.job_related_found,
            new_emails: outcome.batch.len(),
            already_seen: outcome.skipped.already_seen,
            confirmations_excluded: outcome.skipped.confirmations,
            seen_set_size: outcome.state.len(),
            pruned: outcome.pruned,
            notified_ids: outcome.batch.iter().map(|m| m.id().to_string()).collect(),
            warnings: prepared.warnings,
        };

        info!(
            %run_id,
            checked = report.emails_checked,
            job_related = report.job_related_found,
            new = report.new_emails,
            seen = report.seen_set_size,
            "Monitor check completed"
        );
        Ok(report)
    }

    /// Load, fetch, classify and diff. Nothing is sent or written here.
    async fn prepare(&self, run_id: Uuid) -> Result<PreparedRun> {
        let (previous, load_warning) = load_or_empty(self.deps.store.as_ref()).await;
        let warnings: Vec<String> = load_warning.into_iter().collect();
        debug!(
            %run_id,
            seen = previous.len(),
            last_run = ?previous.last_run,
            "Loaded previous state"
        );

        let messages = self
            .deps
            .source
            .fetch_recent(self.settings.max_results)
            .await?;
        info!(%run_id, count = messages.len(), "Fetched emails to process");

        let mut classified = Vec::with_capacity(messages.len());
        for message in messages {
            let classification = self.deps.classifier.classify(&message).await?;
            classified.push(ClassifiedMessage::new(message, classification));
        }
        let job_related_found = classified
            .iter()
            .filter(|m| m.classification.is_job_related())
            .count();
        info!(%run_id, job_related = job_related_found, "Identified job-related emails");

        let now = Utc::now();
        let outcome = self.tracker.evaluate(&previous, &classified, now);

        if outcome.batch.is_empty() {
            info!(%run_id, "No new job-related emails found");
        }

        Ok(PreparedRun {
            outcome,
            evaluated_at: now,
            emails_checked: classified.len(),
            job_related_found,
            warnings,
        })
    }

    /// Inspect the persisted state without modifying it.
    pub async fn stats(&self) -> Result<StateStats> {
        state_stats(self.deps.store.as_ref()).await
    }

    /// Replace the persisted state with an empty one.
    pub async fn reset(&self) -> Result<()> {
        reset_state(self.deps.store.as_ref()).await
    }
}

/// Summarize what a store currently holds. Unlike a run, a corrupt state
/// is reported as an error here.
pub async fn state_stats(store: &dyn StateStore) -> Result<StateStats> {
    let state = store.load().await?.unwrap_or_else(RunState::empty);
    Ok(StateStats {
        location: store.location(),
        total_seen: state.len(),
        last_run: state.last_run,
        oldest_entry: state.oldest_entry(),
    })
}

/// Overwrite a store with an empty state.
pub async fn reset_state(store: &dyn StateStore) -> Result<()> {
    store.save(&RunState::empty()).await?;
    warn!(location = %store.location(), "Run state reset");
    Ok(())
}

// ── Scheduling ──────────────────────────────────────────────────────

/// When the daemon loop runs.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Every fixed period, starting immediately.
    Interval(Duration),
    /// On a cron expression (with seconds field), e.g. `0 0 8,20 * * *`.
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    /// Parse a cron expression.
    pub fn cron(expr: &str) -> std::result::Result<Self, ConfigError> {
        cron::Schedule::from_str(expr)
            .map(|s| Self::Cron(Box::new(s)))
            .map_err(|e| ConfigError::InvalidValue {
                key: "cron".into(),
                message: format!("invalid cron expression {expr:?}: {e}"),
            })
    }

    /// Delay from `now` until the next cron fire. `None` for intervals or
    /// schedules with no future fire time.
    pub fn next_cron_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Interval(_) => None,
            Self::Cron(schedule) => schedule
                .after(&now)
                .next()
                .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO)),
        }
    }
}

/// Handle to a running monitor loop.
pub struct MonitorLoop {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl MonitorLoop {
    /// Stop after the current run (if any) and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!("Monitor loop task panicked: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawn a background task that runs the monitor on `schedule`.
///
/// Runs never overlap: the next wait starts only after a run finishes.
/// Failed runs are logged; the next tick is the retry. Shutdown is only
/// observed between runs, so a commit is never interrupted.
pub fn spawn_monitor_loop(monitor: Arc<Monitor>, schedule: Schedule) -> MonitorLoop {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut ticker = match &schedule {
            Schedule::Interval(period) => {
                info!("Monitor started, checking every {}s", period.as_secs_f64());
                let mut ticker = tokio::time::interval(*period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(ticker)
            }
            Schedule::Cron(_) => {
                info!("Monitor started on cron schedule");
                None
            }
        };

        loop {
            let wait = async {
                match ticker.as_mut() {
                    Some(t) => {
                        t.tick().await;
                        true
                    }
                    None => match schedule.next_cron_delay(Utc::now()) {
                        Some(delay) => {
                            debug!(?delay, "Sleeping until next cron fire");
                            tokio::time::sleep(delay).await;
                            true
                        }
                        None => false,
                    },
                }
            };

            let proceed = tokio::select! {
                proceed = wait => proceed,
                _ = shutdown_rx.changed() => false,
            };
            if !proceed || *shutdown_rx.borrow() {
                info!("Monitor loop shutting down");
                return;
            }

            if let Err(e) = monitor.run_once().await {
                error!(error = %e, "Monitor run failed");
            }
        }
    });

    MonitorLoop {
        handle,
        shutdown: shutdown_tx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_schedule_parses_with_seconds_field() {
        assert!(Schedule::cron("0 0 8,20 * * *").is_ok());
        assert!(matches!(
            Schedule::cron("not a cron"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn cron_delay_points_at_next_fire() {
        let schedule = Schedule::cron("0 0 8,20 * * *").unwrap();
        let now: DateTime<Utc> = "2026-05-01T07:30:00Z".parse().unwrap();
        assert_eq!(
            schedule.next_cron_delay(now),
            Some(Duration::from_secs(30 * 60))
        );

        let evening: DateTime<Utc> = "2026-05-01T20:00:00Z".parse().unwrap();
        assert_eq!(
            schedule.next_cron_delay(evening),
            Some(Duration::from_secs(12 * 3600))
        );
    }

    #[test]
    fn interval_has_no_cron_delay() {
        let schedule = Schedule::Interval(Duration::from_secs(300));
        assert!(schedule.next_cron_delay(Utc::now()).is_none());
    }

    #[test]
    fn run_report_serializes_like_handler_body() {
        let report = RunReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            emails_checked: 3,
            job_related_found: 2,
            new_emails: 1,
            already_seen: 0,
            confirmations_excluded: 1,
            seen_set_size: 3,
            pruned: 0,
            notified_ids: vec!["A".into()],
            warnings: vec![],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["emails_checked"], 3);
        assert_eq!(json["new_emails"], 1);
        assert!(json.get("warnings").is_none());
    }
}
