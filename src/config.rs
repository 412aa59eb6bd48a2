//! Configuration types.
//!
//! Everything comes from environment variables; the optional rules file
//! (`MONITOR_RULES_PATH`) carries classifier keyword lists and the
//! confirmation-exclusion patterns.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierRules;
use crate::error::ConfigError;
use crate::tracker::{
    ConfirmationRule, DEFAULT_CONFIRMATION_PATTERNS, DEFAULT_RETENTION_DAYS, TrackerConfig,
};

/// Default state file, relative to the working directory.
pub const DEFAULT_STATE_PATH: &str = "./logs/email_state.json";

/// Upper bound on `MONITOR_RETENTION_DAYS` (about a century).
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Where the Run State is persisted.
    pub state_path: PathBuf,
    /// Maximum messages fetched per run.
    pub max_results: usize,
    /// Seen-set retention window in days.
    pub retention_days: i64,
    /// Optional hard cap on seen-set entries.
    pub max_seen: Option<usize>,
    /// Deadline for one run; nothing is committed past it.
    pub run_timeout: Duration,
    /// Optional JSON rules file.
    pub rules_path: Option<PathBuf>,
    /// Directory of `.eml` files for the directory source.
    pub source_dir: Option<PathBuf>,
    /// Directory for the rolling log file.
    pub log_dir: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            max_results: 50,
            retention_days: DEFAULT_RETENTION_DAYS,
            max_seen: None,
            run_timeout: Duration::from_secs(240), // under a 5 minute function limit
            rules_path: None,
            source_dir: None,
            log_dir: None,
        }
    }
}

impl MonitorConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unset keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let retention_days = parse_or(
            get("MONITOR_RETENTION_DAYS"),
            "MONITOR_RETENTION_DAYS",
            defaults.retention_days,
        )?;
        if !(1..=MAX_RETENTION_DAYS).contains(&retention_days) {
            return Err(ConfigError::InvalidValue {
                key: "MONITOR_RETENTION_DAYS".into(),
                message: format!("must be between 1 and {MAX_RETENTION_DAYS} days"),
            });
        }

        let max_results: usize = parse_or(
            get("MONITOR_MAX_RESULTS"),
            "MONITOR_MAX_RESULTS",
            defaults.max_results,
        )?;
        if max_results == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MONITOR_MAX_RESULTS".into(),
                message: "must be at least 1".into(),
            });
        }

        let max_seen = get("MONITOR_MAX_SEEN")
            .map(|v| parse_value::<usize>(&v, "MONITOR_MAX_SEEN"))
            .transpose()?;

        let timeout_secs: u64 = parse_or(
            get("MONITOR_RUN_TIMEOUT_SECS"),
            "MONITOR_RUN_TIMEOUT_SECS",
            defaults.run_timeout.as_secs(),
        )?;

        Ok(Self {
            state_path: get("MONITOR_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_path),
            max_results,
            retention_days,
            max_seen,
            run_timeout: Duration::from_secs(timeout_secs),
            rules_path: get("MONITOR_RULES_PATH").map(PathBuf::from),
            source_dir: get("MONITOR_SOURCE_DIR").map(PathBuf::from),
            log_dir: get("MONITOR_LOG_DIR").map(PathBuf::from),
        })
    }

    /// Load the rules file if configured, else built-in rules.
    pub fn load_rules(&self) -> Result<RulesFile, ConfigError> {
        match &self.rules_path {
            Some(path) => RulesFile::load(path),
            None => Ok(RulesFile::default()),
        }
    }

    /// Tracker configuration for these settings and rules.
    pub fn tracker_config(&self, rules: &RulesFile) -> Result<TrackerConfig, ConfigError> {
        let confirmation = ConfirmationRule::new(rules.confirmation_patterns.as_slice())
            .map_err(|e| ConfigError::InvalidValue {
                key: "confirmation_patterns".into(),
                message: e.to_string(),
            })?;
        let retention = chrono::Duration::try_days(self.retention_days).ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "MONITOR_RETENTION_DAYS".into(),
                message: format!("{} days is out of range", self.retention_days),
            }
        })?;
        let mut config = TrackerConfig::new(retention, confirmation);
        config.max_entries = self.max_seen;
        Ok(config)
    }
}

fn parse_value<T: FromStr>(raw: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(v) => parse_value(&v, key),
        None => Ok(default),
    }
}

// ── Rules file ──────────────────────────────────────────────────────

/// Contents of the JSON rules file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesFile {
    #[serde(flatten)]
    pub classifier: ClassifierRules,
    #[serde(default = "default_confirmation_patterns")]
    pub confirmation_patterns: Vec<String>,
}

impl Default for RulesFile {
    fn default() -> Self {
        Self {
            classifier: ClassifierRules::default_rules(),
            confirmation_patterns: default_confirmation_patterns(),
        }
    }
}

fn default_confirmation_patterns() -> Vec<String> {
    DEFAULT_CONFIRMATION_PATTERNS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl RulesFile {
    /// Read and parse a rules file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::ParseError(format!("rules file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = MonitorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg.state_path, PathBuf::from(DEFAULT_STATE_PATH));
        assert_eq!(cfg.max_results, 50);
        assert_eq!(cfg.retention_days, 14);
        assert!(cfg.max_seen.is_none());
        assert_eq!(cfg.run_timeout, Duration::from_secs(240));
    }

    #[test]
    fn reads_overrides() {
        let cfg = MonitorConfig::from_lookup(lookup_from(&[
            ("MONITOR_STATE_PATH", "/tmp/state.json"),
            ("MONITOR_MAX_RESULTS", "25"),
            ("MONITOR_RETENTION_DAYS", "7"),
            ("MONITOR_MAX_SEEN", "1000"),
            ("MONITOR_RUN_TIMEOUT_SECS", "60"),
            ("MONITOR_SOURCE_DIR", "/var/spool/mail"),
        ]))
        .unwrap();
        assert_eq!(cfg.state_path, PathBuf::from("/tmp/state.json"));
        assert_eq!(cfg.max_results, 25);
        assert_eq!(cfg.retention_days, 7);
        assert_eq!(cfg.max_seen, Some(1000));
        assert_eq!(cfg.run_timeout, Duration::from_secs(60));
        assert_eq!(cfg.source_dir, Some(PathBuf::from("/var/spool/mail")));
    }

    #[test]
    fn rejects_non_numeric() {
        let err = MonitorConfig::from_lookup(lookup_from(&[("MONITOR_MAX_RESULTS", "lots")]))
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "MONITOR_MAX_RESULTS")
        );
    }

    #[test]
    fn rejects_non_positive_retention() {
        let err = MonitorConfig::from_lookup(lookup_from(&[("MONITOR_RETENTION_DAYS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn rejects_oversized_retention() {
        let huge = lookup_from(&[("MONITOR_RETENTION_DAYS", "100000000")]);
        let err = MonitorConfig::from_lookup(huge).unwrap_err();
        let ConfigError::InvalidValue { key, .. } = err else {
            panic!("expected InvalidValue, got {err:?}");
        };
        assert_eq!(key, "MONITOR_RETENTION_DAYS");

        let cfg = MonitorConfig::from_lookup(lookup_from(&[("MONITOR_RETENTION_DAYS", "36500")]))
            .unwrap();
        assert_eq!(cfg.retention_days, MAX_RETENTION_DAYS);
        assert!(cfg.tracker_config(&RulesFile::default()).is_ok());
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let cfg =
            MonitorConfig::from_lookup(lookup_from(&[("MONITOR_MAX_RESULTS", "  ")])).unwrap();
        assert_eq!(cfg.max_results, 50);
    }

    #[test]
    fn rules_file_partial_override() {
        let rules = RulesFile::parse(
            r#"{
                "tracked_domains": ["jobs.example.com"],
                "confirmation_patterns": ["application acknowledged"]
            }"#,
        )
        .unwrap();
        assert_eq!(rules.classifier.tracked_domains, vec!["jobs.example.com"]);
        assert_eq!(rules.confirmation_patterns, vec!["application acknowledged"]);
        assert_eq!(
            rules.classifier.keywords,
            ClassifierRules::default_rules().keywords
        );
    }

    #[test]
    fn rules_file_empty_object_is_default() {
        assert_eq!(RulesFile::parse("{}").unwrap(), RulesFile::default());
    }

    #[test]
    fn rules_file_invalid_json() {
        assert!(matches!(
            RulesFile::parse("[1, 2"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn tracker_config_rejects_bad_confirmation_pattern() {
        let cfg = MonitorConfig::default();
        let rules = RulesFile {
            confirmation_patterns: vec!["(oops".into()],
            ..RulesFile::default()
        };
        assert!(cfg.tracker_config(&rules).is_err());
    }

    #[test]
    fn rules_file_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, r#"{"subject_patterns": ["offer"]}"#).unwrap();
        let cfg = MonitorConfig {
            rules_path: Some(path),
            ..MonitorConfig::default()
        };
        let rules = cfg.load_rules().unwrap();
        assert_eq!(rules.classifier.subject_patterns, vec!["offer"]);
    }
}
