//! Error types for the job mail monitor.

use std::time::Duration;

/// Top-level error type for a monitor run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Email source error: {0}")]
    Source(#[from] SourceError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Notifier error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Run exceeded its deadline of {after:?}, state left untouched")]
    Timeout { after: Duration },
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run State persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Previous state exists but could not be read.
    #[error("State at {location} is unavailable: {reason}")]
    Unavailable { location: String, reason: String },

    /// Previous state was read but does not match any known schema.
    #[error("State at {location} is corrupt: {reason}")]
    Corrupt { location: String, reason: String },

    /// Updated state could not be written at the end of a run.
    #[error("Failed to persist state to {location}: {reason}")]
    PersistenceFailure { location: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Email source errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source {source_name} fetch failed: {reason}")]
    FetchFailed { source_name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classifier errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Invalid rule pattern {pattern}: {reason}")]
    InvalidRule { pattern: String, reason: String },
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notifier {notifier} failed to send: {reason}")]
    SendFailed { notifier: String, reason: String },

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Result type alias for the monitor.
pub type Result<T> = std::result::Result<T, Error>;
