//! Notification delivery.
//!
//! The tracker hands a Notification Batch to the monitor, which renders it
//! into a `Digest` and passes it to a `Notifier`. An empty batch is never
//! delivered.

pub mod digest;
pub mod smtp;

pub use digest::{DEFAULT_DIGEST_SUBJECT, Digest};
pub use smtp::{SmtpConfig, SmtpNotifier};

use async_trait::async_trait;
use tracing::info;

use crate::error::NotifyError;

/// Delivers a rendered digest.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notifier name (e.g. "smtp", "log").
    fn name(&self) -> &str;

    async fn deliver(&self, digest: &Digest) -> Result<(), NotifyError>;
}

/// Writes the digest to the log instead of sending it.
///
/// Used for dry runs and when SMTP is not configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, digest: &Digest) -> Result<(), NotifyError> {
        for item in digest.high.iter().chain(&digest.medium).chain(&digest.low) {
            info!(
                id = %item.message.id,
                priority = item.priority().label(),
                sender = %item.message.sender,
                subject = %item.message.subject,
                "New job-related email"
            );
        }
        info!(count = digest.total(), subject = %digest.subject, "Digest logged (not sent)");
        Ok(())
    }
}
