//! Email source abstraction. Pure I/O, no classification.

use async_trait::async_trait;

use crate::error::SourceError;
use crate::mail::types::Message;

/// Yields a bounded batch of recent messages per run.
///
/// Implementations must order the batch newest-first and keep that order
/// stable across runs so diffing against the seen-set is deterministic.
#[async_trait]
pub trait EmailSource: Send + Sync {
    /// Source name (e.g. "eml-dir", "gmail").
    fn name(&self) -> &str;

    /// Fetch at most `max_results` of the most recent messages.
    async fn fetch_recent(&self, max_results: usize) -> Result<Vec<Message>, SourceError>;
}
