//! Message classification.
//!
//! The monitor only depends on the `Classifier` trait; the keyword engine
//! is the built-in implementation.

pub mod rules;

pub use rules::{ClassifierRules, Exclusions, KeywordClassifier, KeywordLists};

use async_trait::async_trait;

use crate::error::ClassifierError;
use crate::mail::types::{Classification, Message};

/// Labels a message as job-related or not, with a priority tier.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classifier name for logging.
    fn name(&self) -> &str;

    async fn classify(&self, message: &Message) -> Result<Classification, ClassifierError>;
}
