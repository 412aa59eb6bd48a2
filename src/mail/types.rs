//! Message and classification types shared by the source, classifier,
//! tracker and notifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum snippet length in characters.
pub const SNIPPET_MAX_CHARS: usize = 200;

// ── Message ─────────────────────────────────────────────────────────

/// A fetched email. Immutable once fetched within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Source-assigned unique identifier (Gmail id, Message-ID header, ...).
    pub id: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
    /// Sender address (may include a display name).
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// Short whitespace-collapsed excerpt of the body.
    pub snippet: String,
    /// Readable body text.
    #[serde(default)]
    pub body: String,
}

impl Message {
    /// Build a message, deriving the snippet from the body.
    pub fn new(
        id: impl Into<String>,
        received_at: DateTime<Utc>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let body = body.into();
        Self {
            id: id.into(),
            received_at,
            sender: sender.into(),
            subject: subject.into(),
            snippet: make_snippet(&body, SNIPPET_MAX_CHARS),
            body,
        }
    }
}

/// Collapse whitespace and cut to at most `max_chars` characters.
pub fn make_snippet(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    collapsed.chars().take(max_chars).collect()
}

// ── Classification ──────────────────────────────────────────────────

/// Priority tier of a job-related message. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Short label for logging and digests.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Whether a message concerns the job search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    JobRelated,
    NotJobRelated,
}

/// Classifier output for a single message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: Label,
    /// Present only for job-related messages.
    pub priority: Option<Priority>,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Which rules matched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

impl Classification {
    /// A job-related classification.
    pub fn job(priority: Priority, confidence: f32, reasons: Vec<String>) -> Self {
        Self {
            label: Label::JobRelated,
            priority: Some(priority),
            confidence,
            reasons,
        }
    }

    /// A not-job-related classification.
    pub fn not_job(confidence: f32, reasons: Vec<String>) -> Self {
        Self {
            label: Label::NotJobRelated,
            priority: None,
            confidence,
            reasons,
        }
    }

    pub fn is_job_related(&self) -> bool {
        self.label == Label::JobRelated
    }
}

/// A message paired with its classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedMessage {
    pub message: Message,
    pub classification: Classification,
}

impl ClassifiedMessage {
    pub fn new(message: Message, classification: Classification) -> Self {
        Self {
            message,
            classification,
        }
    }

    pub fn id(&self) -> &str {
        &self.message.id
    }

    /// Priority tier, `Low` when unset.
    pub fn priority(&self) -> Priority {
        self.classification.priority.unwrap_or(Priority::Low)
    }
}
