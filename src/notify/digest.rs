//! Digest rendering. Groups a Notification Batch by priority and renders
//! plain-text and HTML bodies. Pure string building, no I/O.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::mail::gmail_url;
use crate::mail::types::{ClassifiedMessage, Priority};

/// Default digest subject line.
pub const DEFAULT_DIGEST_SUBJECT: &str = "Job Search Update";

/// Max characters of a snippet shown for high-priority entries.
const SNIPPET_PREVIEW_CHARS: usize = 150;

/// A rendered digest, ready for any notifier.
#[derive(Debug, Clone, Serialize)]
pub struct Digest {
    pub subject: String,
    pub generated_at: DateTime<Utc>,
    pub high: Vec<ClassifiedMessage>,
    pub medium: Vec<ClassifiedMessage>,
    pub low: Vec<ClassifiedMessage>,
}

impl Digest {
    /// Group a batch by priority, keeping batch order within each group.
    pub fn from_batch(
        subject: impl Into<String>,
        batch: &[ClassifiedMessage],
        generated_at: DateTime<Utc>,
    ) -> Self {
        let pick = |p: Priority| -> Vec<ClassifiedMessage> {
            batch.iter().filter(|m| m.priority() == p).cloned().collect()
        };
        Self {
            subject: subject.into(),
            generated_at,
            high: pick(Priority::High),
            medium: pick(Priority::Medium),
            low: pick(Priority::Low),
        }
    }

    pub fn total(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn sections(&self) -> [(Priority, &[ClassifiedMessage]); 3] {
        [
            (Priority::High, self.high.as_slice()),
            (Priority::Medium, self.medium.as_slice()),
            (Priority::Low, self.low.as_slice()),
        ]
    }

    /// Plain-text body.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.subject);
        let _ = writeln!(out, "{}", "=".repeat(self.subject.chars().count()));

        for (priority, items) in self.sections() {
            if items.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n{} priority ({})", title_case(priority.label()), items.len());
            for item in items {
                let msg = &item.message;
                let _ = writeln!(out, "\n- {}", msg.subject);
                let _ = writeln!(out, "  From: {}", msg.sender);
                if priority == Priority::High && !msg.snippet.is_empty() {
                    let _ = writeln!(out, "  {}", preview(&msg.snippet));
                }
                for reason in &item.classification.reasons {
                    let _ = writeln!(out, "  * {reason}");
                }
                let _ = writeln!(out, "  {}", gmail_url(&msg.id));
            }
        }

        let _ = writeln!(out, "\nTotal: {} job-related emails found", self.total());
        out
    }

    /// HTML body. All message fields are escaped.
    pub fn render_html(&self) -> String {
        let mut out = String::from(
            "<html><body style=\"font-family: Arial, sans-serif;\">\
             <div style=\"max-width: 600px; margin: 0 auto;\">",
        );
        let _ = write!(out, "<h1>{}</h1>", escape_html(&self.subject));

        for (priority, items) in self.sections() {
            if items.is_empty() {
                continue;
            }
            let _ = write!(
                out,
                "<div class=\"priority-section {label}\"><h2>{title} Priority</h2>",
                label = priority.label(),
                title = title_case(priority.label()),
            );
            for item in items {
                let msg = &item.message;
                let url = gmail_url(&msg.id);
                let _ = write!(
                    out,
                    "<div class=\"email-item\"><div class=\"subject\">\
                     <a href=\"{url}\">{subject}</a></div>\
                     <div class=\"from\">From: {from}</div>",
                    url = escape_html(&url),
                    subject = escape_html(&msg.subject),
                    from = escape_html(&msg.sender),
                );
                if priority == Priority::High && !msg.snippet.is_empty() {
                    let _ = write!(
                        out,
                        "<div class=\"snippet\">{}</div>",
                        escape_html(&preview(&msg.snippet))
                    );
                }
                if !item.classification.reasons.is_empty() {
                    let triggers = item
                        .classification
                        .reasons
                        .iter()
                        .map(|r| format!("&bull; {}", escape_html(r)))
                        .collect::<Vec<_>>()
                        .join("<br>");
                    let _ = write!(
                        out,
                        "<div class=\"triggers\"><strong>Triggers:</strong><br>{triggers}</div>"
                    );
                }
                out.push_str("</div>");
            }
            out.push_str("</div>");
        }

        let _ = write!(
            out,
            "<div class=\"footer\"><p>Total: {} job-related emails found</p></div>",
            self.total()
        );
        out.push_str("</div></body></html>");
        out
    }
}

fn preview(snippet: &str) -> String {
    if snippet.chars().count() <= SNIPPET_PREVIEW_CHARS {
        return snippet.to_string();
    }
    let cut: String = snippet.chars().take(SNIPPET_PREVIEW_CHARS).collect();
    format!("{cut}...")
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Escape text for HTML element and attribute content.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::types::{Classification, Message};

    fn item(id: &str, subject: &str, priority: Priority) -> ClassifiedMessage {
        ClassifiedMessage::new(
            Message::new(id, Utc::now(), "Jane <jane@acme.com>", subject, "We'd love to chat"),
            Classification::job(priority, 0.8, vec![format!("matched {}", priority.label())]),
        )
    }

    #[test]
    fn groups_by_priority_in_batch_order() {
        let batch = vec![
            item("1", "Offer", Priority::High),
            item("2", "Recruiter ping", Priority::Medium),
            item("3", "Interview", Priority::High),
            item("4", "Career fair", Priority::Low),
        ];
        let digest = Digest::from_batch(DEFAULT_DIGEST_SUBJECT, &batch, Utc::now());
        let high: Vec<_> = digest.high.iter().map(|m| m.id()).collect();
        assert_eq!(high, vec!["1", "3"]);
        assert_eq!(digest.medium.len(), 1);
        assert_eq!(digest.low.len(), 1);
        assert_eq!(digest.total(), 4);
    }

    #[test]
    fn text_contains_links_and_reasons() {
        let batch = vec![item("18c2abc", "Interview invite", Priority::High)];
        let text = Digest::from_batch("Jobs", &batch, Utc::now()).render_text();
        assert!(text.contains("High priority (1)"));
        assert!(text.contains("Interview invite"));
        assert!(text.contains("https://mail.google.com/mail/u/0/#all/18c2abc"));
        assert!(text.contains("* matched high"));
        assert!(text.contains("Total: 1 job-related emails found"));
        assert!(!text.contains("Medium priority"));
    }

    #[test]
    fn html_escapes_message_fields() {
        let batch = vec![item("x", "<script>alert(1)</script> & more", Priority::Medium)];
        let html = Digest::from_batch("Jobs", &batch, Utc::now()).render_html();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt; &amp; more"));
        assert!(html.contains("Jane &lt;jane@acme.com&gt;"));
    }

    #[test]
    fn long_snippet_is_previewed() {
        let long = "word ".repeat(100);
        assert!(preview(&long).ends_with("..."));
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn empty_digest() {
        let digest = Digest::from_batch("Jobs", &[], Utc::now());
        assert!(digest.is_empty());
    }
}
