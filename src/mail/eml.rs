//! Directory-backed email source that reads RFC 5322 `.eml` files.
//!
//! Useful for exported mailboxes, local testing and for any fetcher that
//! drops raw messages into a spool directory between runs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::mail::source::EmailSource;
use crate::mail::types::Message;

/// Email source over a directory of `.eml` files.
#[derive(Debug, Clone)]
pub struct EmlDirSource {
    dir: PathBuf,
}

impl EmlDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_one(path: &Path) -> Result<Option<Message>, SourceError> {
        let raw = fs::read(path).await?;
        let modified = fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let fallback_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(parse_eml(&raw, &fallback_id, modified))
    }
}

#[async_trait]
impl EmailSource for EmlDirSource {
    fn name(&self) -> &str {
        "eml-dir"
    }

    async fn fetch_recent(&self, max_results: usize) -> Result<Vec<Message>, SourceError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| SourceError::FetchFailed {
                source_name: self.name().to_string(),
                reason: format!("cannot read {}: {e}", self.dir.display()),
            })?;

        let mut messages = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("eml") {
                continue;
            }
            match Self::read_one(&path).await {
                Ok(Some(msg)) => messages.push(msg),
                Ok(None) => warn!(path = %path.display(), "Skipping unparseable email file"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable email file")
                }
            }
        }

        // Newest first; ties broken by id so the order is stable across runs.
        messages.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        messages.truncate(max_results);

        debug!(
            dir = %self.dir.display(),
            count = messages.len(),
            "Loaded emails from directory"
        );
        Ok(messages)
    }
}

/// Parse a raw RFC 5322 message.
///
/// Uses the Message-ID header as identifier (falling back to `fallback_id`)
/// and the Date header as received time (falling back to `fallback_time`).
/// Returns `None` if the bytes are not a parseable message.
pub fn parse_eml(raw: &[u8], fallback_id: &str, fallback_time: DateTime<Utc>) -> Option<Message> {
    let parsed = MessageParser::default().parse(raw)?;

    let id = parsed
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| fallback_id.to_string());

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or(fallback_time);

    let sender = extract_sender(&parsed);
    let subject = parsed.subject().unwrap_or("").to_string();
    let body = extract_text(&parsed);

    Some(Message::new(id, received_at, sender, subject, body))
}

/// Sender as `Name <address>` when a display name exists.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return "unknown".into();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "unknown".into(),
    }
}

/// Readable body text, HTML stripped when there is no text part.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags and normalize whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVIEW: &str = "From: Jane Recruiter <jane@acme.com>\r\n\
To: me@example.com\r\n\
Subject: Interview invitation\r\n\
Message-ID: <abc123@acme.com>\r\n\
Date: Mon, 16 Feb 2026 10:00:00 +0000\r\n\
\r\n\
Hi, we would like to schedule an interview.\r\n";

    const NO_HEADERS_ID: &str = "From: bot@jobs.io\r\n\
Subject: New postings\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>Five <b>new</b> jobs</p>\r\n";

    #[test]
    fn parse_eml_reads_headers() {
        let msg = parse_eml(INTERVIEW.as_bytes(), "file-stem", Utc::now()).unwrap();
        assert_eq!(msg.id, "abc123@acme.com");
        assert_eq!(msg.sender, "Jane Recruiter <jane@acme.com>");
        assert_eq!(msg.subject, "Interview invitation");
        assert!(msg.body.contains("schedule an interview"));
        assert_eq!(msg.received_at.to_rfc3339(), "2026-02-16T10:00:00+00:00");
    }

    #[test]
    fn parse_eml_falls_back_to_file_stem_and_time() {
        let fallback = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let msg = parse_eml(NO_HEADERS_ID.as_bytes(), "posting-1", fallback).unwrap();
        assert_eq!(msg.id, "posting-1");
        assert_eq!(msg.received_at, fallback);
        assert_eq!(msg.sender, "bot@jobs.io");
        assert!(msg.body.contains("new"));
        assert!(!msg.body.contains("<b>"));
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
        assert_eq!(strip_html("<div><b>Bold</b> and <i>italic</i></div>"), "Bold and italic");
        assert_eq!(strip_html(""), "");
    }

    #[tokio::test]
    async fn fetch_recent_orders_newest_first_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        for (name, day) in [("a", 10), ("b", 12), ("c", 11)] {
            let raw = format!(
                "From: x@acme.com\r\nSubject: {name}\r\nMessage-ID: <{name}@acme.com>\r\n\
Date: {day} Feb 2026 09:00:00 +0000\r\n\r\nbody\r\n"
            );
            std::fs::write(dir.path().join(format!("{name}.eml")), raw).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "not an email").unwrap();

        let source = EmlDirSource::new(dir.path());
        let all = source.fetch_recent(50).await.unwrap();
        let ids: Vec<_> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b@acme.com", "c@acme.com", "a@acme.com"]);

        let two = source.fetch_recent(2).await.unwrap();
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].id, "b@acme.com");
    }

    #[tokio::test]
    async fn fetch_recent_skips_unreadable_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("good.eml"),
            "From: x@acme.com\r\nSubject: Hi\r\nMessage-ID: <good@acme.com>\r\n\r\nbody\r\n",
        )
        .unwrap();
        // A directory with an .eml name cannot be read as a file.
        std::fs::create_dir(dir.path().join("broken.eml")).unwrap();

        let messages = EmlDirSource::new(dir.path()).fetch_recent(10).await.unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["good@acme.com"]);
    }

    #[tokio::test]
    async fn fetch_recent_missing_dir_fails() {
        let source = EmlDirSource::new("/nonexistent/spool/dir");
        let err = source.fetch_recent(10).await.unwrap_err();
        assert!(matches!(err, SourceError::FetchFailed { .. }));
    }
}
