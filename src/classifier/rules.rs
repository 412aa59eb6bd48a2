//! Keyword, subject-pattern and domain classifier.
//!
//! Runs entirely locally with no LLM call:
//! - Exclusion senders/subjects → not job-related (checked first)
//! - Keyword lists over subject + body → high / medium / low
//! - Subject regexes → medium
//! - Tracked recruiting domains in the sender → medium
//!
//! A message is job-related if any matcher hits; its priority is the
//! highest priority among the hits.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::Classifier;
use crate::error::ClassifierError;
use crate::mail::types::{Classification, Message, Priority};

/// Number of independent matchers (keyword, pattern, domain).
const MATCHER_COUNT: f32 = 3.0;

/// Keyword lists by priority tier.
///
/// A tier missing from the rules file keeps its built-in list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordLists {
    pub high_priority: Vec<String>,
    pub medium_priority: Vec<String>,
    pub low_priority: Vec<String>,
}

impl Default for KeywordLists {
    fn default() -> Self {
        Self {
            high_priority: strings(&[
                "interview",
                "job offer",
                "offer letter",
                "next steps",
                "schedule a call",
                "technical assessment",
            ]),
            medium_priority: strings(&[
                "application",
                "recruiter",
                "hiring manager",
                "opportunity",
                "your candidacy",
            ]),
            low_priority: strings(&["career", "job posting", "job alert", "open role"]),
        }
    }
}

/// Substrings that exclude a message outright.
///
/// A list missing from the rules file keeps its built-in entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Exclusions {
    pub senders: Vec<String>,
    pub subjects: Vec<String>,
}

impl Default for Exclusions {
    fn default() -> Self {
        Self {
            senders: strings(&["jobalerts-noreply@linkedin.com"]),
            subjects: strings(&["daily job alert"]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Declarative classifier rules, loadable from the JSON rules file.
///
/// Fields missing from the file take their built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
    pub keywords: KeywordLists,
    pub subject_patterns: Vec<String>,
    pub tracked_domains: Vec<String>,
    pub exclude: Exclusions,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self::default_rules()
    }
}

impl ClassifierRules {
    /// Built-in rules for a typical job search.
    pub fn default_rules() -> Self {
        Self {
            keywords: KeywordLists::default(),
            subject_patterns: strings(&[
                r"\binterview\b",
                r"\bposition\b",
                r"your application (to|for|with)",
                r"\brole at\b",
            ]),
            tracked_domains: strings(&[
                "greenhouse.io",
                "lever.co",
                "myworkdayjobs.com",
                "ashbyhq.com",
                "smartrecruiters.com",
            ]),
            exclude: Exclusions::default(),
        }
    }

    /// Rules with every list empty.
    pub fn empty() -> Self {
        Self {
            keywords: KeywordLists {
                high_priority: Vec::new(),
                medium_priority: Vec::new(),
                low_priority: Vec::new(),
            },
            subject_patterns: Vec::new(),
            tracked_domains: Vec::new(),
            exclude: Exclusions {
                senders: Vec::new(),
                subjects: Vec::new(),
            },
        }
    }
}

/// Outcome of a single matcher.
struct MatchHit {
    priority: Priority,
    reason: String,
}

/// Keyword/pattern/domain classifier.
pub struct KeywordClassifier {
    rules: ClassifierRules,
    subject_patterns: Vec<(String, Regex)>,
}

impl KeywordClassifier {
    /// Compile the rules. Fails on any invalid subject pattern.
    pub fn new(rules: ClassifierRules) -> Result<Self, ClassifierError> {
        let subject_patterns = rules
            .subject_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (p.clone(), re))
                    .map_err(|e| ClassifierError::InvalidRule {
                        pattern: p.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            subject_patterns,
        })
    }

    /// Classifier over the built-in rules.
    pub fn with_default_rules() -> Result<Self, ClassifierError> {
        Self::new(ClassifierRules::default_rules())
    }

    pub fn rules(&self) -> &ClassifierRules {
        &self.rules
    }

    /// Classify a message synchronously.
    pub fn evaluate(&self, message: &Message) -> Classification {
        if let Some(reason) = self.exclusion(message) {
            debug!(id = %message.id, reason = %reason, "Message matched exclusion rule");
            return Classification::not_job(1.0, vec![reason]);
        }

        let hits: Vec<MatchHit> = [
            self.keyword_match(message),
            self.pattern_match(message),
            self.domain_match(message),
        ]
        .into_iter()
        .flatten()
        .collect();

        if hits.is_empty() {
            return Classification::not_job(0.0, Vec::new());
        }

        let priority = hits
            .iter()
            .map(|h| h.priority)
            .max()
            .unwrap_or(Priority::Low);
        let confidence = (hits.len() as f32 / MATCHER_COUNT + 0.3).min(1.0);
        let reasons = hits.into_iter().map(|h| h.reason).collect();

        Classification::job(priority, confidence, reasons)
    }

    fn exclusion(&self, message: &Message) -> Option<String> {
        let sender = message.sender.to_lowercase();
        let subject = message.subject.to_lowercase();

        if let Some(s) = self
            .rules
            .exclude
            .senders
            .iter()
            .find(|s| sender.contains(&s.to_lowercase()))
        {
            return Some(format!("Excluded sender: {s}"));
        }
        self.rules
            .exclude
            .subjects
            .iter()
            .find(|s| subject.contains(&s.to_lowercase()))
            .map(|s| format!("Excluded subject: {s}"))
    }

    fn keyword_match(&self, message: &Message) -> Option<MatchHit> {
        let text = format!("{} {}", message.subject, message.body).to_lowercase();
        let tiers = [
            (Priority::High, &self.rules.keywords.high_priority),
            (Priority::Medium, &self.rules.keywords.medium_priority),
            (Priority::Low, &self.rules.keywords.low_priority),
        ];
        for (priority, keywords) in tiers {
            if let Some(kw) = keywords.iter().find(|k| text.contains(&k.to_lowercase())) {
                return Some(MatchHit {
                    priority,
                    reason: format!("Matched {} priority keyword: \"{kw}\"", priority.label()),
                });
            }
        }
        None
    }

    fn pattern_match(&self, message: &Message) -> Option<MatchHit> {
        self.subject_patterns
            .iter()
            .find(|(_, re)| re.is_match(&message.subject))
            .map(|(pattern, _)| MatchHit {
                priority: Priority::Medium,
                reason: format!("Matched subject pattern: \"{pattern}\""),
            })
    }

    fn domain_match(&self, message: &Message) -> Option<MatchHit> {
        let sender = message.sender.to_lowercase();
        self.rules
            .tracked_domains
            .iter()
            .find(|d| sender.contains(&d.to_lowercase()))
            .map(|d| MatchHit {
                priority: Priority::Medium,
                reason: format!("From tracked domain: {d}"),
            })
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(&self, message: &Message) -> Result<Classification, ClassifierError> {
        Ok(self.evaluate(message))
    }
}
