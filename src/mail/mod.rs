//! Email model and sources.

pub mod eml;
pub mod source;
pub mod types;

pub use eml::EmlDirSource;
pub use source::EmailSource;
pub use types::{Classification, ClassifiedMessage, Label, Message, Priority};

/// Gmail web URL for a message id (works on web and mobile).
pub fn gmail_url(message_id: &str) -> String {
    format!("https://mail.google.com/mail/u/0/#all/{message_id}")
}
