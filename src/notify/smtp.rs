//! SMTP digest delivery via lettre.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message as MailMessage, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::error::NotifyError;
use crate::notify::Notifier;
use crate::notify::digest::{DEFAULT_DIGEST_SUBJECT, Digest};

/// Port that gets STARTTLS; any other port uses implicit TLS.
const STARTTLS_PORT: u16 = 587;

/// SMTP notifier configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Sender address; defaults to the username.
    pub from_address: String,
    /// Digest recipient.
    pub to_address: String,
    pub subject: String,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `None` if `SMTP_SERVER` or `NOTIFICATION_EMAIL` is not set (SMTP disabled).
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let server = lookup("SMTP_SERVER").filter(|s| !s.is_empty())?;
        let to_address = lookup("NOTIFICATION_EMAIL").filter(|s| !s.is_empty())?;

        let port = lookup("SMTP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(STARTTLS_PORT);
        let username = lookup("SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(lookup("SMTP_PASSWORD").unwrap_or_default());
        let from_address = lookup("SMTP_FROM").unwrap_or_else(|| username.clone());
        let subject =
            lookup("MONITOR_DIGEST_SUBJECT").unwrap_or_else(|| DEFAULT_DIGEST_SUBJECT.to_string());

        Some(Self {
            server,
            port,
            username,
            password,
            from_address,
            to_address,
            subject,
        })
    }
}

/// Sends the digest as a multipart/alternative email.
pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// Build the email without sending it.
    pub fn build_message(&self, digest: &Digest) -> Result<MailMessage, NotifyError> {
        let from: Mailbox = parse_mailbox(&self.config.from_address)?;
        let to: Mailbox = parse_mailbox(&self.config.to_address)?;

        MailMessage::builder()
            .from(from)
            .to(to)
            .subject(digest.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                digest.render_text(),
                digest.render_html(),
            ))
            .map_err(|e| self.send_failed(format!("Failed to build email: {e}")))
    }

    fn send_blocking(config: &SmtpConfig, email: &MailMessage) -> Result<(), String> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let builder = if config.port == STARTTLS_PORT {
            SmtpTransport::starttls_relay(&config.server)
        } else {
            SmtpTransport::relay(&config.server)
        }
        .map_err(|e| format!("SMTP relay error: {e}"))?;

        let transport = builder.port(config.port).credentials(creds).build();
        transport
            .send(email)
            .map_err(|e| format!("SMTP send failed: {e}"))?;
        Ok(())
    }

    fn send_failed(&self, reason: impl Into<String>) -> NotifyError {
        NotifyError::SendFailed {
            notifier: self.name().to_string(),
            reason: reason.into(),
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|e| NotifyError::InvalidAddress {
        address: address.to_string(),
        reason: format!("{e}"),
    })
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn deliver(&self, digest: &Digest) -> Result<(), NotifyError> {
        let email = self.build_message(digest)?;
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || Self::send_blocking(&config, &email))
            .await
            .map_err(|e| self.send_failed(format!("SMTP task panicked: {e}")))?
            .map_err(|reason| self.send_failed(reason))?;

        info!(
            to = %self.config.to_address,
            count = digest.total(),
            "Email digest sent"
        );
        Ok(())
    }
}
