//! Outbound email over SMTP via lettre.
//!
//! Delivery is reported as a [`DeliveryOutcome`] rather than an error so the
//! escalation engine can tell a rejected recipient (the contact bounces) from
//! a transient failure.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::config::{env_or, env_parse, optional_var, required_var};
use crate::error::ConfigError;

// ── Configuration ───────────────────────────────────────────────────

/// Mail account configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl EmailConfig {
    /// Build config from environment variables.
    ///
    /// `EMAIL_SMTP_HOST`, `EMAIL_USERNAME`, and `EMAIL_PASSWORD` are required.
    /// The IMAP host defaults to the SMTP host with `smtp` replaced by `imap`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let smtp_host = required_var("EMAIL_SMTP_HOST")?;
        let imap_host = optional_var("EMAIL_IMAP_HOST")
            .unwrap_or_else(|| smtp_host.replace("smtp", "imap"));
        let username = required_var("EMAIL_USERNAME")?;
        let password = SecretString::from(required_var("EMAIL_PASSWORD")?);
        let from_address = env_or("EMAIL_FROM_ADDRESS", &username);

        Ok(Self {
            imap_host,
            imap_port: env_parse("EMAIL_IMAP_PORT", 993u16)?,
            smtp_host,
            smtp_port: env_parse("EMAIL_SMTP_PORT", 465u16)?,
            username,
            password,
            from_address,
        })
    }
}

// ── Outgoing mail ───────────────────────────────────────────────────

/// A file attached to an outgoing message under a fixed display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    pub filename: String,
    pub path: PathBuf,
}

impl MailAttachment {
    pub fn new(filename: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            path: path.into(),
        }
    }
}

/// A plain-text message with optional attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<MailAttachment>,
}

impl OutgoingMail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: MailAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Result of handing a message to the mail server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The server permanently refused the recipient, or the address is invalid.
    RecipientRejected(String),
    /// Any other failure (connection, auth, temporary rejection).
    Failed(String),
}

/// Sends outgoing mail.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> DeliveryOutcome;
}

// ── SMTP ────────────────────────────────────────────────────────────

/// SMTP reply codes that mean the recipient itself was refused.
const RECIPIENT_REJECT_CODES: &[&str] = &["550", "551", "553", "501"];

pub(crate) fn is_recipient_rejection(code: &str) -> bool {
    RECIPIENT_REJECT_CODES.contains(&code)
}

fn classify_smtp_error(err: &lettre::transport::smtp::Error) -> DeliveryOutcome {
    if err.is_permanent()
        && let Some(code) = err.status()
        && is_recipient_rejection(&code.to_string())
    {
        return DeliveryOutcome::RecipientRejected(err.to_string());
    }
    DeliveryOutcome::Failed(err.to_string())
}

fn content_type_for(filename: &str) -> ContentType {
    let mime = match filename.rsplit('.').next().map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "txt" => "text/plain",
        _ => "application/octet-stream",
    };
    ContentType::parse(mime).unwrap_or(ContentType::TEXT_PLAIN)
}

/// Build a lettre message. Attachment bytes are already loaded.
fn build_message(
    from: &str,
    mail: &OutgoingMail,
    files: Vec<(String, Vec<u8>)>,
) -> Result<Message, DeliveryOutcome> {
    let from = from
        .parse::<lettre::message::Mailbox>()
        .map_err(|e| DeliveryOutcome::Failed(format!("Invalid from address: {e}")))?;
    let to = mail
        .to
        .parse::<lettre::message::Mailbox>()
        .map_err(|e| DeliveryOutcome::RecipientRejected(format!("Invalid to address {}: {e}", mail.to)))?;

    let builder = Message::builder().from(from).to(to).subject(mail.subject.clone());

    let built = if files.is_empty() {
        builder.body(mail.body.clone())
    } else {
        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(mail.body.clone()));
        for (filename, bytes) in files {
            let content_type = content_type_for(&filename);
            parts = parts.singlepart(Attachment::new(filename).body(bytes, content_type));
        }
        builder.multipart(parts)
    };

    built.map_err(|e| DeliveryOutcome::Failed(format!("Failed to build email: {e}")))
}

/// SMTP sender over implicit TLS.
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    pub fn from_address(&self) -> &str {
        &self.config.from_address
    }

    fn transport(&self) -> Result<SmtpTransport, String> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );

        Ok(SmtpTransport::relay(&self.config.smtp_host)
            .map_err(|e| format!("SMTP relay error: {e}"))?
            .port(self.config.smtp_port)
            .credentials(creds)
            .timeout(Some(Duration::from_secs(30)))
            .build())
    }

    /// Read attachments, skipping files that are missing or empty.
    async fn load_attachments(mail: &OutgoingMail) -> Vec<(String, Vec<u8>)> {
        let mut files = Vec::with_capacity(mail.attachments.len());
        for attachment in &mail.attachments {
            match tokio::fs::read(&attachment.path).await {
                Ok(bytes) if !bytes.is_empty() => files.push((attachment.filename.clone(), bytes)),
                Ok(_) => debug!(path = %attachment.path.display(), "Skipping empty attachment"),
                Err(e) => warn!(path = %attachment.path.display(), error = %e, "Skipping unreadable attachment"),
            }
        }
        files
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> DeliveryOutcome {
        let files = Self::load_attachments(mail).await;
        let attached = files.len();

        let message = match build_message(&self.config.from_address, mail, files) {
            Ok(message) => message,
            Err(outcome) => return outcome,
        };
        let transport = match self.transport() {
            Ok(transport) => transport,
            Err(reason) => return DeliveryOutcome::Failed(reason),
        };

        // lettre's SmtpTransport is blocking.
        let outcome = match tokio::task::spawn_blocking(move || transport.send(&message)).await {
            Ok(Ok(_)) => DeliveryOutcome::Delivered,
            Ok(Err(e)) => classify_smtp_error(&e),
            Err(e) => DeliveryOutcome::Failed(format!("SMTP task failed: {e}")),
        };

        match &outcome {
            DeliveryOutcome::Delivered => {
                info!(to = %mail.to, subject = %mail.subject, attachments = attached, "Email sent")
            }
            DeliveryOutcome::RecipientRejected(reason) => {
                warn!(to = %mail.to, %reason, "Recipient rejected")
            }
            DeliveryOutcome::Failed(reason) => warn!(to = %mail.to, %reason, "Email delivery failed"),
        }
        outcome
    }
}
