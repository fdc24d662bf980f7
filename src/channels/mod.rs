//! Mail channels: SMTP delivery and IMAP mailbox polling.

pub mod email;
pub mod mailbox;

pub use email::{DeliveryOutcome, EmailConfig, MailAttachment, MailTransport, OutgoingMail, SmtpMailer};
pub use mailbox::{ImapMailbox, InboundReply, Mailbox, RawMessage, parse_inbound};
