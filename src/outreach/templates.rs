//! Email templates for escalation stages.
//!
//! A template file is `<dir>/<name>.txt` whose first line is
//! `Subject: ...` and whose remainder is the body. Missing or malformed files
//! fall back to the built-in text. `{{url}}` in either part is replaced with
//! the matched page URL.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::contacts::ContactStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailTemplate {
    pub subject: String,
    pub body: String,
}

impl EmailTemplate {
    /// Parse `Subject: ...\n<body>`.
    pub fn parse(content: &str) -> Option<Self> {
        let (first, body) = content.split_once('\n').unwrap_or((content, ""));
        let subject = first.trim().strip_prefix("Subject:")?.trim();
        if subject.is_empty() {
            return None;
        }
        Some(Self {
            subject: subject.to_string(),
            body: body.trim().to_string(),
        })
    }

    pub fn render(&self, url: &str) -> Self {
        Self {
            subject: self.subject.replace("{{url}}", url),
            body: self.body.replace("{{url}}", url),
        }
    }
}

/// Which family a stage's mail belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Initial outreach: carries the snippet and evidence attachments.
    Outreach,
    /// Nudges and legal letters.
    Escalation,
}

/// Template file stem and family for the mail sent when leaving `stage`.
pub fn template_for(stage: ContactStatus) -> Option<(&'static str, TemplateKind)> {
    use ContactStatus::*;
    use TemplateKind::*;
    let entry = match stage {
        NotContacted => ("sent_1st_mail", Outreach),
        Sent1stMail => ("sent_2nd_mail", Outreach),
        Sent2ndMail => ("sent_3rd_mail", Outreach),
        Sent3rdMail => ("sent_4th_mail", Outreach),
        Sent4thMail => ("legal_letter_ready", Outreach),
        RepliedByUs => ("replied_by_us_nudge_1", Escalation),
        NudgedAgain => ("nudged_again_nudge_2", Escalation),
        LegalLetterReady => ("legal_letter", Escalation),
        LegalLetterSent => ("legal_letter_sent_final", Escalation),
        Replied | CourtReady | CourtNoticeSent | Bounced | Failed => return None,
    };
    Some(entry)
}

fn builtin(name: &str) -> EmailTemplate {
    let (subject, body) = match name {
        "sent_1st_mail" => (
            "Unauthorized use of copyrighted content on {{url}}",
            "Hello,\n\nWe represent the author of content that appears without permission on {{url}}. \
             Please remove it or contact us to discuss licensing.",
        ),
        "sent_2nd_mail" => (
            "Second notice: copyrighted content on {{url}}",
            "Hello,\n\nWe wrote to you recently about copyrighted content on {{url}} and have not heard back. \
             Please remove the content or reply to this message.",
        ),
        "sent_3rd_mail" => (
            "Third notice: copyrighted content on {{url}}",
            "Hello,\n\nThe content on {{url}} is still online. Please remove it promptly.",
        ),
        "sent_4th_mail" => (
            "Final notice before legal review: {{url}}",
            "Hello,\n\nThis is our final request to remove the content on {{url}} before the matter is \
             referred for legal review.",
        ),
        "legal_letter_ready" => (
            "Matter referred for legal review: {{url}}",
            "Hello,\n\nAs we received no response, the use of our client's content on {{url}} has been \
             referred for legal review.",
        ),
        "replied_by_us_nudge_1" => (
            "Following up on our conversation",
            "Hello,\n\nWe are following up on our previous reply regarding the content on {{url}}. \
             Please let us know how you intend to proceed.",
        ),
        "nudged_again_nudge_2" => (
            "Second follow-up regarding {{url}}",
            "Hello,\n\nWe have not yet received an update about the content on {{url}}. \
             Please respond so the matter can be resolved.",
        ),
        "legal_letter" => (
            "Formal legal notice regarding {{url}}",
            "Hello,\n\nThis letter is formal notice that the content on {{url}} infringes our client's \
             rights. Remove it immediately to avoid further action.",
        ),
        "legal_letter_sent_final" => (
            "Final notice before court filing: {{url}}",
            "Hello,\n\nDespite our legal notice the content on {{url}} remains available. \
             The matter is now being prepared for court.",
        ),
        _ => ("Regarding content on {{url}}", "Hello,\n\nPlease contact us about the content on {{url}}."),
    };
    EmailTemplate {
        subject: subject.to_string(),
        body: body.to_string(),
    }
}

/// Templates under a directory, with built-in fallbacks.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    dir: PathBuf,
}

impl TemplateSet {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load `name`, re-reading the file each time so edits apply without a
    /// restart.
    pub async fn load(&self, name: &str) -> EmailTemplate {
        let path = self.dir.join(format!("{name}.txt"));
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => match EmailTemplate::parse(&content) {
                Some(template) => template,
                None => {
                    warn!(path = %path.display(), "Template lacks a Subject line, using built-in");
                    builtin(name)
                }
            },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Template not readable, using built-in");
                builtin(name)
            }
        }
    }
}
