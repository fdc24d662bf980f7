//! Time-gated escalation of outreach contacts.
//!
//! Each cycle walks the timed stages in order, leases contacts that have
//! dwelt long enough, and sends each one the mail for its stage. Delivery
//! advances the contact; a rejected recipient bounces it and any other
//! delivery failure fails it. Both tracks (initial outreach and the
//! post-reply nudges) join at `LEGAL_LETTER_READY` and share the legal tail.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::channels::{DeliveryOutcome, MailAttachment, MailTransport, OutgoingMail};
use crate::config::EscalationConfig;
use crate::contacts::{ContactStatus, OutreachContact};
use crate::crawl::CrawlResult;
use crate::error::{Error, WorkflowError};
use crate::outreach::templates::{TemplateKind, TemplateSet, template_for};
use crate::store::Database;
use crate::worker::poller::{CycleOutcome, PollTask, cutoff};

pub const SCREENSHOT_ATTACHMENT: &str = "screenshot.png";
pub const PROOF_ATTACHMENT: &str = "evidence.ots";

const NO_SNIPPET: &str = "No snippet available.";

/// Attach the screenshot and timestamp proof of a crawl result, when present.
pub fn evidence_attachments(mut mail: OutgoingMail, result: &CrawlResult) -> OutgoingMail {
    if let Some(path) = &result.screenshot_path {
        mail = mail.with_attachment(MailAttachment::new(SCREENSHOT_ATTACHMENT, path));
    }
    if let Some(path) = &result.ots_path {
        mail = mail.with_attachment(MailAttachment::new(PROOF_ATTACHMENT, path));
    }
    mail
}

/// Outreach body: template text, then the matched snippet and send time.
fn outreach_body(body: &str, snippet: Option<&str>, sent_at: DateTime<Utc>) -> String {
    let snippet = snippet.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(NO_SNIPPET);
    format!(
        "{}\n\n---\nMatched Content Snippet:\n\"{}\"\n\nTimestamp: {}",
        body.trim(),
        snippet,
        sent_at.to_rfc3339()
    )
}

/// Letter body: template text plus a pointer to the infringing page.
fn letter_body(body: &str, url: &str) -> String {
    format!("{}\n\n---\nReference: {}", body.trim(), url)
}

pub struct EscalationEngine {
    db: Arc<dyn Database>,
    mailer: Arc<dyn MailTransport>,
    templates: TemplateSet,
    config: EscalationConfig,
}

impl EscalationEngine {
    pub fn new(
        db: Arc<dyn Database>,
        mailer: Arc<dyn MailTransport>,
        templates: TemplateSet,
        config: EscalationConfig,
    ) -> Self {
        Self {
            db,
            mailer,
            templates,
            config,
        }
    }

    /// Run every timed stage once. Returns the number of contacts handled.
    ///
    /// Due-ness is judged against the cycle's start, so a contact advances
    /// at most one stage per cycle even when delays are zero.
    pub async fn run_once(&self) -> Result<usize, Error> {
        let now = Utc::now();
        let lease_stale_before = cutoff(self.config.lease_timeout);
        let mut handled = 0;

        for stage in ContactStatus::TIMED_STAGES {
            let Some(dwell) = self.config.dwell(stage) else {
                continue;
            };
            let due = self
                .db
                .claim_due_contacts(stage, now - dwell, lease_stale_before, self.config.batch_limit)
                .await?;
            if due.is_empty() {
                debug!(%stage, "No contacts due");
                continue;
            }
            info!(%stage, count = due.len(), "Escalating contacts");
            handled += due.len();

            join_all(due.iter().map(|contact| self.process(contact))).await;
        }
        Ok(handled)
    }

    /// Advance one leased contact, releasing the lease on failure.
    async fn process(&self, contact: &OutreachContact) {
        match self.advance(contact).await {
            Ok(()) => {}
            Err(Error::Workflow(e @ WorkflowError::LeaseLost { .. })) => {
                warn!(contact_id = %contact.id, error = %e, "Contact changed while leased");
            }
            Err(e) => {
                error!(contact_id = %contact.id, stage = %contact.status, error = %e, "Escalation step failed");
                if let Err(release_err) = self.db.release_contact(contact.id).await {
                    warn!(contact_id = %contact.id, error = %release_err, "Failed to release contact");
                }
            }
        }
    }

    async fn advance(&self, contact: &OutreachContact) -> Result<(), Error> {
        let stage = contact.status;
        let (Some(next), Some((template_name, kind))) = (stage.next_stage(), template_for(stage)) else {
            return Err(WorkflowError::InvalidTransition {
                entity: "contact",
                id: contact.id,
                from: stage.to_string(),
                to: "next stage".into(),
            }
            .into());
        };

        let result = self
            .db
            .get_crawl_result(contact.crawl_result_id)
            .await?
            .ok_or(WorkflowError::MissingRelated {
                entity: "contact",
                id: contact.id,
                missing: "crawl result",
            })?;
        let recipient = self
            .db
            .get_test_email(contact.job_id)
            .await?
            .unwrap_or_else(|| contact.email.clone());

        let template = self.templates.load(template_name).await.render(&result.url);
        let mail = match kind {
            TemplateKind::Outreach => {
                let body = outreach_body(&template.body, result.matched_snippet.as_deref(), Utc::now());
                evidence_attachments(OutgoingMail::new(&recipient, template.subject, body), &result)
            }
            TemplateKind::Escalation => OutgoingMail::new(
                &recipient,
                template.subject,
                letter_body(&template.body, &result.url),
            ),
        };

        let target = match self.mailer.send(&mail).await {
            DeliveryOutcome::Delivered => next,
            DeliveryOutcome::RecipientRejected(reason) => {
                warn!(contact_id = %contact.id, to = %recipient, %reason, "Recipient rejected, bouncing contact");
                ContactStatus::Bounced
            }
            DeliveryOutcome::Failed(reason) => {
                warn!(contact_id = %contact.id, to = %recipient, %reason, "Delivery failed, failing contact");
                ContactStatus::Failed
            }
        };

        self.db.transition_contact(contact.id, stage, target).await?;
        info!(contact_id = %contact.id, from = %stage, to = %target, template = template_name, "Contact escalated");
        Ok(())
    }
}

#[async_trait]
impl PollTask for EscalationEngine {
    fn name(&self) -> &'static str {
        "outreach"
    }

    async fn run_cycle(&self) -> Result<CycleOutcome, Error> {
        Ok(CycleOutcome::from_count(self.run_once().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use uuid::Uuid;

    use crate::config::DelayUnit;
    use crate::crawl::{CapturedEvidence, NewCrawlResult};
    use crate::jobs::NewJob;
    use crate::store::LibSqlBackend;

    struct Recorder {
        outcome: DeliveryOutcome,
        sent: Mutex<Vec<OutgoingMail>>,
    }

    impl Recorder {
        fn new(outcome: DeliveryOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MailTransport for Recorder {
        async fn send(&self, mail: &OutgoingMail) -> DeliveryOutcome {
            self.sent.lock().unwrap().push(mail.clone());
            self.outcome.clone()
        }
    }

    async fn seed(db: &LibSqlBackend, test_email: Option<&str>) -> Uuid {
        let mut job = NewJob::new("Poem X");
        if let Some(address) = test_email {
            job = job.with_test_email(address);
        }
        let job = db.create_job(&job).await.unwrap();
        let evidence = CapturedEvidence {
            screenshot_path: "/shared/images/screenshot_1.png".into(),
            screenshot_sha256: "00".repeat(32),
            proof_path: "/shared/ots/screenshot_1.ots".into(),
            captured_at: Utc::now(),
        };
        let result = db
            .insert_crawl_result(&NewCrawlResult::matched(
                job.id,
                "https://copycat.example/poem",
                92,
                "poem x all of it",
                &evidence,
            ))
            .await
            .unwrap();
        let contacts = db
            .insert_contacts(job.id, result.id, &["owner@copycat.example".to_string()])
            .await
            .unwrap();
        contacts[0].id
    }

    fn engine(db: Arc<LibSqlBackend>, mailer: Arc<Recorder>, config: EscalationConfig) -> EscalationEngine {
        let dir = std::env::temp_dir().join("takedown-no-templates");
        EscalationEngine::new(db, mailer, TemplateSet::new(dir), config)
    }

    fn instant_schedule() -> EscalationConfig {
        EscalationConfig {
            unit: DelayUnit::Seconds,
            mail_1: 0,
            mail_2: 0,
            mail_3: 0,
            mail_4: 0,
            legal: 0,
            reply_to_nudge_1: 0,
            nudge_1_to_nudge_2: 0,
            nudge_2_to_legal: 0,
            legal_to_court: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn first_mail_carries_snippet_and_evidence() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let contact_id = seed(&db, None).await;
        let mailer = Recorder::new(DeliveryOutcome::Delivered);
        let engine = engine(db.clone(), mailer.clone(), EscalationConfig::default());

        assert_eq!(engine.run_once().await.unwrap(), 1);

        let contact = db.get_contact(contact_id).await.unwrap().unwrap();
        assert_eq!(contact.status, ContactStatus::Sent1stMail);
        assert!(!contact.is_processing);

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "owner@copycat.example");
        assert!(sent[0].body.contains("Matched Content Snippet:\n\"poem x all of it\""));
        let names: Vec<_> = sent[0].attachments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec![SCREENSHOT_ATTACHMENT, PROOF_ATTACHMENT]);
    }

    #[tokio::test]
    async fn dwell_time_gates_the_next_mail() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let contact_id = seed(&db, None).await;
        let mailer = Recorder::new(DeliveryOutcome::Delivered);
        let engine = engine(db.clone(), mailer.clone(), EscalationConfig::default());

        engine.run_once().await.unwrap();
        assert_eq!(engine.run_once().await.unwrap(), 0);
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
        assert_eq!(
            db.get_contact(contact_id).await.unwrap().unwrap().status,
            ContactStatus::Sent1stMail
        );
    }

    #[tokio::test]
    async fn rejected_recipient_bounces_and_failure_fails() {
        for (outcome, expected) in [
            (DeliveryOutcome::RecipientRejected("550 no such user".into()), ContactStatus::Bounced),
            (DeliveryOutcome::Failed("connection reset".into()), ContactStatus::Failed),
        ] {
            let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
            let contact_id = seed(&db, None).await;
            let engine = engine(db.clone(), Recorder::new(outcome), instant_schedule());

            engine.run_once().await.unwrap();
            let contact = db.get_contact(contact_id).await.unwrap().unwrap();
            assert_eq!(contact.status, expected);

            // Terminal: nothing further is claimed.
            tokio::time::sleep(Duration::from_millis(2)).await;
            assert_eq!(engine.run_once().await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_email_override_receives_outreach() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        seed(&db, Some("QA@Firm.example")).await;
        let mailer = Recorder::new(DeliveryOutcome::Delivered);
        let engine = engine(db.clone(), mailer.clone(), EscalationConfig::default());

        engine.run_once().await.unwrap();
        assert_eq!(mailer.sent.lock().unwrap()[0].to, "qa@firm.example");
    }

    #[tokio::test]
    async fn outreach_track_runs_through_legal_tail_one_stage_per_cycle() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let contact_id = seed(&db, None).await;
        let mailer = Recorder::new(DeliveryOutcome::Delivered);
        let engine = engine(db.clone(), mailer.clone(), instant_schedule());

        let mut seen = Vec::new();
        for _ in 0..8 {
            engine.run_once().await.unwrap();
            seen.push(db.get_contact(contact_id).await.unwrap().unwrap().status);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        use ContactStatus::*;
        assert_eq!(
            seen,
            vec![
                Sent1stMail,
                Sent2ndMail,
                Sent3rdMail,
                Sent4thMail,
                LegalLetterReady,
                LegalLetterSent,
                CourtReady,
                CourtReady
            ]
        );
        assert!(seen.windows(2).all(|w| w[0].rank() <= w[1].rank()));

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 7);
        // Legal letters reference the page but carry no evidence.
        assert!(sent[5].subject.starts_with("Formal legal notice"));
        assert!(sent[5].body.contains("Reference: https://copycat.example/poem"));
        assert!(sent[5].attachments.is_empty());
    }
}
