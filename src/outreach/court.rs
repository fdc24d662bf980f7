//! Court notifier: tells the client about contacts that reached `COURT_READY`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::channels::{DeliveryOutcome, MailTransport, OutgoingMail};
use crate::config::EscalationConfig;
use crate::contacts::{ContactStatus, OutreachContact};
use crate::error::{ChannelError, Error, WorkflowError};
use crate::jobs::JobStatus;
use crate::outreach::escalation::evidence_attachments;
use crate::store::Database;
use crate::worker::poller::{CycleOutcome, PollTask, cutoff};

const NO_SNIPPET: &str = "<No snippet captured>";

pub struct CourtNotifier {
    db: Arc<dyn Database>,
    mailer: Arc<dyn MailTransport>,
    config: EscalationConfig,
}

impl CourtNotifier {
    pub fn new(db: Arc<dyn Database>, mailer: Arc<dyn MailTransport>, config: EscalationConfig) -> Self {
        Self { db, mailer, config }
    }

    /// Notify for up to one batch of court-ready contacts.
    pub async fn run_once(&self) -> Result<usize, Error> {
        let ready = self
            .db
            .claim_due_contacts(
                ContactStatus::CourtReady,
                chrono::Utc::now(),
                cutoff(self.config.lease_timeout),
                self.config.court_batch_limit,
            )
            .await?;
        if ready.is_empty() {
            debug!("No court-ready contacts");
            return Ok(0);
        }
        info!(count = ready.len(), "Court-ready contacts found");

        for contact in &ready {
            if let Err(e) = self.notify(contact).await {
                error!(contact_id = %contact.id, error = %e, "Court notice failed, releasing contact");
                if let Err(release_err) = self.db.release_contact(contact.id).await {
                    warn!(contact_id = %contact.id, error = %release_err, "Failed to release contact");
                }
            }
        }
        Ok(ready.len())
    }

    async fn notify(&self, contact: &OutreachContact) -> Result<(), Error> {
        let result = self
            .db
            .get_crawl_result(contact.crawl_result_id)
            .await?
            .ok_or(WorkflowError::MissingRelated {
                entity: "contact",
                id: contact.id,
                missing: "crawl result",
            })?;

        let recipient = match &self.config.client_address {
            Some(address) => address.clone(),
            None => self
                .db
                .get_test_email(contact.job_id)
                .await?
                .unwrap_or_else(|| contact.email.clone()),
        };

        let snippet = result.matched_snippet.as_deref().unwrap_or(NO_SNIPPET);
        let body = format!(
            "Dear Client,\n\nA contact has reached COURT_READY status.\n\n\
             Details:\nEmail: {}\nURL: {}\nSnippet: {}\n\n\
             Please find attached the screenshot and OTS timestamp.\n\n\
             Regards,\nThird Chair Bot",
            contact.email, result.url, snippet
        );
        let mail = evidence_attachments(
            OutgoingMail::new(&recipient, format!("New court-ready case: {}", result.url), body),
            &result,
        );

        match self.mailer.send(&mail).await {
            DeliveryOutcome::Delivered => {}
            DeliveryOutcome::RecipientRejected(reason) | DeliveryOutcome::Failed(reason) => {
                return Err(ChannelError::SendFailed {
                    name: "smtp".into(),
                    reason,
                }
                .into());
            }
        }

        match self.db.get_job(contact.job_id).await? {
            Some(job) if job.status.can_transition_to(JobStatus::CourtNoticeSent) => {
                self.db
                    .update_job_status(job.id, JobStatus::CourtNoticeSent, None)
                    .await?;
            }
            Some(job) => warn!(job_id = %job.id, status = %job.status, "Job status left unchanged"),
            None => warn!(job_id = %contact.job_id, "Job missing for court-ready contact"),
        }
        self.db
            .transition_contact(contact.id, ContactStatus::CourtReady, ContactStatus::CourtNoticeSent)
            .await?;
        info!(contact_id = %contact.id, job_id = %contact.job_id, to = %recipient, "Court notice sent");
        Ok(())
    }
}

#[async_trait]
impl PollTask for CourtNotifier {
    fn name(&self) -> &'static str {
        "court"
    }

    async fn run_cycle(&self) -> Result<CycleOutcome, Error> {
        Ok(CycleOutcome::from_count(self.run_once().await?))
    }
}
