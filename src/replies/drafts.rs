//! Draft review gate: generated follow-ups held for human approval.
//!
//! Drafting runs as a background worker. Listing, approval and rejection
//! are called by an operator (the `drafts` CLI commands).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::{DeliveryOutcome, MailTransport, OutgoingMail};
use crate::contacts::{ContactStatus, OutreachContact};
use crate::error::{ChannelError, Error, LlmError, WorkflowError};
use crate::llm::TextGenerator;
use crate::replies::model::{DraftCandidate, DraftSummary, Reply, ReplyStatus};
use crate::store::Database;
use crate::worker::poller::{CycleOutcome, PollTask};

/// Substituted for replies that carry no real content.
pub const AUTO_REPLY_NOTE: &str =
    "The user didn't write anything meaningful. It may be an automatic response or an empty reply.";

pub const FOLLOW_UP_SUBJECT: &str = "Follow-up regarding your message";

/// Candidates drafted per worker cycle.
const DRAFT_BATCH: usize = 10;

const MAX_LIST_LIMIT: usize = 50;

/// Empty bodies, quoted-attribution-only bodies, and out-of-office notices.
pub fn looks_automatic(reply: &str) -> bool {
    let text = reply.trim().to_lowercase();
    text.is_empty()
        || text.starts_with("on ")
        || text.contains("auto-reply")
        || text.contains("automatic reply")
        || text.contains("out of office")
}

pub fn build_prompt(snippet: &str, reply: &str) -> String {
    let reply = if looks_automatic(reply) { AUTO_REPLY_NOTE } else { reply.trim() };
    format!(
        "You are a respectful legal assistant following up with a site owner.\n\n\
         We previously contacted them about content that resembles material under our intellectual property rights.\n\n\
         ---\n\n\
         Here's the snippet of content we flagged:\n\"\"\"\n{}\n\"\"\"\n\n\
         Here's their reply (if any):\n\"\"\"\n{}\n\"\"\"\n\n\
         Now please write a follow-up email. Keep it polite, professional, and brief. \
         Do not sound robotic or threatening. Use a human tone. Use only plain English.\n\n\
         End with: \"Best regards,\nThird Chair Bot\"",
        snippet.trim(),
        reply
    )
}

/// Drafting needs a generator and approval needs a mail transport; listing
/// and rejection need only the store.
pub struct DraftReviewGate {
    db: Arc<dyn Database>,
    generator: Option<Arc<dyn TextGenerator>>,
    mailer: Option<Arc<dyn MailTransport>>,
}

impl DraftReviewGate {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            generator: None,
            mailer: None,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn MailTransport>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Draft follow-ups for replied contacts that have none pending.
    /// A failed generation is retried on a later cycle.
    pub async fn generate_pending(&self) -> Result<usize, Error> {
        let generator = self.generator.as_deref().ok_or(LlmError::NotConfigured)?;
        let candidates = self.db.contacts_awaiting_draft(DRAFT_BATCH).await?;
        let mut drafted = 0;
        for candidate in &candidates {
            if self.draft_one(generator, candidate).await? {
                drafted += 1;
            }
        }
        Ok(drafted)
    }

    async fn draft_one(
        &self,
        generator: &dyn TextGenerator,
        candidate: &DraftCandidate,
    ) -> Result<bool, Error> {
        let reply_text = candidate.reply_text.as_deref().unwrap_or_default();
        let prompt = build_prompt(candidate.matched_snippet.as_deref().unwrap_or_default(), reply_text);

        debug!(contact_id = %candidate.contact_id, model = generator.model_name(), "Drafting follow-up");
        let draft = match generator.generate(&prompt).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(contact_id = %candidate.contact_id, error = %e, "Draft generation failed, will retry");
                return Ok(false);
            }
        };

        let reply = self
            .db
            .insert_draft(candidate.contact_id, reply_text, draft.trim())
            .await?;
        info!(draft_id = %reply.id, contact_id = %candidate.contact_id, email = %candidate.email, "Draft saved");
        Ok(true)
    }

    /// Pending drafts, newest first. `limit` is clamped to 1..=50.
    pub async fn list(&self, limit: usize) -> Result<Vec<DraftSummary>, Error> {
        Ok(self.db.list_drafts(limit.clamp(1, MAX_LIST_LIMIT)).await?)
    }

    /// Send a draft (or the reviewer's edit of it) and close it.
    ///
    /// The draft is claimed before sending, so of two concurrent approvals
    /// only one sends; the other, like any approval of a draft that is no
    /// longer `DRAFTED`, fails with `NotFound`. A delivery failure puts the
    /// draft back to pending.
    pub async fn approve(&self, draft_id: Uuid, edited_text: Option<&str>) -> Result<Reply, Error> {
        let not_found = || WorkflowError::NotFound {
            entity: "draft",
            id: draft_id,
        };
        let mailer = self.mailer.as_deref().ok_or_else(|| ChannelError::SendFailed {
            name: "smtp".into(),
            reason: "no mail transport configured".into(),
        })?;
        let reply = self.db.claim_draft(draft_id).await?.ok_or_else(not_found)?;

        let (contact, final_text) = match self.deliver(mailer, &reply, edited_text).await {
            Ok(sent) => sent,
            Err(e) => {
                if let Err(release_err) = self.db.release_draft(draft_id).await {
                    warn!(%draft_id, error = %release_err, "Failed to return draft to pending");
                }
                return Err(e);
            }
        };

        if !self.db.mark_draft_sent(draft_id, &final_text).await? {
            return Err(not_found().into());
        }

        match self
            .db
            .transition_contact(contact.id, ContactStatus::Replied, ContactStatus::RepliedByUs)
            .await
        {
            Ok(()) => {}
            Err(Error::Workflow(e)) => {
                warn!(contact_id = %contact.id, status = %contact.status, error = %e, "Contact not moved to REPLIED_BY_US");
            }
            Err(e) => return Err(e),
        }

        info!(%draft_id, contact_id = %contact.id, edited = edited_text.is_some(), "Draft approved and sent");
        self.db.get_reply(draft_id).await?.ok_or_else(|| not_found().into())
    }

    /// Mail a claimed draft to its contact. Returns the contact and the text sent.
    async fn deliver(
        &self,
        mailer: &dyn MailTransport,
        reply: &Reply,
        edited_text: Option<&str>,
    ) -> Result<(OutreachContact, String), Error> {
        let contact = self
            .db
            .get_contact(reply.contact_id)
            .await?
            .ok_or(WorkflowError::MissingRelated {
                entity: "draft",
                id: reply.id,
                missing: "contact",
            })?;

        let final_text = edited_text
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&reply.llm_draft)
            .to_string();

        let mail = OutgoingMail::new(&contact.email, FOLLOW_UP_SUBJECT, final_text.clone());
        match mailer.send(&mail).await {
            DeliveryOutcome::Delivered => Ok((contact, final_text)),
            DeliveryOutcome::RecipientRejected(reason) | DeliveryOutcome::Failed(reason) => {
                Err(ChannelError::SendFailed {
                    name: "smtp".into(),
                    reason,
                }
                .into())
            }
        }
    }

    /// Close a draft without sending. The contact is left as is.
    pub async fn reject(&self, draft_id: Uuid) -> Result<(), Error> {
        if !self.db.mark_draft_rejected(draft_id).await? {
            return Err(WorkflowError::NotFound {
                entity: "draft",
                id: draft_id,
            }
            .into());
        }
        info!(%draft_id, "Draft rejected");
        Ok(())
    }
}

#[async_trait]
impl PollTask for DraftReviewGate {
    fn name(&self) -> &'static str {
        "drafts"
    }

    async fn run_cycle(&self) -> Result<CycleOutcome, Error> {
        Ok(CycleOutcome::from_count(self.generate_pending().await?))
    }
}
