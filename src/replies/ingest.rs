//! Reply ingestion: routes unseen inbound mail to matching contacts.
//!
//! A message is marked seen once it has been handled, matched or not. Only
//! a store failure leaves it unseen so the next cycle retries it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::channels::{Mailbox, parse_inbound};
use crate::error::Error;
use crate::store::Database;
use crate::worker::poller::{CycleOutcome, PollTask};

pub struct ReplyIngestor {
    db: Arc<dyn Database>,
    mailbox: Arc<dyn Mailbox>,
    /// Our own sending address; mail from it is ignored.
    own_address: String,
}

impl ReplyIngestor {
    pub fn new(db: Arc<dyn Database>, mailbox: Arc<dyn Mailbox>, own_address: impl Into<String>) -> Self {
        Self {
            db,
            mailbox,
            own_address: own_address.into(),
        }
    }

    /// Handle every unseen message once. Returns how many were fetched.
    pub async fn run_once(&self) -> Result<usize, Error> {
        let messages = self.mailbox.fetch_unseen().await?;
        if messages.is_empty() {
            return Ok(0);
        }
        debug!(count = messages.len(), "Fetched unseen messages");

        let mut handled = Vec::with_capacity(messages.len());
        for raw in &messages {
            let Some(reply) = parse_inbound(&raw.bytes) else {
                warn!(uid = %raw.uid, "Dropping message without a usable sender");
                handled.push(raw.uid.clone());
                continue;
            };

            if reply.sender.eq_ignore_ascii_case(&self.own_address) {
                debug!(uid = %raw.uid, "Skipping self-sent message");
                handled.push(raw.uid.clone());
                continue;
            }

            match self.db.record_reply(&reply.sender, &reply.body, Utc::now()).await {
                Ok(ids) if ids.is_empty() => {
                    info!(sender = %reply.sender, "No contact awaiting a reply from sender, dropping");
                    handled.push(raw.uid.clone());
                }
                Ok(ids) => {
                    info!(sender = %reply.sender, contacts = ids.len(), "Reply recorded");
                    handled.push(raw.uid.clone());
                }
                Err(e) => {
                    error!(uid = %raw.uid, sender = %reply.sender, error = %e, "Failed to record reply, leaving unseen");
                }
            }
        }

        if !handled.is_empty()
            && let Err(e) = self.mailbox.mark_seen(&handled).await
        {
            warn!(error = %e, "Failed to mark messages as seen");
        }
        Ok(messages.len())
    }
}

#[async_trait]
impl PollTask for ReplyIngestor {
    fn name(&self) -> &'static str {
        "replies"
    }

    async fn run_cycle(&self) -> Result<CycleOutcome, Error> {
        Ok(CycleOutcome::from_count(self.run_once().await?))
    }
}
