//! Crawl-event lease queue and the worker that drains it.
//!
//! A claimed event is acknowledged (deleted) on success and released on
//! failure. A worker that dies without releasing loses the lease once its
//! heartbeat is older than the lease timeout. Events claimed more than
//! `max_attempts` times are dead-lettered instead of crawled again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::crawl::MatchDetector;
use crate::error::{DatabaseError, Error};
use crate::jobs::model::{CrawlEvent, JobStatus};
use crate::store::Database;
use crate::worker::poller::{CycleOutcome, PollTask, cutoff};

pub struct LeaseQueue {
    db: Arc<dyn Database>,
    lease_timeout: Duration,
}

impl LeaseQueue {
    pub fn new(db: Arc<dyn Database>, lease_timeout: Duration) -> Self {
        Self { db, lease_timeout }
    }

    /// Claim the oldest free or stale event.
    pub async fn claim(&self) -> Result<Option<CrawlEvent>, DatabaseError> {
        self.db.claim_crawl_event(cutoff(self.lease_timeout)).await
    }

    /// Extend the lease. False means it was lost to another claimant.
    pub async fn heartbeat(&self, event: &CrawlEvent) -> Result<bool, DatabaseError> {
        self.db.touch_crawl_event(event.id, event.attempts).await
    }

    pub async fn ack(&self, event: &CrawlEvent) -> Result<bool, DatabaseError> {
        self.db.delete_crawl_event(event.id, event.attempts).await
    }

    pub async fn release(&self, event: &CrawlEvent) -> Result<bool, DatabaseError> {
        self.db.release_crawl_event(event.id, event.attempts).await
    }

    /// Park a poison event: drop the event and record the reason on its job.
    pub async fn dead_letter(&self, event: &CrawlEvent, reason: &str) -> Result<(), Error> {
        if !self.db.delete_crawl_event(event.id, event.attempts).await? {
            warn!(event_id = %event.id, "Lease lost before dead-lettering");
            return Ok(());
        }
        if let Some(job) = self.db.get_job(event.job_id).await?
            && job.status.can_transition_to(JobStatus::DeadLettered)
        {
            self.db
                .update_job_status(job.id, JobStatus::DeadLettered, Some(reason))
                .await?;
        }
        warn!(event_id = %event.id, job_id = %event.job_id, reason, "Crawl event dead-lettered");
        Ok(())
    }
}

/// Claims one crawl event per cycle and runs the detector on it.
pub struct CrawlWorker {
    queue: LeaseQueue,
    detector: MatchDetector,
    max_attempts: u32,
}

impl CrawlWorker {
    pub fn new(queue: LeaseQueue, detector: MatchDetector, max_attempts: u32) -> Self {
        Self {
            queue,
            detector,
            max_attempts,
        }
    }
}

#[async_trait]
impl PollTask for CrawlWorker {
    fn name(&self) -> &'static str {
        "crawl"
    }

    async fn run_cycle(&self) -> Result<CycleOutcome, Error> {
        let Some(event) = self.queue.claim().await? else {
            return Ok(CycleOutcome::Idle);
        };
        info!(event_id = %event.id, job_id = %event.job_id, attempt = event.attempts, "Claimed crawl event");

        if event.attempts > self.max_attempts {
            let reason = format!("crawl abandoned after {} attempts", self.max_attempts);
            self.queue.dead_letter(&event, &reason).await?;
            return Ok(CycleOutcome::Worked(1));
        }

        match self.detector.run(&event).await {
            Ok(summary) => {
                if !self.queue.ack(&event).await? {
                    warn!(event_id = %event.id, "Lease lost before completion was recorded");
                }
                info!(event_id = %event.id, job_id = %event.job_id, matched = summary.matched, "Crawl event completed");
                Ok(CycleOutcome::Worked(1))
            }
            Err(e) => {
                error!(event_id = %event.id, job_id = %event.job_id, error = %e, "Crawl failed, releasing lease");
                match self.queue.release(&event).await {
                    Ok(true) => {}
                    Ok(false) => warn!(event_id = %event.id, "Lease already lost, nothing to release"),
                    Err(release_err) => {
                        warn!(event_id = %event.id, error = %release_err, "Failed to release crawl event")
                    }
                }
                Err(e)
            }
        }
    }
}
