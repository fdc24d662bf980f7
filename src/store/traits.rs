//! Unified `Database` trait: one async interface for all persistence.
//!
//! Methods that only read or write rows return `DatabaseError`. Methods that
//! move an entity through its state machine return the crate `Error` so that
//! illegal transitions surface as `WorkflowError`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::contacts::model::{ContactStatus, OutreachContact};
use crate::crawl::model::{CrawlResult, NewCrawlResult};
use crate::error::{DatabaseError, Error};
use crate::jobs::model::{CrawlEvent, Job, JobStatus, NewJob};
use crate::replies::model::{DraftCandidate, DraftSummary, Reply};

/// Backend-agnostic database trait covering jobs, the crawl lease queue,
/// crawl results, contacts, and reply drafts.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    /// Insert a job, its crawl event, and the optional test-email override
    /// in one transaction.
    async fn create_job(&self, job: &NewJob) -> Result<Job, DatabaseError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// Move a job to `to`, validating the transition. Same-status updates
    /// are no-ops. `note` is stored as `last_error` when present.
    async fn update_job_status(&self, id: Uuid, to: JobStatus, note: Option<&str>) -> Result<(), Error>;

    /// The test-email override recorded for a job, if any.
    async fn get_test_email(&self, job_id: Uuid) -> Result<Option<String>, DatabaseError>;

    // ── Crawl events (lease queue) ──────────────────────────────────

    /// Atomically claim the oldest event that is free or whose lease
    /// heartbeat is older than `stale_before`. Increments its attempt count.
    async fn claim_crawl_event(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<CrawlEvent>, DatabaseError>;

    /// Refresh the lease heartbeat. `lease` is the attempt number returned
    /// by the claim; returns false if the event is gone, no longer leased, or
    /// was reclaimed by someone else since.
    async fn touch_crawl_event(&self, id: Uuid, lease: u32) -> Result<bool, DatabaseError>;

    /// Clear the lease so another worker can claim the event immediately.
    /// Returns false if the lease was lost.
    async fn release_crawl_event(&self, id: Uuid, lease: u32) -> Result<bool, DatabaseError>;

    /// Remove a completed or dead-lettered event. Returns false if the lease
    /// was lost.
    async fn delete_crawl_event(&self, id: Uuid, lease: u32) -> Result<bool, DatabaseError>;

    /// Count queued events (leased or not).
    async fn count_crawl_events(&self) -> Result<u64, DatabaseError>;

    // ── Crawl results ───────────────────────────────────────────────

    async fn insert_crawl_result(
        &self,
        result: &NewCrawlResult,
    ) -> Result<CrawlResult, DatabaseError>;

    async fn get_crawl_result(&self, id: Uuid)
    -> Result<Option<CrawlResult>, DatabaseError>;

    async fn list_crawl_results(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<CrawlResult>, DatabaseError>;

    // ── Outreach contacts ───────────────────────────────────────────

    /// Insert one `NOT_CONTACTED` contact per address, all or none.
    /// Duplicate addresses for the same crawl result are skipped.
    async fn insert_contacts(
        &self,
        job_id: Uuid,
        crawl_result_id: Uuid,
        emails: &[String],
    ) -> Result<Vec<OutreachContact>, DatabaseError>;

    async fn get_contact(&self, id: Uuid) -> Result<Option<OutreachContact>, DatabaseError>;

    async fn list_contacts_for_job(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<OutreachContact>, DatabaseError>;

    /// Lease up to `limit` contacts in `status` whose last status change is
    /// at or before `updated_before`. Leases taken before `lease_stale_before`
    /// are treated as abandoned. Claiming does not touch `updated_at`.
    async fn claim_due_contacts(
        &self,
        status: ContactStatus,
        updated_before: DateTime<Utc>,
        lease_stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutreachContact>, DatabaseError>;

    /// Conditionally move a contact from `from` to `to`, clearing its lease
    /// and stamping `updated_at`. Fails with `LeaseLost` if the contact is no
    /// longer in `from`.
    async fn transition_contact(&self, id: Uuid, from: ContactStatus, to: ContactStatus) -> Result<(), Error>;

    /// Clear a contact's lease without changing its status.
    async fn release_contact(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Move every contact with exactly this address whose status accepts a
    /// reply to `REPLIED`, storing the text. Returns the affected ids.
    async fn record_reply(
        &self,
        email: &str,
        body: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, DatabaseError>;

    // ── Reply drafts ────────────────────────────────────────────────

    /// `REPLIED` contacts with no pending draft and no draft sent since
    /// their latest reply.
    async fn contacts_awaiting_draft(
        &self,
        limit: usize,
    ) -> Result<Vec<DraftCandidate>, DatabaseError>;

    async fn insert_draft(
        &self,
        contact_id: Uuid,
        original_reply: &str,
        llm_draft: &str,
    ) -> Result<Reply, DatabaseError>;

    async fn get_reply(&self, id: Uuid) -> Result<Option<Reply>, DatabaseError>;

    /// Drafts in `DRAFTED`, newest first.
    async fn list_drafts(&self, limit: usize) -> Result<Vec<DraftSummary>, DatabaseError>;

    /// `DRAFTED -> SENDING`. Returns the claimed draft, or `None` if it was
    /// not in `DRAFTED` (already approved, rejected or being sent).
    async fn claim_draft(&self, id: Uuid) -> Result<Option<Reply>, DatabaseError>;

    /// `SENDING -> DRAFTED` after a failed delivery.
    async fn release_draft(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// `SENDING -> SENT`. Returns false if the draft was not in `SENDING`.
    async fn mark_draft_sent(&self, id: Uuid, final_text: &str) -> Result<bool, DatabaseError>;

    /// `DRAFTED -> REJECTED`. Returns false if the draft was not in `DRAFTED`.
    async fn mark_draft_rejected(&self, id: Uuid) -> Result<bool, DatabaseError>;
}
