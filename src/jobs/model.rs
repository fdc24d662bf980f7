//! Job data model: submitted text, domain filters, and the crawl-event lease.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Submitted, crawl event waiting for a worker.
    Pending,
    /// A crawl worker holds the event.
    Crawling,
    /// Search pages exhausted or crawl stopped early.
    Crawled,
    /// At least one contact on this job produced a court notice.
    CourtNoticeSent,
    /// The crawl event exceeded its attempt budget.
    DeadLettered,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Crawling => "CRAWLING",
            Self::Crawled => "CRAWLED",
            Self::CourtNoticeSent => "COURT_NOTICE_SENT",
            Self::DeadLettered => "DEAD_LETTERED",
        }
    }

    /// Whether a job may move from `self` to `to`.
    ///
    /// Staying in the same status is always permitted; the store treats
    /// it as a no-op.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        if *self == to {
            return true;
        }
        matches!(
            (self, to),
            (Pending, Crawling)
                | (Pending, DeadLettered)
                | (Crawling, Crawled)
                | (Crawling, DeadLettered)
                | (Crawling, CourtNoticeSent)
                | (Crawled, CourtNoticeSent)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CRAWLING" => Ok(Self::Crawling),
            "CRAWLED" => Ok(Self::Crawled),
            "COURT_NOTICE_SENT" => Ok(Self::CourtNoticeSent),
            "DEAD_LETTERED" => Ok(Self::DeadLettered),
            _ => Err(format!("Unknown job status: {s}")),
        }
    }
}

/// Domain allow/deny lists applied to search results.
///
/// Entries are compared against a URL's host exactly (after lowercasing),
/// never as substrings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainFilters {
    #[serde(default)]
    pub include_domains: Vec<String>,
    #[serde(default)]
    pub exclude_domains: Vec<String>,
}

/// A submitted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub input_text: String,
    pub filters: DomainFilters,
    pub status: JobStatus,
    /// Reason recorded when the job was dead-lettered.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a job. Creation also enqueues one crawl event and,
/// when `test_email` is set, records the test-email override.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub input_text: String,
    pub filters: DomainFilters,
    pub test_email: Option<String>,
}

impl NewJob {
    pub fn new(input_text: impl Into<String>) -> Self {
        Self {
            input_text: input_text.into(),
            ..Default::default()
        }
    }

    pub fn with_filters(mut self, filters: DomainFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_test_email(mut self, email: impl Into<String>) -> Self {
        self.test_email = Some(email.into());
        self
    }
}

/// A leasable unit of crawl work, one per job.
#[derive(Debug, Clone)]
pub struct CrawlEvent {
    pub id: Uuid,
    pub job_id: Uuid,
    pub is_processing: bool,
    /// Number of times this event has been claimed, including the current claim.
    pub attempts: u32,
    /// Last heartbeat; a lease older than the timeout is reclaimable.
    pub progress_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
