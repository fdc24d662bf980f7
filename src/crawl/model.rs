//! Crawl result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome recorded for a scanned URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlResultStatus {
    Matched,
    Error,
}

impl CrawlResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "MATCHED",
            Self::Error => "ERROR",
        }
    }
}

impl std::str::FromStr for CrawlResultStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MATCHED" => Ok(Self::Matched),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("Unknown crawl result status: {s}")),
        }
    }
}

/// A persisted crawl result. Non-matching pages are not recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub url: String,
    pub match_score: Option<u8>,
    pub matched_snippet: Option<String>,
    pub screenshot_path: Option<String>,
    /// Hex SHA-256 of the screenshot bytes at capture time.
    pub screenshot_sha256: Option<String>,
    pub ots_path: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub status: CrawlResultStatus,
    pub error: Option<String>,
}

/// Input for [`crate::store::Database::insert_crawl_result`].
#[derive(Debug, Clone)]
pub struct NewCrawlResult {
    pub job_id: Uuid,
    pub url: String,
    pub match_score: Option<u8>,
    pub matched_snippet: Option<String>,
    pub screenshot_path: Option<String>,
    pub screenshot_sha256: Option<String>,
    pub ots_path: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub status: CrawlResultStatus,
    pub error: Option<String>,
}

impl NewCrawlResult {
    /// A matched page with its evidence.
    pub fn matched(
        job_id: Uuid,
        url: impl Into<String>,
        score: u8,
        snippet: impl Into<String>,
        evidence: &crate::crawl::evidence::CapturedEvidence,
    ) -> Self {
        Self {
            job_id,
            url: url.into(),
            match_score: Some(score),
            matched_snippet: Some(snippet.into()),
            screenshot_path: Some(evidence.screenshot_path.display().to_string()),
            screenshot_sha256: Some(evidence.screenshot_sha256.clone()),
            ots_path: Some(evidence.proof_path.display().to_string()),
            captured_at: evidence.captured_at,
            status: CrawlResultStatus::Matched,
            error: None,
        }
    }

    /// A page that could not be scanned.
    pub fn error(job_id: Uuid, url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            job_id,
            url: url.into(),
            match_score: None,
            matched_snippet: None,
            screenshot_path: None,
            screenshot_sha256: None,
            ots_path: None,
            captured_at: Utc::now(),
            status: CrawlResultStatus::Error,
            error: Some(reason.into()),
        }
    }
}
