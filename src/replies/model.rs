//! Reply drafts awaiting human review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Review state of a drafted response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyStatus {
    /// Generated, waiting for a reviewer.
    Drafted,
    /// Approved, delivery in progress.
    Sending,
    /// Approved and delivered.
    Sent,
    /// Discarded by a reviewer.
    Rejected,
}

impl ReplyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drafted => "DRAFTED",
            Self::Sending => "SENDING",
            Self::Sent => "SENT",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::str::FromStr for ReplyStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFTED" => Ok(Self::Drafted),
            "SENDING" => Ok(Self::Sending),
            "SENT" => Ok(Self::Sent),
            "REJECTED" => Ok(Self::Rejected),
            _ => Err(format!("Unknown reply status: {s}")),
        }
    }
}

/// A drafted response to an owner's reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub original_reply: String,
    pub llm_draft: String,
    /// Text actually delivered on approval (the edit, or the draft itself).
    pub final_text: Option<String>,
    pub status: ReplyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the review listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftSummary {
    pub draft_id: Uuid,
    pub email: String,
    pub reply_text: String,
    pub draft_text: String,
    pub generated_at: DateTime<Utc>,
}

/// A contact in `REPLIED` that still needs a draft.
#[derive(Debug, Clone)]
pub struct DraftCandidate {
    pub contact_id: Uuid,
    pub email: String,
    pub reply_text: Option<String>,
    pub matched_snippet: Option<String>,
}
