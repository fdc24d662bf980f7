//! Outreach contact model and the unified escalation state machine.
//!
//! Two tracks share one status column:
//!
//! ```text
//! NOT_CONTACTED -> SENT_1ST_MAIL -> SENT_2ND_MAIL -> SENT_3RD_MAIL -> SENT_4TH_MAIL ─┐
//!                                                                                    ├─> LEGAL_LETTER_READY
//! REPLIED -> REPLIED_BY_US -> NUDGED_AGAIN ──────────────────────────────────────────┘
//!
//! LEGAL_LETTER_READY -> LEGAL_LETTER_SENT -> COURT_READY -> COURT_NOTICE_SENT
//! ```
//!
//! Any pre-court, non-terminal stage may jump to `REPLIED` when the owner
//! writes back. Stages that send mail may end in `BOUNCED` or `FAILED`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where an outreach contact sits in the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactStatus {
    NotContacted,
    #[serde(rename = "SENT_1ST_MAIL")]
    Sent1stMail,
    #[serde(rename = "SENT_2ND_MAIL")]
    Sent2ndMail,
    #[serde(rename = "SENT_3RD_MAIL")]
    Sent3rdMail,
    #[serde(rename = "SENT_4TH_MAIL")]
    Sent4thMail,
    Replied,
    RepliedByUs,
    NudgedAgain,
    LegalLetterReady,
    LegalLetterSent,
    CourtReady,
    CourtNoticeSent,
    Bounced,
    Failed,
}

impl ContactStatus {
    pub const ALL: [ContactStatus; 14] = [
        Self::NotContacted,
        Self::Sent1stMail,
        Self::Sent2ndMail,
        Self::Sent3rdMail,
        Self::Sent4thMail,
        Self::Replied,
        Self::RepliedByUs,
        Self::NudgedAgain,
        Self::LegalLetterReady,
        Self::LegalLetterSent,
        Self::CourtReady,
        Self::CourtNoticeSent,
        Self::Bounced,
        Self::Failed,
    ];

    /// Stages the escalation engine advances on a timer, in polling order.
    pub const TIMED_STAGES: [ContactStatus; 9] = [
        Self::NotContacted,
        Self::Sent1stMail,
        Self::Sent2ndMail,
        Self::Sent3rdMail,
        Self::Sent4thMail,
        Self::RepliedByUs,
        Self::NudgedAgain,
        Self::LegalLetterReady,
        Self::LegalLetterSent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotContacted => "NOT_CONTACTED",
            Self::Sent1stMail => "SENT_1ST_MAIL",
            Self::Sent2ndMail => "SENT_2ND_MAIL",
            Self::Sent3rdMail => "SENT_3RD_MAIL",
            Self::Sent4thMail => "SENT_4TH_MAIL",
            Self::Replied => "REPLIED",
            Self::RepliedByUs => "REPLIED_BY_US",
            Self::NudgedAgain => "NUDGED_AGAIN",
            Self::LegalLetterReady => "LEGAL_LETTER_READY",
            Self::LegalLetterSent => "LEGAL_LETTER_SENT",
            Self::CourtReady => "COURT_READY",
            Self::CourtNoticeSent => "COURT_NOTICE_SENT",
            Self::Bounced => "BOUNCED",
            Self::Failed => "FAILED",
        }
    }

    /// The stage reached by sending this stage's timed mail, if any.
    pub fn next_stage(&self) -> Option<ContactStatus> {
        use ContactStatus::*;
        match self {
            NotContacted => Some(Sent1stMail),
            Sent1stMail => Some(Sent2ndMail),
            Sent2ndMail => Some(Sent3rdMail),
            Sent3rdMail => Some(Sent4thMail),
            Sent4thMail => Some(LegalLetterReady),
            RepliedByUs => Some(NudgedAgain),
            NudgedAgain => Some(LegalLetterReady),
            LegalLetterReady => Some(LegalLetterSent),
            LegalLetterSent => Some(CourtReady),
            Replied | CourtReady | CourtNoticeSent | Bounced | Failed => None,
        }
    }

    /// No further transitions leave a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CourtNoticeSent | Self::Bounced | Self::Failed)
    }

    /// Whether an inbound reply from the owner moves this contact to `REPLIED`.
    pub fn accepts_reply(&self) -> bool {
        !self.is_terminal() && !matches!(self, Self::CourtReady)
    }

    /// Position along the workflow. Transitions only increase rank, except
    /// for the jump back into `REPLIED`.
    pub fn rank(&self) -> u8 {
        use ContactStatus::*;
        match self {
            NotContacted => 0,
            Sent1stMail => 1,
            Sent2ndMail => 2,
            Sent3rdMail => 3,
            Sent4thMail => 4,
            Replied => 5,
            RepliedByUs => 6,
            NudgedAgain => 7,
            LegalLetterReady => 8,
            LegalLetterSent => 9,
            CourtReady => 10,
            CourtNoticeSent => 11,
            Bounced | Failed => 12,
        }
    }

    /// Whether the state machine permits `self -> to`.
    pub fn can_transition_to(&self, to: ContactStatus) -> bool {
        use ContactStatus::*;
        match (*self, to) {
            (from, Replied) => from.accepts_reply(),
            (Replied, RepliedByUs) => true,
            (CourtReady, CourtNoticeSent) => true,
            (from, Bounced | Failed) => from.next_stage().is_some(),
            (from, to) => from.next_stage() == Some(to),
        }
    }
}

impl std::fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContactStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown contact status: {s}"))
    }
}

/// A candidate owner address attached to a matched page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachContact {
    pub id: Uuid,
    pub job_id: Uuid,
    pub crawl_result_id: Uuid,
    pub email: String,
    pub status: ContactStatus,
    pub is_processing: bool,
    pub last_reply_text: Option<String>,
    pub reply_received_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Set on every status change; escalation dwell is measured from here.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in ContactStatus::ALL {
            assert_eq!(status.as_str().parse::<ContactStatus>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_string(&ContactStatus::Sent1stMail).unwrap(),
            "\"SENT_1ST_MAIL\""
        );
        assert_eq!(
            serde_json::to_string(&ContactStatus::LegalLetterReady).unwrap(),
            "\"LEGAL_LETTER_READY\""
        );
    }

    #[test]
    fn transitions_only_move_forward_except_into_replied() {
        for from in ContactStatus::ALL {
            for to in ContactStatus::ALL {
                if from.can_transition_to(to) && to != ContactStatus::Replied {
                    assert!(
                        to.rank() > from.rank(),
                        "{from} -> {to} would regress"
                    );
                }
            }
        }
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        for from in ContactStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ContactStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} should be rejected");
            }
        }
    }

    #[test]
    fn both_tracks_merge_at_legal_letter_ready() {
        assert_eq!(
            ContactStatus::Sent4thMail.next_stage(),
            Some(ContactStatus::LegalLetterReady)
        );
        assert_eq!(
            ContactStatus::NudgedAgain.next_stage(),
            Some(ContactStatus::LegalLetterReady)
        );
        assert_eq!(
            ContactStatus::LegalLetterSent.next_stage(),
            Some(ContactStatus::CourtReady)
        );
    }

    #[test]
    fn reply_branch_covers_pre_court_stages() {
        assert!(ContactStatus::Sent2ndMail.can_transition_to(ContactStatus::Replied));
        assert!(ContactStatus::LegalLetterSent.can_transition_to(ContactStatus::Replied));
        assert!(ContactStatus::Replied.can_transition_to(ContactStatus::Replied));
        assert!(!ContactStatus::CourtReady.can_transition_to(ContactStatus::Replied));
        assert!(!ContactStatus::Bounced.can_transition_to(ContactStatus::Replied));
    }

    #[test]
    fn stages_cannot_be_skipped() {
        assert!(!ContactStatus::NotContacted.can_transition_to(ContactStatus::Sent2ndMail));
        assert!(!ContactStatus::Replied.can_transition_to(ContactStatus::NudgedAgain));
        assert!(!ContactStatus::LegalLetterSent.can_transition_to(ContactStatus::CourtNoticeSent));
        assert!(!ContactStatus::CourtReady.can_transition_to(ContactStatus::Bounced));
    }

    #[test]
    fn every_timed_stage_has_a_successor() {
        for stage in ContactStatus::TIMED_STAGES {
            assert!(stage.next_stage().is_some(), "{stage}");
        }
    }
}
