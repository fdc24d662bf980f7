//! Inbound replies and the human-reviewed follow-up drafts.

pub mod drafts;
pub mod ingest;
pub mod model;

pub use drafts::DraftReviewGate;
pub use ingest::ReplyIngestor;
pub use model::{DraftSummary, Reply, ReplyStatus};
