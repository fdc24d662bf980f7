//! Content-match detection and evidence capture.

pub mod detector;
pub mod evidence;
pub mod filter;
pub mod model;
pub mod render;
pub mod search;
pub mod similarity;

pub use detector::{CrawlSummary, DetectorParts, MatchDetector};
pub use evidence::{CapturedEvidence, EvidenceStore, OtsProver, TimestampProver};
pub use model::{CrawlResult, CrawlResultStatus, NewCrawlResult};
pub use render::{PageRenderer, PlaywrightRenderer, RenderedPage};
pub use search::{SearchProvider, SerperSearch};
pub use similarity::{PartialRatio, SimilarityScorer};
