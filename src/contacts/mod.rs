//! Outreach contacts: their state machine and address harvesting.

pub mod extractor;
pub mod model;
pub mod whois;

pub use extractor::ContactExtractor;
pub use model::{ContactStatus, OutreachContact};
pub use whois::{OwnershipLookup, WhoisLookup};
