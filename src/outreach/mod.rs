//! Escalation of outreach contacts and court notices.

pub mod court;
pub mod escalation;
pub mod templates;

pub use court::CourtNotifier;
pub use escalation::EscalationEngine;
pub use templates::{EmailTemplate, TemplateSet};
