//! Submitted jobs and the crawl-event lease queue.

pub mod model;
pub mod queue;

pub use model::{CrawlEvent, DomainFilters, Job, JobStatus, NewJob};
pub use queue::{CrawlWorker, LeaseQueue};
