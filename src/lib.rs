//! Takedown engine: finds copies of submitted text on the web, captures
//! timestamped evidence, and walks site owners through staged outreach.

pub mod channels;
pub mod config;
pub mod contacts;
pub mod crawl;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod outreach;
pub mod replies;
pub mod store;
pub mod worker;
