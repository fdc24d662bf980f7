//! Error types for the takedown engine.

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Crawl error: {0}")]
    Crawl(#[from] CrawlError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

/// Missing or malformed settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Store failures, independent of workflow rules.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail transport and mailbox errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Mailbox {name} unreachable: {reason}")]
    Disconnected { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },
}

/// Text-generation provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("No text generator configured")]
    NotConfigured,
}

/// Search, render, and evidence-capture errors.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("Search request failed: {0}")]
    Search(String),

    #[error("Failed to render {url}: {reason}")]
    Render { url: String, reason: String },

    #[error("Fetch of {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Evidence capture failed: {0}")]
    Evidence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// State-machine and lease violations detected at the application layer.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{entity} {id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: Uuid,
        from: String,
        to: String,
    },

    #[error("{entity} {id} is no longer in state {expected}")]
    LeaseLost {
        entity: &'static str,
        id: Uuid,
        expected: String,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} {id} references missing {missing}")]
    MissingRelated {
        entity: &'static str,
        id: Uuid,
        missing: &'static str,
    },

    #[error("{worker} cycle panicked: {message}")]
    Panicked {
        worker: &'static str,
        message: String,
    },
}
