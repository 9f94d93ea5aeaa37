use thiserror::Error;

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("query failed: {0}")]
    Query(String),

    #[error("batch commit failed: {0}")]
    Commit(String),

    #[error("invalid labels '{labels}': {reason}")]
    InvalidLabels { labels: String, reason: String },

    #[error("snooze of {0} days is outside 1..={max}", max = crate::backend::MAX_SNOOZE_DAYS)]
    InvalidSnooze(i64),

    #[error("ticket not found: {0}")]
    TicketNotFound(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("webhook signature rejected: {0}")]
    Signature(String),

    #[error("unknown ticket backend '{0}'")]
    UnknownBackend(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("schema mismatch: {0}")]
    Schema(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TicketError>;
