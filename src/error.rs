use thiserror::Error;

use crate::jobs::JobId;

#[derive(Error, Debug)]
pub enum CovError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown coverage format")]
    UnknownFormat,

    #[error("Malformed coverage artifact: {0}")]
    MalformedArtifact(String),

    #[error("Schema conflict at '{path}': file on one side, directory on the other")]
    SchemaConflict { path: String },

    #[error("Aggregate needs at least one collection")]
    EmptyAggregateInput,

    #[error("Path not found: '{0}'")]
    PathNotFound(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Collection not found: {0}")]
    CollectionNotFound(i64),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("{0}")]
    Other(String),
}

impl CovError {
    /// Only an unknown or evicted job can succeed on a second attempt, and
    /// only by resubmitting the request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, CovError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CovError>;
