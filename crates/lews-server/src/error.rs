//! Error taxonomy for the pipeline.
//!
//! Most kinds are recorded and isolated per item; only `StorageFatal`
//! aborts a run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LewsError {
    #[error("validation failed: {0}")]
    Validation(#[from] lews_core::ValidationError),

    /// Storage call failed in a way that may succeed on retry.
    #[error("transient storage error: {0}")]
    StorageTransient(String),

    /// Authoritative storage rejection (missing table, schema mismatch).
    #[error("fatal storage error: {0}")]
    StorageFatal(String),

    /// Zone index lookup failed; callers fall back to defaults.
    #[error("zone lookup unavailable: {0}")]
    RagUnavailable(String),

    #[error("llm throttled: {0}")]
    LlmThrottled(String),

    #[error("llm call failed: {0}")]
    LlmTransient(String),

    /// Model output did not match the assessment schema after retries.
    #[error("llm returned invalid output: {0}")]
    LlmBadOutput(String),

    #[error("location resolution failed: {0}")]
    LocationResolve(String),

    /// Event bus or notification publish failed; alert state is unaffected.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Task budget exhausted; remaining items retry on the next run.
    #[error("deadline exhausted")]
    Deadline,
}

impl LewsError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, LewsError::StorageFatal(_))
    }
}

/// Split sqlx failures into fatal (schema-level) and transient.
pub fn classify_sqlx(err: sqlx::Error) -> LewsError {
    match &err {
        sqlx::Error::Database(db) => {
            let msg = db.message().to_ascii_lowercase();
            if msg.contains("no such table")
                || msg.contains("no such column")
                || msg.contains("syntax error")
            {
                LewsError::StorageFatal(db.message().to_string())
            } else {
                LewsError::StorageTransient(db.message().to_string())
            }
        }
        sqlx::Error::RowNotFound => LewsError::StorageTransient(err.to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            LewsError::StorageTransient(err.to_string())
        }
        _ => LewsError::StorageTransient(err.to_string()),
    }
}
