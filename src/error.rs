//! Error types for the gradebook.

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, GradebookError>;

#[derive(Error, Debug)]
pub enum GradebookError {
    /// No subject was selected for an action that needs one
    #[error("Please select a subject first")]
    MissingSubject,

    /// A grade was submitted without a student
    #[error("Please select a student before saving the grade")]
    MissingStudent,

    #[error("{field} score {value} is outside the grading scale (1.0-5.0)")]
    ScoreOutOfScale { field: &'static str, value: f64 },

    #[error("{field} score {value} falls between 3.0 and 4.0, which the grading scale does not define")]
    ScoreInUndefinedBand { field: &'static str, value: f64 },

    /// Any other rejected form field
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Subject {0} not found")]
    SubjectNotFound(Uuid),

    #[error("Record {0} not found")]
    RecordNotFound(Uuid),

    #[error("Invalid form transition from {from} on {event}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },

    #[error("An analysis for subject {0} is already running")]
    AnalysisInFlight(Uuid),

    #[error("Analysis for subject {0} was cancelled")]
    Cancelled(Uuid),

    #[error("Narrative service timed out after {0}s")]
    Timeout(u64),

    /// Non-success HTTP status from the narrative service
    #[error("Narrative service returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// A 2xx response whose body could not be used
    #[error("Narrative service sent an unusable response: {0}")]
    InvalidResponse(String),

    #[error("Narrative service is not configured: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GradebookError {
    /// Client-side rejections that never reached a remote service.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GradebookError::MissingSubject
                | GradebookError::MissingStudent
                | GradebookError::ScoreOutOfScale { .. }
                | GradebookError::ScoreInUndefinedBand { .. }
                | GradebookError::InvalidField { .. }
        )
    }
}
