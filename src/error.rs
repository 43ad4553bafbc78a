//! Error types for the financial insight pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline stage that an upstream failure is attributed to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Prediction,
    Narrative,
    Audio,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Prediction => "prediction",
            Stage::Narrative => "narrative",
            Stage::Audio => "audio",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Invalid input: {0}")]
    InputInvalid(String),

    #[error("{stage} service unavailable: {message}")]
    UpstreamUnavailable { stage: Stage, message: String },

    #[error("{stage} service rejected the request: {message}")]
    UpstreamRejected { stage: Stage, message: String },

    /// In-flight run superseded by a newer submission. Discarded silently by
    /// callers, never shown to the user as a failure.
    #[error("run {0} superseded by a newer submission")]
    StaleRun(u64),

    #[error("no committed analysis for this user")]
    NoAnalysis,

    #[error("Store error: {0}")]
    StoreError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PipelineError {
    /// Stage attribution for upstream failures, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::UpstreamUnavailable { stage, .. }
            | PipelineError::UpstreamRejected { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Stale-run results are discarded, not surfaced as user errors
    pub fn is_stale(&self) -> bool {
        matches!(self, PipelineError::StaleRun(_))
    }
}
