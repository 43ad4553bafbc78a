//! Financial Insight Pipeline
//!
//! Takes a user's raw financial profile and turns it into:
//! - model-predicted spending recommendations
//! - derived savings metrics and chart-ready datasets
//! - a generated podcast narrative
//! - per-language synthesized audio
//!
//! while staying coherent across re-submissions, language switches and
//! process restarts.
//!
//! PIPELINE:
//! SUBMIT → PREDICT → DERIVE → NARRATE → READY → (AUDIO per language)

pub mod api;
pub mod audio_cache;
pub mod charts;
pub mod error;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod store;

pub use error::{PipelineError, Result, Stage};

// Re-export common types
pub use models::*;
pub use orchestrator::{InsightOrchestrator, PipelineState};
