//! External service adapters
//!
//! The pipeline only owns the logical request/response shapes here; the
//! model, LLM and speech engines behind them are opaque. Each trait ships a
//! mock implementation so the system stays functional without network
//! dependencies.

use crate::models::{
    AudioArtifact, DerivedMetrics, FinancialSnapshot, Language, NarrativeScript, PredictionResult,
};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

pub mod audio;
pub mod narrative;
pub mod prediction;

pub use audio::HttpSpeechService;
pub use narrative::GeminiNarrativeService;
pub use prediction::HttpPredictionService;

/// Per-category recommended spending from the ML model
#[async_trait]
pub trait PredictionService: Send + Sync {
    async fn predict(&self, snapshot: &FinancialSnapshot) -> Result<PredictionResult>;
}

/// Natural-language podcast script generation
#[async_trait]
pub trait NarrativeService: Send + Sync {
    async fn generate(
        &self,
        snapshot: &FinancialSnapshot,
        prediction: &PredictionResult,
        metrics: &DerivedMetrics,
    ) -> Result<String>;
}

/// Speech synthesis for one narrative in one language
#[async_trait]
pub trait AudioService: Send + Sync {
    async fn synthesize(
        &self,
        narrative: &NarrativeScript,
        language: Language,
    ) -> Result<AudioArtifact>;
}

//
// ================= Mock implementations =================
//

/// Mock prediction: recommends spending a fixed fraction of the declared
/// amount in every category. Keeps the pipeline functional without a model.
pub struct MockPredictionService {
    pub spend_fraction: f64,
}

impl MockPredictionService {
    pub fn new() -> Self {
        Self { spend_fraction: 0.8 }
    }
}

impl Default for MockPredictionService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PredictionService for MockPredictionService {
    async fn predict(&self, snapshot: &FinancialSnapshot) -> Result<PredictionResult> {
        let mut prediction = PredictionResult {
            chosen_model: Some("mock-regressor".to_string()),
            cluster: Some(1),
            financial_health_score: Some(70.0),
            visual_hint: None,
            ..Default::default()
        };

        for (category, amount) in snapshot.expenses.iter() {
            prediction.predicted.set(category, amount * self.spend_fraction);
        }

        Ok(prediction)
    }
}

/// Mock narrative: the deterministic spoken-analysis message, assembled the
/// way the dashboard summary reads it out.
pub struct ScriptedNarrativeService;

#[async_trait]
impl NarrativeService for ScriptedNarrativeService {
    async fn generate(
        &self,
        snapshot: &FinancialSnapshot,
        _prediction: &PredictionResult,
        metrics: &DerivedMetrics,
    ) -> Result<String> {
        Ok(narrative::build_analysis_message(snapshot, metrics))
    }
}

/// Mock audio: fabricates a location without synthesizing anything
pub struct MockAudioService;

#[async_trait]
impl AudioService for MockAudioService {
    async fn synthesize(
        &self,
        narrative: &NarrativeScript,
        language: Language,
    ) -> Result<AudioArtifact> {
        Ok(AudioArtifact {
            location: format!("/audios/{}_{}_{}.mp3", narrative.script_id, language, Uuid::new_v4()),
            language,
            synthesized_at: Utc::now(),
        })
    }
}
