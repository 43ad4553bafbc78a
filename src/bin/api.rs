use financial_insight_orchestrator::{
    api::start_server,
    orchestrator::InsightOrchestrator,
    services::{
        AudioService, GeminiNarrativeService, HttpPredictionService, HttpSpeechService,
        MockAudioService, MockPredictionService, NarrativeService, PredictionService,
        ScriptedNarrativeService,
    },
    store::{FileRepository, SnapshotStore},
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Financial Insight Pipeline - API Server");
    info!("Port: {}", api_port);

    // Each external service falls back to its mock when unconfigured, so
    // the server always comes up in development
    let prediction: Arc<dyn PredictionService> = match HttpPredictionService::from_env() {
        Some(service) => Arc::new(service),
        None => {
            warn!("PREDICTION_API_BASE_URL not set; using mock prediction service");
            Arc::new(MockPredictionService::new())
        }
    };

    let narrative: Arc<dyn NarrativeService> = match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.is_empty() => Arc::new(GeminiNarrativeService::new(key)),
        _ => {
            warn!("GEMINI_API_KEY not set; using scripted narrative service");
            Arc::new(ScriptedNarrativeService)
        }
    };

    let audio: Arc<dyn AudioService> = match HttpSpeechService::from_env() {
        Some(service) => Arc::new(service),
        None => {
            warn!("SPEECH_API_BASE_URL not set; using mock audio service");
            Arc::new(MockAudioService)
        }
    };

    let store = SnapshotStore::new(Box::new(FileRepository::from_env()));
    let orchestrator = Arc::new(InsightOrchestrator::new(prediction, narrative, audio, store));

    info!("Pipeline initialized");
    info!("Starting API server...");

    start_server(orchestrator, api_port).await?;

    Ok(())
}
