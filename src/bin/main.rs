use financial_insight_orchestrator::{
    models::Language,
    orchestrator::InsightOrchestrator,
    services::{MockAudioService, MockPredictionService, ScriptedNarrativeService},
    store::{InMemoryRepository, SnapshotStore},
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Financial Insight Pipeline starting");

    // Create the pipeline against mock services
    let store = SnapshotStore::new(Box::new(InMemoryRepository::new()));
    let orchestrator = InsightOrchestrator::new(
        Arc::new(MockPredictionService::new()),
        Arc::new(ScriptedNarrativeService),
        Arc::new(MockAudioService),
        store,
    );

    let user_id = Uuid::new_v4();

    // A sample financial profile, as a form would submit it
    let form = json!({
        "Income": "50000",
        "Age": "29",
        "Dependents": "1",
        "Disposable_Income": "10000",
        "Desired_Savings": "15000",
        "Occupation": "Salaried",
        "City_Tier": "Tier 2",
        "Groceries": "8000",
        "Transport": "2000",
        "Eating_Out": "1000",
        "Entertainment": "500",
        "Utilities": "1500",
        "Healthcare": "1000",
        "Education": "2000",
        "Miscellaneous": "500"
    });

    info!(user_id = ?user_id, "Running analysis");

    match orchestrator.analyze(user_id, form).await {
        Ok(bundle) => {
            println!("\n=== ANALYSIS RESULT ===");
            println!("Run: {}", bundle.run_id);
            println!("Total expenses: {:.2}", bundle.metrics.total_expenses);
            println!("Total saving: {:.2}", bundle.metrics.total_saving);
            println!("Savings rate: {:.1}%", bundle.metrics.savings_rate);
            println!("Shortfall: {:.2}", bundle.metrics.shortfall);
            println!("\nTop expenses:");
            for expense in &bundle.metrics.top_expenses {
                println!("  {}: {:.2}", expense.category, expense.amount);
            }
            println!("\nNarrative:\n{}", bundle.narrative.text);

            for language in [Language::En, Language::Hi] {
                let artifact = orchestrator.request_audio(user_id, language).await?;
                println!("\nAudio [{}]: {}", language, artifact.location);
            }

            Ok(())
        }
        Err(e) => {
            eprintln!("Analysis failed: {}", e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
