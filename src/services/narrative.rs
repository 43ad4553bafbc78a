//! Gemini-backed narrative service
//!
//! Generates the "Money Matters" podcast script for a committed analysis.
//! The script is generated once, in English; per-language delivery is the
//! audio stage's concern. Uses a long-lived reqwest::Client for connection
//! pooling.

use crate::error::{PipelineError, Stage};
use crate::models::{DerivedMetrics, FinancialSnapshot, PredictionResult};
use crate::services::NarrativeService;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

pub struct GeminiNarrativeService {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiNarrativeService {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".to_string(),
        }
    }
}

#[async_trait]
impl NarrativeService for GeminiNarrativeService {
    async fn generate(
        &self,
        snapshot: &FinancialSnapshot,
        prediction: &PredictionResult,
        metrics: &DerivedMetrics,
    ) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(PipelineError::UpstreamUnavailable {
                stage: Stage::Narrative,
                message: "GEMINI_API_KEY not configured".to_string(),
            });
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_podcast_prompt(snapshot, prediction, metrics),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 1.0,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 2048,
            },
        };

        info!("Calling narrative service");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Narrative request failed: {}", e);
                PipelineError::UpstreamUnavailable {
                    stage: Stage::Narrative,
                    message: e.to_string(),
                }
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Narrative service error response: {}", error_text);
            return Err(PipelineError::UpstreamUnavailable {
                stage: Stage::Narrative,
                message: error_text,
            });
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            PipelineError::UpstreamUnavailable {
                stage: Stage::Narrative,
                message: format!("malformed response: {}", e),
            }
        })?;

        let Some(candidate) = gemini_response.candidates.first() else {
            return Err(PipelineError::UpstreamRejected {
                stage: Stage::Narrative,
                message: "no candidates returned".to_string(),
            });
        };

        // SAFETY finishes mean the model declined to write the script
        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(PipelineError::UpstreamRejected {
                stage: Stage::Narrative,
                message: "content generation refused".to_string(),
            });
        }

        let script = candidate
            .content
            .parts
            .first()
            .map(|p| p.text.clone())
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| PipelineError::UpstreamRejected {
                stage: Stage::Narrative,
                message: "empty script".to_string(),
            })?;

        info!(script_len = script.len(), "Narrative script received");

        Ok(script)
    }
}

/// The podcast-host prompt: profile figures, the per-category potential
/// savings the model found, and instructions for tone and structure.
fn build_podcast_prompt(
    snapshot: &FinancialSnapshot,
    prediction: &PredictionResult,
    metrics: &DerivedMetrics,
) -> String {
    let savings_lines: String = metrics
        .potential_savings
        .iter()
        .map(|s| format!("- **{}**: ${:.2}\n", s.category.display_name(), s.amount))
        .collect();

    let health_score = prediction
        .financial_health_score
        .map(|score| format!("{:.0}", score))
        .unwrap_or_else(|| "derive one from savings consistency".to_string());
    let cluster = prediction
        .cluster
        .map(|c| c.to_string())
        .unwrap_or_else(|| "assign 1, 2 or 3 based on savings".to_string());

    format!(
        r#"You are a podcast host for "Money Matters", a personal finance show. Write a ~2-minute episode in the style below:

Start with:
- Host intro: Welcome listener, age {age}, earning ${income}, with ${disposable} disposable income, aiming to save ${desired}.
- Say: "Our ML analysis revealed the following potential monthly savings:"

Insert:
{savings_lines}
Then explain:
- If savings are erratic or inconsistent, say that
- Mention their Financial Health Score: {health_score}
- Mention their Cluster Group: {cluster}

Finally:
- List 3 to 5 practical, customized tips based on their situation. Always include tips about starting a SIP or investing in mutual funds or stocks.
- End with a motivational send-off.

Use clear, friendly tone. Markdown formatting: **bold** for host statements."#,
        age = snapshot.age,
        income = snapshot.income,
        disposable = snapshot.disposable_income,
        desired = snapshot.desired_savings,
        savings_lines = savings_lines,
        health_score = health_score,
        cluster = cluster,
    )
}

/// Deterministic spoken-analysis message. Used by the scripted mock and as
/// the fallback narrative when no LLM is configured.
pub fn build_analysis_message(snapshot: &FinancialSnapshot, metrics: &DerivedMetrics) -> String {
    let mut message = String::from("Based on your financial data: ");
    message.push_str(&format!(
        "Your monthly income is ${:.2}. Your total expenses amount to ${:.2}. ",
        snapshot.income, metrics.total_expenses
    ));

    if snapshot.income > 0.0 {
        if metrics.total_expenses > snapshot.income {
            message.push_str(&format!(
                "Warning: Your expenses exceed your income by ${:.2}. ",
                metrics.total_expenses - snapshot.income
            ));
        } else {
            message.push_str(&format!(
                "You're saving ${:.2} per month, which is a {:.1}% savings rate. ",
                metrics.total_saving, metrics.savings_rate
            ));
        }
    }

    if snapshot.desired_savings > 0.0 {
        if metrics.shortfall == 0.0 {
            message.push_str(&format!(
                "Great job! You're meeting your desired savings goal of ${:.2}. ",
                snapshot.desired_savings
            ));
        } else {
            message.push_str(&format!(
                "You're ${:.2} short of your desired savings goal. ",
                metrics.shortfall
            ));
        }
    }

    if !metrics.top_expenses.is_empty() {
        let listed: Vec<String> = metrics
            .top_expenses
            .iter()
            .map(|e| format!("{} (${:.2})", e.category.display_name(), e.amount))
            .collect();
        message.push_str(&format!("Your top expenses are: {}. ", listed.join(", ")));
    }

    if snapshot.disposable_income > 0.0 {
        message.push_str(&format!(
            "You have ${:.2} available as disposable income. ",
            snapshot.disposable_income
        ));
    } else {
        message.push_str("Consider reviewing your expenses as you have little disposable income.");
    }

    message
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}
