//! HTTP-backed prediction service adapter
//!
//! Posts the full snapshot to the model endpoint and maps its per-category
//! recommendations into a PredictionResult. Timeouts and retries are this
//! adapter's policy; the orchestrator sees every failure as a stage failure.

use crate::error::{PipelineError, Stage};
use crate::models::{FinancialSnapshot, PredictionResult};
use crate::services::PredictionService;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::env;
use std::time::Duration;
use tracing::{error, info};

pub struct HttpPredictionService {
    client: Client,
    base_url: String,
}

impl HttpPredictionService {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Endpoint from PREDICTION_API_BASE_URL
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("PREDICTION_API_BASE_URL").ok()?;
        Some(Self::new(base_url))
    }
}

#[async_trait]
impl PredictionService for HttpPredictionService {
    async fn predict(&self, snapshot: &FinancialSnapshot) -> Result<PredictionResult> {
        let url = format!("{}/analyze", self.base_url);

        info!("Calling prediction service");

        let response = self
            .client
            .post(&url)
            .json(snapshot)
            .send()
            .await
            .map_err(|e| {
                error!("Prediction request failed: {}", e);
                PipelineError::UpstreamUnavailable {
                    stage: Stage::Prediction,
                    message: e.to_string(),
                }
            })?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::UpstreamRejected {
                stage: Stage::Prediction,
                message: format!("{}: {}", status, body),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::UpstreamUnavailable {
                stage: Stage::Prediction,
                message: format!("{}: {}", status, body),
            });
        }

        let prediction: PredictionResult = response.json().await.map_err(|e| {
            error!("Malformed prediction response: {}", e);
            PipelineError::UpstreamUnavailable {
                stage: Stage::Prediction,
                message: format!("malformed response: {}", e),
            }
        })?;

        info!(
            chosen_model = ?prediction.chosen_model,
            cluster = ?prediction.cluster,
            "Prediction received"
        );

        Ok(prediction)
    }
}
