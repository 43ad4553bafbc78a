//! HTTP-backed speech synthesis adapter
//!
//! Sends the narrative text and a language code to the TTS endpoint and
//! returns a playable-audio reference. Translation into the requested
//! language happens behind this boundary; the script itself stays English.

use crate::error::{PipelineError, Stage};
use crate::models::{AudioArtifact, Language, NarrativeScript};
use crate::services::AudioService;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{error, info};

/// TTS voice selector per language
fn voice_for(language: Language) -> &'static str {
    match language {
        Language::En => "en-US",
        Language::Hi => "hi-IN",
        Language::Kn => "kn-IN",
    }
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    language_code: &'a str,
    voice: &'static str,
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    audio_url: String,
}

pub struct HttpSpeechService {
    client: Client,
    base_url: String,
}

impl HttpSpeechService {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Endpoint from SPEECH_API_BASE_URL
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("SPEECH_API_BASE_URL").ok()?;
        Some(Self::new(base_url))
    }
}

#[async_trait]
impl AudioService for HttpSpeechService {
    async fn synthesize(
        &self,
        narrative: &NarrativeScript,
        language: Language,
    ) -> Result<AudioArtifact> {
        let url = format!("{}/synthesize", self.base_url);

        info!(language = %language, "Calling speech service");

        let request = SynthesisRequest {
            text: &narrative.text,
            language_code: language.code(),
            voice: voice_for(language),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Speech request failed: {}", e);
                PipelineError::UpstreamUnavailable {
                    stage: Stage::Audio,
                    message: e.to_string(),
                }
            })?;

        let status = response.status();
        if status.is_client_error() {
            // Typically an unsupported language for the chosen voice
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::UpstreamRejected {
                stage: Stage::Audio,
                message: format!("{}: {}", status, body),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::UpstreamUnavailable {
                stage: Stage::Audio,
                message: format!("{}: {}", status, body),
            });
        }

        let synthesis: SynthesisResponse = response.json().await.map_err(|e| {
            PipelineError::UpstreamUnavailable {
                stage: Stage::Audio,
                message: format!("malformed response: {}", e),
            }
        })?;

        info!(language = %language, location = %synthesis.audio_url, "Audio synthesized");

        Ok(AudioArtifact {
            location: synthesis.audio_url,
            language,
            synthesized_at: Utc::now(),
        })
    }
}
