//! Analysis orchestrator - drives the insight pipeline
//!
//! SUBMIT → PREDICT → DERIVE → NARRATE → READY, with on-demand per-language
//! audio synthesis once a bundle is committed.
//!
//! Re-entrancy rule: every submission takes a fresh per-user run id and only
//! the most recently initiated run may commit. There is no cancellation of
//! in-flight service calls; a superseded run discovers it is stale at its
//! next checkpoint and discards its own results.

use crate::audio_cache::AudioCache;
use crate::charts;
use crate::error::{PipelineError, Stage};
use crate::metrics;
use crate::models::{AnalysisBundle, AudioArtifact, FinancialSnapshot, Language, NarrativeScript};
use crate::services::{AudioService, NarrativeService, PredictionService};
use crate::store::SnapshotStore;
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle state of one user's pipeline, exposed for polling callers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Predicting,
    Deriving,
    NarrativeGenerating,
    Ready,
    AudioSynthesizing { language: Language },
    Failed { stage: Stage, cause: String },
}

/// Coordinates the prediction, narrative and audio services and reconciles
/// their results into the snapshot store and audio cache.
pub struct InsightOrchestrator {
    prediction: Arc<dyn PredictionService>,
    narrative: Arc<dyn NarrativeService>,
    audio: Arc<dyn AudioService>,
    store: SnapshotStore,
    audio_cache: AudioCache,
    /// Latest initiated run per user; the write lock also serializes
    /// run-begin against commit, which is what makes last-submission-wins
    /// airtight rather than best-effort
    runs: RwLock<HashMap<Uuid, u64>>,
    states: RwLock<HashMap<Uuid, PipelineState>>,
}

impl InsightOrchestrator {
    pub fn new(
        prediction: Arc<dyn PredictionService>,
        narrative: Arc<dyn NarrativeService>,
        audio: Arc<dyn AudioService>,
        store: SnapshotStore,
    ) -> Self {
        Self {
            prediction,
            narrative,
            audio,
            store,
            audio_cache: AudioCache::new(),
            runs: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Run the full analysis pipeline for a raw form submission.
    ///
    /// Returns the committed bundle, or `StaleRun` if a newer submission
    /// superseded this one mid-flight. Callers should treat `StaleRun` as
    /// "discard quietly", not as a user-facing failure.
    pub async fn analyze(
        &self,
        user_id: Uuid,
        form: serde_json::Value,
    ) -> Result<AnalysisBundle> {
        // Reject malformed input before claiming a run id, so garbage never
        // supersedes a legitimate in-flight submission
        let snapshot = FinancialSnapshot::from_form(form)?;

        let run_id = self.begin_run(user_id).await;

        info!(
            user_id = ?user_id,
            run_id = run_id,
            income = snapshot.income,
            "Orchestrator: starting analysis run"
        );

        // === PREDICT ===
        self.set_state(user_id, PipelineState::Predicting).await;

        let prediction = match self.prediction.predict(&snapshot).await {
            Ok(prediction) => prediction,
            Err(e) => return self.fail(user_id, run_id, Stage::Prediction, e).await,
        };
        self.ensure_current(user_id, run_id).await?;

        // === DERIVE ===
        // Synchronous and total: the deriver and chart builder cannot fail
        self.set_state(user_id, PipelineState::Deriving).await;
        let derived = metrics::derive(&snapshot, &prediction);
        let chart_data = charts::build_datasets(&snapshot, &prediction);

        debug!(
            user_id = ?user_id,
            run_id = run_id,
            total_expenses = derived.total_expenses,
            savings_rate = derived.savings_rate,
            "Metrics derived"
        );

        // === NARRATE ===
        self.set_state(user_id, PipelineState::NarrativeGenerating).await;

        let script_text = match self.narrative.generate(&snapshot, &prediction, &derived).await {
            Ok(text) => text,
            Err(e) => return self.fail(user_id, run_id, Stage::Narrative, e).await,
        };

        let bundle = AnalysisBundle {
            user_id,
            run_id,
            snapshot,
            prediction,
            metrics: derived,
            charts: chart_data,
            narrative: NarrativeScript::new(script_text),
            committed_at: Utc::now(),
        };

        // === COMMIT ===
        // Holding the run-map read lock across the commit blocks begin_run,
        // so no newer run can start between the staleness check and the
        // store write. Cached audio belongs to the previous narrative and
        // is evicted first.
        {
            let runs = self.runs.read().await;
            if runs.get(&user_id) != Some(&run_id) {
                debug!(user_id = ?user_id, run_id = run_id, "Run superseded; discarding results");
                return Err(PipelineError::StaleRun(run_id));
            }

            self.audio_cache.invalidate(user_id).await;
            self.store.commit(bundle.clone()).await?;
            self.set_state(user_id, PipelineState::Ready).await;
        }

        info!(user_id = ?user_id, run_id = run_id, "Analysis committed");

        Ok(bundle)
    }

    /// Fetch (or synthesize) audio for the current narrative in one
    /// language. A cached artifact is returned without a new synthesis
    /// request; distinct languages may synthesize concurrently.
    pub async fn request_audio(
        &self,
        user_id: Uuid,
        language: Language,
    ) -> Result<AudioArtifact> {
        let bundle = self
            .store
            .current(user_id)
            .await
            .ok_or(PipelineError::NoAnalysis)?;

        if let Some(artifact) = self.audio_cache.get(user_id, language).await {
            debug!(user_id = ?user_id, language = %language, "Audio cache hit");
            return Ok(artifact);
        }

        self.set_state(user_id, PipelineState::AudioSynthesizing { language })
            .await;

        let artifact = match self.audio.synthesize(&bundle.narrative, language).await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(user_id = ?user_id, language = %language, error = %e, "Audio synthesis failed");
                self.set_state(
                    user_id,
                    PipelineState::Failed {
                        stage: Stage::Audio,
                        cause: e.to_string(),
                    },
                )
                .await;
                return Err(e);
            }
        };

        // If a newer bundle committed while we were synthesizing, this
        // artifact voices a retired narrative: hand it back but keep it out
        // of the cache, which must only hold audio for the active script
        let still_current = self
            .store
            .current(user_id)
            .await
            .map(|b| b.narrative.script_id == bundle.narrative.script_id)
            .unwrap_or(false);

        if still_current {
            self.audio_cache.put(user_id, language, artifact.clone()).await;
            self.set_state(user_id, PipelineState::Ready).await;
        } else {
            debug!(user_id = ?user_id, language = %language, "Narrative changed during synthesis; not caching");
        }

        Ok(artifact)
    }

    /// Reload a user's persisted bundle after a restart
    pub async fn restore(&self, user_id: Uuid) -> Result<Option<AnalysisBundle>> {
        let restored = self.store.restore(user_id).await?;
        if restored.is_some() {
            self.set_state(user_id, PipelineState::Ready).await;
        }
        Ok(restored)
    }

    /// The committed bundle, if any
    pub async fn current(&self, user_id: Uuid) -> Option<AnalysisBundle> {
        self.store.current(user_id).await
    }

    /// Lifecycle state for polling; Idle when the user has never submitted
    pub async fn state(&self, user_id: Uuid) -> PipelineState {
        let states = self.states.read().await;
        states.get(&user_id).cloned().unwrap_or(PipelineState::Idle)
    }

    async fn begin_run(&self, user_id: Uuid) -> u64 {
        let mut runs = self.runs.write().await;
        let run_id = runs.entry(user_id).or_insert(0);
        *run_id += 1;
        *run_id
    }

    async fn ensure_current(&self, user_id: Uuid, run_id: u64) -> Result<()> {
        let runs = self.runs.read().await;
        if runs.get(&user_id) == Some(&run_id) {
            Ok(())
        } else {
            debug!(user_id = ?user_id, run_id = run_id, "Run superseded; discarding results");
            Err(PipelineError::StaleRun(run_id))
        }
    }

    async fn set_state(&self, user_id: Uuid, state: PipelineState) {
        let mut states = self.states.write().await;
        states.insert(user_id, state);
    }

    /// Record a stage failure, leaving the last committed bundle untouched.
    /// A stale run's failure is not recorded; its state belongs to the run
    /// that superseded it.
    async fn fail<T>(
        &self,
        user_id: Uuid,
        run_id: u64,
        stage: Stage,
        error: PipelineError,
    ) -> Result<T> {
        let is_current = {
            let runs = self.runs.read().await;
            runs.get(&user_id) == Some(&run_id)
        };

        if is_current {
            warn!(user_id = ?user_id, run_id = run_id, stage = %stage, error = %error, "Pipeline stage failed");
            self.set_state(
                user_id,
                PipelineState::Failed {
                    stage,
                    cause: error.to_string(),
                },
            )
            .await;
        }

        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DerivedMetrics, PredictionResult};
    use crate::services::{MockAudioService, MockPredictionService, ScriptedNarrativeService};
    use crate::store::InMemoryRepository;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn sample_form(income: f64) -> serde_json::Value {
        json!({
            "Income": income,
            "Age": 30,
            "Disposable_Income": 10000,
            "Desired_Savings": 15000,
            "Groceries": 8000,
            "Transport": 2000,
            "Eating_Out": 1000,
            "Entertainment": 500,
            "Utilities": 1500,
            "Healthcare": 1000,
            "Education": 2000,
            "Miscellaneous": 500
        })
    }

    fn orchestrator_with(
        prediction: Arc<dyn PredictionService>,
        narrative: Arc<dyn NarrativeService>,
        audio: Arc<dyn AudioService>,
    ) -> InsightOrchestrator {
        InsightOrchestrator::new(
            prediction,
            narrative,
            audio,
            SnapshotStore::new(Box::new(InMemoryRepository::new())),
        )
    }

    fn default_orchestrator() -> InsightOrchestrator {
        orchestrator_with(
            Arc::new(MockPredictionService::new()),
            Arc::new(ScriptedNarrativeService),
            Arc::new(MockAudioService),
        )
    }

    /// Prediction mock with a queue of per-call delays, for staleness races
    struct QueuedDelayPrediction {
        delays_ms: Vec<u64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PredictionService for QueuedDelayPrediction {
        async fn predict(&self, snapshot: &FinancialSnapshot) -> Result<PredictionResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delays_ms.get(call).copied().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            MockPredictionService::new().predict(snapshot).await
        }
    }

    /// Narrative mock that fails every call after the first
    struct FlakyNarrative {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NarrativeService for FlakyNarrative {
        async fn generate(
            &self,
            snapshot: &FinancialSnapshot,
            prediction: &PredictionResult,
            metrics: &DerivedMetrics,
        ) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                ScriptedNarrativeService
                    .generate(snapshot, prediction, metrics)
                    .await
            } else {
                Err(PipelineError::UpstreamUnavailable {
                    stage: Stage::Narrative,
                    message: "llm down".to_string(),
                })
            }
        }
    }

    /// Audio mock counting real synthesis requests
    struct CountingAudio {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AudioService for CountingAudio {
        async fn synthesize(
            &self,
            narrative: &NarrativeScript,
            language: Language,
        ) -> Result<AudioArtifact> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AudioArtifact {
                location: format!("/audios/{}_{}_{}.mp3", narrative.script_id, language, call),
                language,
                synthesized_at: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn test_full_pipeline_commits_ready_bundle() {
        let orchestrator = default_orchestrator();
        let user_id = Uuid::new_v4();

        let bundle = orchestrator.analyze(user_id, sample_form(50000.0)).await.unwrap();

        assert_eq!(bundle.run_id, 1);
        assert_eq!(bundle.metrics.total_expenses, 16500.0);
        assert_eq!(bundle.metrics.total_saving, 10000.0);
        assert!(!bundle.narrative.text.is_empty());
        assert_eq!(bundle.charts.spending_distribution.points.len(), 8);

        assert_eq!(orchestrator.current(user_id).await.unwrap(), bundle);
        assert_eq!(orchestrator.state(user_id).await, PipelineState::Ready);
    }

    #[tokio::test]
    async fn test_invalid_enum_rejected_without_claiming_a_run() {
        let orchestrator = default_orchestrator();
        let user_id = Uuid::new_v4();

        let err = orchestrator
            .analyze(user_id, json!({ "Income": 1000, "Occupation": "Pirate" }))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InputInvalid(_)));
        assert_eq!(orchestrator.state(user_id).await, PipelineState::Idle);

        // Next valid submission is run 1: the rejected form never counted
        let bundle = orchestrator.analyze(user_id, sample_form(1000.0)).await.unwrap();
        assert_eq!(bundle.run_id, 1);
    }

    #[tokio::test]
    async fn test_stale_run_never_overwrites_newer_commit() {
        let orchestrator = Arc::new(orchestrator_with(
            Arc::new(QueuedDelayPrediction {
                delays_ms: vec![300, 0],
                calls: AtomicUsize::new(0),
            }),
            Arc::new(ScriptedNarrativeService),
            Arc::new(MockAudioService),
        ));
        let user_id = Uuid::new_v4();

        // Run A: slow prediction
        let slow = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.analyze(user_id, sample_form(11111.0)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Run B: submitted later, resolves first, commits
        let fast = orchestrator.analyze(user_id, sample_form(22222.0)).await.unwrap();
        assert_eq!(fast.run_id, 2);

        // Run A resolves after B committed and must be discarded
        let stale = slow.await.unwrap();
        assert!(matches!(stale, Err(PipelineError::StaleRun(1))));

        let committed = orchestrator.current(user_id).await.unwrap();
        assert_eq!(committed.run_id, 2);
        assert_eq!(committed.snapshot.income, 22222.0);
        assert_eq!(orchestrator.state(user_id).await, PipelineState::Ready);
    }

    #[tokio::test]
    async fn test_repeated_audio_request_reuses_cached_artifact() {
        let audio = Arc::new(CountingAudio {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = orchestrator_with(
            Arc::new(MockPredictionService::new()),
            Arc::new(ScriptedNarrativeService),
            audio.clone(),
        );
        let user_id = Uuid::new_v4();

        orchestrator.analyze(user_id, sample_form(50000.0)).await.unwrap();

        let first = orchestrator.request_audio(user_id, Language::En).await.unwrap();
        let second = orchestrator.request_audio(user_id, Language::En).await.unwrap();

        assert_eq!(audio.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.location, second.location);
    }

    #[tokio::test]
    async fn test_recommit_evicts_cached_audio() {
        let audio = Arc::new(CountingAudio {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = orchestrator_with(
            Arc::new(MockPredictionService::new()),
            Arc::new(ScriptedNarrativeService),
            audio.clone(),
        );
        let user_id = Uuid::new_v4();

        orchestrator.analyze(user_id, sample_form(50000.0)).await.unwrap();
        orchestrator.request_audio(user_id, Language::En).await.unwrap();
        orchestrator.request_audio(user_id, Language::Hi).await.unwrap();
        assert_eq!(orchestrator.audio_cache.cached_languages(user_id).await.len(), 2);

        // New submission replaces the narrative; every artifact is stale
        orchestrator.analyze(user_id, sample_form(60000.0)).await.unwrap();
        for language in Language::ALL {
            assert!(orchestrator.audio_cache.get(user_id, language).await.is_none());
        }

        // A fresh request synthesizes against the new narrative
        orchestrator.request_audio(user_id, Language::En).await.unwrap();
        assert_eq!(audio.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_distinct_languages_synthesize_concurrently() {
        let orchestrator = Arc::new(default_orchestrator());
        let user_id = Uuid::new_v4();
        orchestrator.analyze(user_id, sample_form(50000.0)).await.unwrap();

        let (en, hi, kn) = tokio::join!(
            orchestrator.request_audio(user_id, Language::En),
            orchestrator.request_audio(user_id, Language::Hi),
            orchestrator.request_audio(user_id, Language::Kn),
        );

        assert_eq!(en.unwrap().language, Language::En);
        assert_eq!(hi.unwrap().language, Language::Hi);
        assert_eq!(kn.unwrap().language, Language::Kn);
        assert_eq!(orchestrator.audio_cache.cached_languages(user_id).await.len(), 3);
    }

    #[tokio::test]
    async fn test_stage_failure_preserves_last_committed_bundle() {
        let orchestrator = orchestrator_with(
            Arc::new(MockPredictionService::new()),
            Arc::new(FlakyNarrative {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(MockAudioService),
        );
        let user_id = Uuid::new_v4();

        let first = orchestrator.analyze(user_id, sample_form(50000.0)).await.unwrap();

        // Second run fails at the narrative stage
        let err = orchestrator.analyze(user_id, sample_form(60000.0)).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Narrative));

        // Last-known-good bundle is untouched and resubmission stays open
        assert_eq!(orchestrator.current(user_id).await.unwrap(), first);
        assert!(matches!(
            orchestrator.state(user_id).await,
            PipelineState::Failed { stage: Stage::Narrative, .. }
        ));
    }

    #[tokio::test]
    async fn test_audio_without_committed_analysis() {
        let orchestrator = default_orchestrator();
        let err = orchestrator
            .request_audio(Uuid::new_v4(), Language::En)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoAnalysis));
    }
}
