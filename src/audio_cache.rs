//! Audio artifact cache
//!
//! Maps (user, language) to the synthesized artifact for the user's current
//! narrative. The cache is cleared rather than versioned: the orchestrator
//! invalidates a user's entries before committing a new narrative, so a hit
//! always belongs to the narrative in the active bundle.

use crate::models::{AudioArtifact, Language};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub struct AudioCache {
    entries: Arc<RwLock<HashMap<Uuid, HashMap<Language, AudioArtifact>>>>,
}

impl AudioCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, user_id: Uuid, language: Language) -> Option<AudioArtifact> {
        let entries = self.entries.read().await;
        entries.get(&user_id).and_then(|langs| langs.get(&language)).cloned()
    }

    pub async fn put(&self, user_id: Uuid, language: Language, artifact: AudioArtifact) {
        let mut entries = self.entries.write().await;
        entries.entry(user_id).or_default().insert(language, artifact);
    }

    /// Evict every cached artifact for a user. Called whenever the user's
    /// narrative changes; stale audio must never outlive its script.
    pub async fn invalidate(&self, user_id: Uuid) {
        let mut entries = self.entries.write().await;
        if let Some(langs) = entries.remove(&user_id) {
            debug!(user_id = ?user_id, evicted = langs.len(), "Audio cache invalidated");
        }
    }

    pub async fn cached_languages(&self, user_id: Uuid) -> Vec<Language> {
        let entries = self.entries.read().await;
        entries
            .get(&user_id)
            .map(|langs| langs.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for AudioCache {
    fn default() -> Self {
        Self::new()
    }
}
