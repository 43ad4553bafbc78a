//! Snapshot store
//!
//! Holds the active analysis bundle per user and writes it through a durable
//! backend so a restored bundle is field-for-field equal to what was
//! committed before a restart. Last writer wins by orchestrator sequencing,
//! not store-level locking.

use crate::error::PipelineError;
use crate::models::AnalysisBundle;
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Durable persistence for analysis bundles, keyed by user identity
#[async_trait::async_trait]
pub trait BundleRepository: Send + Sync {
    async fn save(&self, bundle: &AnalysisBundle) -> Result<()>;
    async fn load(&self, user_id: Uuid) -> Result<Option<AnalysisBundle>>;
    async fn delete(&self, user_id: Uuid) -> Result<()>;
}

/// Compute SHA256 over the bundle's JSON for persistence integrity checks.
/// Streams serialization directly into the hasher.
pub fn compute_bundle_hash(bundle: &AnalysisBundle) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), bundle).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// On-disk envelope: bundle plus the hash it carried when written
#[derive(Debug, Serialize, Deserialize)]
struct PersistedBundle {
    content_hash: String,
    bundle: AnalysisBundle,
}

//
// ================= In-memory repository =================
//

/// Volatile repository for tests and the demo binary
pub struct InMemoryRepository {
    bundles: Arc<RwLock<HashMap<Uuid, AnalysisBundle>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            bundles: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BundleRepository for InMemoryRepository {
    async fn save(&self, bundle: &AnalysisBundle) -> Result<()> {
        let mut bundles = self.bundles.write().await;
        bundles.insert(bundle.user_id, bundle.clone());
        Ok(())
    }

    async fn load(&self, user_id: Uuid) -> Result<Option<AnalysisBundle>> {
        let bundles = self.bundles.read().await;
        Ok(bundles.get(&user_id).cloned())
    }

    async fn delete(&self, user_id: Uuid) -> Result<()> {
        let mut bundles = self.bundles.write().await;
        bundles.remove(&user_id);
        Ok(())
    }
}

//
// ================= File repository =================
//

/// JSON file-per-user repository. Writes go to a temp file first and are
/// renamed into place so a crashed write never leaves a torn bundle.
pub struct FileRepository {
    root: PathBuf,
}

impl FileRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory from BUNDLE_STORE_DIR, defaulting to ./bundles
    pub fn from_env() -> Self {
        let root = std::env::var("BUNDLE_STORE_DIR").unwrap_or_else(|_| "bundles".to_string());
        Self::new(root)
    }

    fn path_for(&self, user_id: Uuid) -> PathBuf {
        self.root.join(format!("{}.json", user_id))
    }
}

#[async_trait::async_trait]
impl BundleRepository for FileRepository {
    async fn save(&self, bundle: &AnalysisBundle) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        let persisted = PersistedBundle {
            content_hash: compute_bundle_hash(bundle),
            bundle: bundle.clone(),
        };
        let payload = serde_json::to_vec_pretty(&persisted)?;

        let path = self.path_for(bundle.user_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &payload).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(user_id = ?bundle.user_id, path = ?path, "Bundle persisted");
        Ok(())
    }

    async fn load(&self, user_id: Uuid) -> Result<Option<AnalysisBundle>> {
        let path = self.path_for(user_id);

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let persisted: PersistedBundle = serde_json::from_slice(&raw)
            .map_err(|e| PipelineError::StoreError(format!("corrupt bundle file: {}", e)))?;

        if compute_bundle_hash(&persisted.bundle) != persisted.content_hash {
            warn!(user_id = ?user_id, "Persisted bundle failed integrity check; ignoring");
            return Ok(None);
        }

        Ok(Some(persisted.bundle))
    }

    async fn delete(&self, user_id: Uuid) -> Result<()> {
        let path = self.path_for(user_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

//
// ================= Snapshot store =================
//

/// Active bundle per user, backed by a durable repository
pub struct SnapshotStore {
    active: Arc<RwLock<HashMap<Uuid, AnalysisBundle>>>,
    repository: Box<dyn BundleRepository>,
}

impl SnapshotStore {
    pub fn new(repository: Box<dyn BundleRepository>) -> Self {
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            repository,
        }
    }

    /// Replace the active bundle for its user atomically, then write it
    /// through the durable backend.
    pub async fn commit(&self, bundle: AnalysisBundle) -> Result<()> {
        {
            let mut active = self.active.write().await;
            active.insert(bundle.user_id, bundle.clone());
        }

        self.repository.save(&bundle).await?;

        debug!(
            user_id = ?bundle.user_id,
            run_id = bundle.run_id,
            "Bundle committed"
        );
        Ok(())
    }

    /// The active bundle for a user, if any
    pub async fn current(&self, user_id: Uuid) -> Option<AnalysisBundle> {
        let active = self.active.read().await;
        active.get(&user_id).cloned()
    }

    /// Load the persisted bundle back into the active map after a restart.
    /// Returns the restored bundle if one survived.
    pub async fn restore(&self, user_id: Uuid) -> Result<Option<AnalysisBundle>> {
        let Some(bundle) = self.repository.load(user_id).await? else {
            return Ok(None);
        };

        let mut active = self.active.write().await;
        active.insert(user_id, bundle.clone());
        Ok(Some(bundle))
    }

    /// Drop the active and persisted bundle for a user
    pub async fn clear(&self, user_id: Uuid) -> Result<()> {
        {
            let mut active = self.active.write().await;
            active.remove(&user_id);
        }
        self.repository.delete(user_id).await
    }
}
