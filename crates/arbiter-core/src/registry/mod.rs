//! Durable model version registry.
//!
//! The registry is the single writer of the `active` flag and enforces the
//! invariant that at most one version per model name is active at any
//! time. Promotion (register) swaps the active flag atomically under a
//! per-model lock and persists the whole version list in one write.

use crate::config::RegistryConfig;
use crate::storage::{Repository, StorageError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Identifier for a registered model version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionId(pub String);

impl VersionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Performance metrics captured at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationMetrics {
    /// Held-out accuracy of the candidate.
    pub accuracy: f64,
    /// F1 score, when the task is classification.
    pub f1: Option<f64>,
    /// Mean inference latency observed during evaluation.
    pub mean_latency_ms: Option<f64>,
}

/// A registered model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    /// Unique version id.
    pub version_id: VersionId,
    /// Model name this version belongs to.
    pub model_name: String,
    /// Where the artifact lives (path, URI — opaque to the registry).
    pub artifact_location: String,
    /// Metrics at registration.
    pub metrics: RegistrationMetrics,
    /// Audit score the candidate carried at registration.
    pub audit_score: f64,
    /// Whether this version currently serves traffic.
    pub active: bool,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// When this version stopped being active, if ever.
    pub retired_at: Option<DateTime<Utc>>,
}

/// Errors that can occur in registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Storage layer failure.
    #[error("Registry storage error: {0}")]
    Storage(#[from] StorageError),

    /// Manifest on disk did not match the expected schema.
    #[error("Registry manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// The candidate did not clear the acceptance bar.
    #[error("Version {version_id} for '{model_name}' rejected: {reason}")]
    RejectedByGate {
        /// Model the candidate belonged to.
        model_name: String,
        /// Id the rejected version was stored under (inactive, for audit).
        version_id: VersionId,
        /// Which gate failed.
        reason: String,
    },

    /// Two active versions were found for one model name. Promotion is
    /// halted for that name until manually reconciled.
    #[error("Registry corrupt for '{0}': multiple active versions")]
    Corrupt(String),

    /// No such model name.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// No such version under the given model name.
    #[error("Unknown version {version_id} for model '{model_name}'")]
    UnknownVersion {
        /// Model name that was queried.
        model_name: String,
        /// Version id that was not found.
        version_id: VersionId,
    },
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Per-model registry state, guarded by its own lock.
#[derive(Debug, Default)]
struct ModelEntry {
    versions: Vec<ModelVersion>,
    corrupt: bool,
}

impl ModelEntry {
    fn active(&self) -> Option<&ModelVersion> {
        self.versions.iter().find(|v| v.active)
    }
}

/// Durable catalogue of model versions with a single-active invariant.
pub struct ModelRegistry {
    repo: Arc<dyn Repository>,
    config: RegistryConfig,
    /// Map lock only guards the map shape; each model has its own lock so
    /// unrelated models never serialize on each other.
    entries: RwLock<HashMap<String, Arc<tokio::sync::Mutex<ModelEntry>>>>,
}

impl ModelRegistry {
    /// Opens the registry, loading all persisted manifests.
    ///
    /// A model name with more than one active version is flagged corrupt;
    /// promotion for that name fails until [`ModelRegistry::reconcile`]
    /// runs.
    pub fn open(repo: Arc<dyn Repository>, config: RegistryConfig) -> Result<Self> {
        let mut entries = HashMap::new();
        for key in repo.list("registry/")? {
            let Some(model_name) = key.strip_prefix("registry/") else { continue };
            let Some(value) = repo.get(&key)? else { continue };
            let versions: Vec<ModelVersion> = serde_json::from_value(value)?;
            let active_count = versions.iter().filter(|v| v.active).count();
            let corrupt = active_count > 1;
            if corrupt {
                warn!(
                    model = model_name,
                    active_count, "Registry corruption detected, promotion halted for model"
                );
            }
            entries.insert(
                model_name.to_string(),
                Arc::new(tokio::sync::Mutex::new(ModelEntry { versions, corrupt })),
            );
        }
        Ok(Self { repo, config, entries: RwLock::new(entries) })
    }

    fn entry(&self, model_name: &str) -> Arc<tokio::sync::Mutex<ModelEntry>> {
        {
            let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(entry) = entries.get(model_name) {
                return Arc::clone(entry);
            }
        }
        let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(entries.entry(model_name.to_string()).or_default())
    }

    fn existing_entry(&self, model_name: &str) -> Option<Arc<tokio::sync::Mutex<ModelEntry>>> {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.get(model_name).map(Arc::clone)
    }

    fn persist(&self, model_name: &str, entry: &ModelEntry) -> Result<()> {
        let value = serde_json::to_value(&entry.versions)?;
        self.repo.put(&format!("registry/{model_name}"), &value)?;
        Ok(())
    }

    /// Registers a new model version.
    ///
    /// If the candidate clears the acceptance bar it becomes the active
    /// version and any previously active version is retired in the same
    /// critical section; otherwise it is stored inactive for the audit
    /// trail and `RejectedByGate` is returned.
    pub async fn register(
        &self,
        model_name: &str,
        artifact_location: &str,
        metrics: RegistrationMetrics,
        audit_score: f64,
    ) -> Result<VersionId> {
        let entry = self.entry(model_name);
        let mut entry = entry.lock().await;
        if entry.corrupt {
            return Err(RegistryError::Corrupt(model_name.to_string()));
        }

        let gate_failure = if metrics.accuracy < self.config.min_accuracy {
            Some(format!(
                "accuracy {:.3} below acceptance bar {:.3}",
                metrics.accuracy, self.config.min_accuracy
            ))
        } else if audit_score < self.config.min_audit_score {
            Some(format!(
                "audit score {:.3} below acceptance bar {:.3}",
                audit_score, self.config.min_audit_score
            ))
        } else {
            None
        };

        let version_id = VersionId::new();
        let now = Utc::now();
        let version = ModelVersion {
            version_id: version_id.clone(),
            model_name: model_name.to_string(),
            artifact_location: artifact_location.to_string(),
            metrics,
            audit_score,
            active: gate_failure.is_none(),
            created_at: now,
            retired_at: None,
        };

        if let Some(reason) = gate_failure {
            warn!(model = model_name, version = %version_id, reason, "Candidate rejected by gate");
            entry.versions.push(version);
            self.persist(model_name, &entry)?;
            return Err(RegistryError::RejectedByGate {
                model_name: model_name.to_string(),
                version_id,
                reason,
            });
        }

        // Atomic swap: retire the previous active and activate the new
        // version inside one lock hold and one persisted write.
        for existing in &mut entry.versions {
            if existing.active {
                existing.active = false;
                existing.retired_at = Some(now);
            }
        }
        entry.versions.push(version);
        self.persist(model_name, &entry)?;

        info!(model = model_name, version = %version_id, "Promoted new active version");
        Ok(version_id)
    }

    /// Returns the active version for a model, if any.
    pub async fn active_version(&self, model_name: &str) -> Option<ModelVersion> {
        let entry = self.existing_entry(model_name)?;
        let entry = entry.lock().await;
        entry.active().cloned()
    }

    /// Returns all versions for a model, registration order.
    pub async fn versions(&self, model_name: &str) -> Result<Vec<ModelVersion>> {
        let entry = self
            .existing_entry(model_name)
            .ok_or_else(|| RegistryError::UnknownModel(model_name.to_string()))?;
        let entry = entry.lock().await;
        Ok(entry.versions.clone())
    }

    /// Retires a specific version (manual rollback support).
    pub async fn retire(&self, model_name: &str, version_id: &VersionId) -> Result<()> {
        let entry = self
            .existing_entry(model_name)
            .ok_or_else(|| RegistryError::UnknownModel(model_name.to_string()))?;
        let mut entry = entry.lock().await;
        let version = entry
            .versions
            .iter_mut()
            .find(|v| &v.version_id == version_id)
            .ok_or_else(|| RegistryError::UnknownVersion {
                model_name: model_name.to_string(),
                version_id: version_id.clone(),
            })?;
        if version.active {
            version.active = false;
            version.retired_at = Some(Utc::now());
        }
        self.persist(model_name, &entry)?;
        Ok(())
    }

    /// Repairs a corrupt model entry by keeping the newest active version
    /// and retiring the rest. Promotion resumes afterwards.
    pub async fn reconcile(&self, model_name: &str) -> Result<Option<VersionId>> {
        let entry = self
            .existing_entry(model_name)
            .ok_or_else(|| RegistryError::UnknownModel(model_name.to_string()))?;
        let mut entry = entry.lock().await;

        let newest_active = entry
            .versions
            .iter()
            .filter(|v| v.active)
            .max_by_key(|v| v.created_at)
            .map(|v| v.version_id.clone());

        let now = Utc::now();
        for version in &mut entry.versions {
            if version.active && Some(&version.version_id) != newest_active.as_ref() {
                version.active = false;
                version.retired_at = Some(now);
            }
        }
        entry.corrupt = false;
        self.persist(model_name, &entry)?;
        info!(model = model_name, kept = ?newest_active, "Registry reconciled");
        Ok(newest_active)
    }

    /// All model names the registry knows about.
    pub fn model_names(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of models with an active version.
    pub async fn active_model_count(&self) -> usize {
        let mut count = 0;
        for name in self.model_names() {
            if self.active_version(&name).await.is_some() {
                count += 1;
            }
        }
        count
    }

    /// Model names whose active version exceeds the given age.
    pub async fn stale_active_models(&self, max_age_days: i64) -> Vec<String> {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let mut stale = Vec::new();
        for name in self.model_names() {
            if let Some(version) = self.active_version(&name).await {
                if version.created_at < cutoff {
                    stale.push(name);
                }
            }
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn metrics(accuracy: f64) -> RegistrationMetrics {
        RegistrationMetrics { accuracy, f1: Some(accuracy), mean_latency_ms: Some(12.0) }
    }

    fn open_registry(repo: Arc<dyn Repository>) -> ModelRegistry {
        ModelRegistry::open(repo, RegistryConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_register_promotes_passing_candidate() {
        let registry = open_registry(Arc::new(MemoryStore::new()));
        let id = registry.register("scorer", "/models/v1", metrics(0.9), 0.95).await.unwrap();

        let active = registry.active_version("scorer").await.unwrap();
        assert_eq!(active.version_id, id);
        assert!(active.active);
    }

    #[tokio::test]
    async fn test_single_active_invariant_across_two_registrations() {
        let registry = open_registry(Arc::new(MemoryStore::new()));
        let first = registry.register("scorer", "/models/v1", metrics(0.9), 0.95).await.unwrap();
        let second = registry.register("scorer", "/models/v2", metrics(0.92), 0.95).await.unwrap();

        let versions = registry.versions("scorer").await.unwrap();
        let active: Vec<_> = versions.iter().filter(|v| v.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version_id, second);

        let retired = versions.iter().find(|v| v.version_id == first).unwrap();
        assert!(!retired.active);
        assert!(retired.retired_at.is_some());
    }

    #[tokio::test]
    async fn test_rejected_candidate_stored_inactive() {
        let registry = open_registry(Arc::new(MemoryStore::new()));
        registry.register("scorer", "/models/v1", metrics(0.9), 0.95).await.unwrap();

        let err = registry.register("scorer", "/models/v2", metrics(0.9), 0.2).await.unwrap_err();
        assert!(matches!(err, RegistryError::RejectedByGate { .. }));

        // Previous active keeps serving; rejected version is on record.
        let versions = registry.versions("scorer").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions.iter().filter(|v| v.active).count(), 1);
        assert_eq!(versions[0].artifact_location, "/models/v1");
        assert!(versions[0].active);
    }

    #[tokio::test]
    async fn test_registry_survives_reopen() {
        let repo: Arc<dyn Repository> = Arc::new(MemoryStore::new());
        {
            let registry = open_registry(Arc::clone(&repo));
            registry.register("scorer", "/models/v1", metrics(0.9), 0.95).await.unwrap();
        }
        let registry = open_registry(repo);
        assert!(registry.active_version("scorer").await.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_model_halts_promotion_until_reconciled() {
        let repo: Arc<dyn Repository> = Arc::new(MemoryStore::new());
        {
            let registry = open_registry(Arc::clone(&repo));
            registry.register("scorer", "/models/v1", metrics(0.9), 0.95).await.unwrap();
        }

        // Hand-corrupt the manifest: two active versions.
        let mut versions: Vec<ModelVersion> =
            serde_json::from_value(repo.get("registry/scorer").unwrap().unwrap()).unwrap();
        let mut clone = versions[0].clone();
        clone.version_id = VersionId::new();
        versions.push(clone);
        repo.put("registry/scorer", &serde_json::to_value(&versions).unwrap()).unwrap();

        let registry = open_registry(Arc::clone(&repo));
        let err = registry.register("scorer", "/models/v3", metrics(0.9), 0.95).await.unwrap_err();
        assert!(matches!(err, RegistryError::Corrupt(_)));

        registry.reconcile("scorer").await.unwrap();
        registry.register("scorer", "/models/v3", metrics(0.9), 0.95).await.unwrap();
        let versions = registry.versions("scorer").await.unwrap();
        assert_eq!(versions.iter().filter(|v| v.active).count(), 1);
    }

    #[tokio::test]
    async fn test_stale_active_models() {
        let registry = open_registry(Arc::new(MemoryStore::new()));
        registry.register("fresh", "/models/v1", metrics(0.9), 0.95).await.unwrap();
        assert!(registry.stale_active_models(90).await.is_empty());
        // A zero-day budget flags everything registered before "now".
        assert_eq!(registry.stale_active_models(-1).await, vec!["fresh".to_string()]);
    }
}
