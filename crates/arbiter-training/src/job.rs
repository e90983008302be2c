//! Retraining requests, events, and the retrainer capability.

use crate::error::TrainingResult;
use arbiter_abstraction::{Explainable, Features, Predictor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Why a retraining job was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainReason {
    /// Input drift crossed the alerting threshold.
    Drift,
    /// Windowed accuracy degraded against the baseline.
    Degradation,
    /// The active version exceeded its maximum serving age.
    Stale,
    /// The model artifact failed to load or deserialize at serve time.
    LoadFailure,
    /// Requested by an operator.
    Manual,
}

/// Queue lane for a retraining request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainPriority {
    Normal,
    High,
}

/// A queued retraining job. Consumed exactly once by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainingRequest {
    /// Unique request id.
    pub request_id: String,
    /// Model to retrain.
    pub model_name: String,
    /// Why it was queued.
    pub reason: RetrainReason,
    /// Queue lane.
    pub priority: RetrainPriority,
    /// When it was queued.
    pub requested_at: DateTime<Utc>,
}

impl RetrainingRequest {
    /// Creates a request with a fresh id.
    #[must_use]
    pub fn new(model_name: impl Into<String>, reason: RetrainReason, priority: RetrainPriority) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            model_name: model_name.into(),
            reason,
            priority,
            requested_at: Utc::now(),
        }
    }
}

/// Lifecycle event for a retraining job, appended to the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetrainingEventKind {
    Started,
    Completed,
    Failed,
}

/// One entry in the append-only retraining event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainingEvent {
    /// Request this event belongs to.
    pub request_id: String,
    /// Model being retrained.
    pub model_name: String,
    /// What happened.
    pub kind: RetrainingEventKind,
    /// Failure detail or promotion outcome, when applicable.
    pub detail: Option<String>,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

impl RetrainingEvent {
    #[must_use]
    pub fn new(request: &RetrainingRequest, kind: RetrainingEventKind, detail: Option<String>) -> Self {
        Self {
            request_id: request.request_id.clone(),
            model_name: request.model_name.clone(),
            kind,
            detail,
            timestamp: Utc::now(),
        }
    }
}

/// Held-out data the retrainer supplies alongside a candidate, used by
/// the evaluation and fairness audit gates.
#[derive(Debug, Clone, Default)]
pub struct HoldoutSet {
    /// Feature rows.
    pub features: Vec<Features>,
    /// Ground-truth labels, one per row.
    pub labels: Vec<Value>,
    /// Sensitive attribute group membership, one entry per attribute with
    /// one group label per row.
    pub sensitive_attributes: HashMap<String, Vec<String>>,
}

/// A freshly retrained candidate awaiting the promotion gate.
pub struct RetrainedCandidate {
    /// Where the new artifact was written.
    pub artifact_location: String,
    /// The candidate model itself.
    pub predictor: Arc<dyn Predictor>,
    /// Explainability capabilities, when the model has them.
    pub explainer: Option<Arc<dyn Explainable + Send + Sync>>,
    /// Held-out data for the evaluation and audit gates.
    pub holdout: HoldoutSet,
}

/// The externally supplied retraining routine.
///
/// Training algorithms are out of scope here; the scheduler only needs
/// something that produces a candidate it can gate and promote.
#[async_trait]
pub trait Retrainer: Send + Sync {
    /// Retrains the named model and returns the candidate.
    ///
    /// # Errors
    /// Returns a `TrainingError` if retraining fails; the job is logged
    /// FAILED and the previously active version keeps serving.
    async fn retrain(&self, model_name: &str) -> TrainingResult<RetrainedCandidate>;
}
