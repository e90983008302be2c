//! Queue-driven retraining scheduler.
//!
//! Requests enter one of two lanes (high-priority drains first) and are
//! consumed by a single worker so at most one retraining job runs at a
//! time. A model name already queued or in flight is not enqueued again.
//! Every job writes STARTED/COMPLETED/FAILED events to an append-only
//! log, and a produced candidate must clear the evaluation and fairness
//! audit gates before the registry will promote it.

use crate::audit::FairnessAuditor;
use crate::error::TrainingError;
use crate::evaluation::EvaluationEngine;
use crate::job::{
    RetrainPriority, RetrainReason, RetrainedCandidate, Retrainer, RetrainingEvent,
    RetrainingEventKind, RetrainingRequest,
};
use arbiter_core::alerting::{Alert, AlertLog, AlertType};
use arbiter_core::registry::{ModelRegistry, RegistrationMetrics, RegistryError};
use arbiter_core::storage::Repository;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long the worker sleeps when both lanes are empty.
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 250 }
    }
}

/// Append-only retraining event log over the repository.
struct RetrainingEventLog {
    repo: Arc<dyn Repository>,
    seq: AtomicU64,
}

impl RetrainingEventLog {
    fn open(repo: Arc<dyn Repository>) -> Self {
        let seq = repo.list("retraining/").map(|keys| keys.len() as u64).unwrap_or(0);
        Self { repo, seq: AtomicU64::new(seq) }
    }

    /// Best-effort append; a failing store never fails the job.
    fn append(&self, event: &RetrainingEvent) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let key = format!("retraining/{seq:08}");
        match serde_json::to_value(event) {
            Ok(value) => {
                if let Err(e) = self.repo.put(&key, &value) {
                    warn!(request = %event.request_id, error = %e, "Failed to persist retraining event");
                }
            }
            Err(e) => {
                warn!(request = %event.request_id, error = %e, "Failed to serialize retraining event");
            }
        }
    }
}

/// Two queue lanes plus the dedup set covering queued and in-flight jobs.
#[derive(Default)]
struct QueueState {
    high: VecDeque<RetrainingRequest>,
    normal: VecDeque<RetrainingRequest>,
    pending: HashSet<String>,
}

/// Consumes retraining requests and drives candidates through the
/// evaluation gate, the fairness audit gate, and registry promotion.
pub struct RetrainingScheduler {
    retrainer: Arc<dyn Retrainer>,
    registry: Arc<ModelRegistry>,
    alerts: Arc<AlertLog>,
    evaluator: EvaluationEngine,
    auditor: FairnessAuditor,
    events: RetrainingEventLog,
    state: Mutex<QueueState>,
    stop: AtomicBool,
    config: SchedulerConfig,
}

impl RetrainingScheduler {
    /// Creates a scheduler with default evaluation and audit engines.
    #[must_use]
    pub fn new(
        retrainer: Arc<dyn Retrainer>,
        registry: Arc<ModelRegistry>,
        alerts: Arc<AlertLog>,
        repo: Arc<dyn Repository>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            retrainer,
            registry,
            alerts,
            evaluator: EvaluationEngine::new(),
            auditor: FairnessAuditor::new(),
            events: RetrainingEventLog::open(repo),
            state: Mutex::new(QueueState::default()),
            stop: AtomicBool::new(false),
            config,
        }
    }

    /// Overrides the evaluation engine.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: EvaluationEngine) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Overrides the fairness auditor.
    #[must_use]
    pub fn with_auditor(mut self, auditor: FairnessAuditor) -> Self {
        self.auditor = auditor;
        self
    }

    /// Queues a retraining request for a model.
    ///
    /// Returns `false` without queueing when a request for the same model
    /// is already queued or in flight.
    pub async fn enqueue(
        &self,
        model_name: &str,
        reason: RetrainReason,
        priority: RetrainPriority,
    ) -> bool {
        let mut state = self.state.lock().await;
        if !state.pending.insert(model_name.to_string()) {
            debug!(model = model_name, "Retraining already pending, request dropped");
            return false;
        }
        let request = RetrainingRequest::new(model_name, reason, priority);
        info!(model = model_name, request = %request.request_id, ?reason, ?priority, "Retraining queued");
        match priority {
            RetrainPriority::High => state.high.push_back(request),
            RetrainPriority::Normal => state.normal.push_back(request),
        }
        true
    }

    /// Queued (not yet started) request count across both lanes.
    pub async fn queued_len(&self) -> usize {
        let state = self.state.lock().await;
        state.high.len() + state.normal.len()
    }

    /// Signals the worker loop to exit after its current job.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Worker loop. Runs until [`RetrainingScheduler::shutdown`].
    pub async fn run(self: Arc<Self>) {
        info!("Retraining scheduler started");
        while !self.stop.load(Ordering::SeqCst) {
            if !self.process_next().await {
                tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
            }
        }
        info!("Retraining scheduler stopped");
    }

    /// Drains both lanes to empty. Primarily for synchronous callers.
    pub async fn run_pending(&self) {
        while self.process_next().await {}
    }

    /// Pops and processes one request; returns `false` when idle.
    async fn process_next(&self) -> bool {
        let request = {
            let mut state = self.state.lock().await;
            // The model stays in the pending set while in flight so a
            // concurrent enqueue for it still dedups.
            state.high.pop_front().or_else(|| state.normal.pop_front())
        };
        let Some(request) = request else { return false };

        self.process(&request).await;

        let mut state = self.state.lock().await;
        state.pending.remove(&request.model_name);
        true
    }

    async fn process(&self, request: &RetrainingRequest) {
        self.events.append(&RetrainingEvent::new(request, RetrainingEventKind::Started, None));

        let candidate = match self.retrainer.retrain(&request.model_name).await {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(model = %request.model_name, error = %e, "Retraining failed");
                self.events.append(&RetrainingEvent::new(
                    request,
                    RetrainingEventKind::Failed,
                    Some(e.to_string()),
                ));
                return;
            }
        };

        match self.gate_and_promote(request, &candidate).await {
            Ok(detail) => {
                self.events.append(&RetrainingEvent::new(
                    request,
                    RetrainingEventKind::Completed,
                    Some(detail),
                ));
            }
            Err(e) => {
                self.events.append(&RetrainingEvent::new(
                    request,
                    RetrainingEventKind::Failed,
                    Some(e.to_string()),
                ));
            }
        }
    }

    /// Runs the evaluation and audit gates, then asks the registry to
    /// promote. The previously active version keeps serving unless every
    /// gate passes.
    async fn gate_and_promote(
        &self,
        request: &RetrainingRequest,
        candidate: &RetrainedCandidate,
    ) -> Result<String, TrainingError> {
        let model = request.model_name.as_str();
        let holdout = &candidate.holdout;

        let evaluation = match self.evaluator.evaluate(
            candidate.predictor.as_ref(),
            &holdout.features,
            &holdout.labels,
        ) {
            Ok(evaluation) => evaluation,
            Err(e) => {
                self.alerts.append(Alert::new(
                    AlertType::AuditFailure,
                    format!("Evaluation for '{model}' could not run: {e}"),
                    Some(model.to_string()),
                    json!({ "request_id": request.request_id }),
                ));
                return Err(e);
            }
        };
        debug!(
            model,
            accuracy = evaluation.accuracy,
            samples = evaluation.sample_count,
            "Candidate evaluated"
        );

        let audit = match self.auditor.audit(
            candidate.predictor.as_ref(),
            candidate.explainer.as_deref().map(|e| e as &dyn arbiter_abstraction::Explainable),
            holdout,
        ) {
            Ok(audit) => audit,
            Err(e) => {
                self.alerts.append(Alert::new(
                    AlertType::AuditFailure,
                    format!("Fairness audit for '{model}' could not run: {e}"),
                    Some(model.to_string()),
                    json!({ "request_id": request.request_id }),
                ));
                return Err(e);
            }
        };

        if !audit.overall_compliant {
            self.alerts.append(Alert::new(
                AlertType::PromotionBlocked,
                format!("Candidate for '{model}' failed the fairness audit"),
                Some(model.to_string()),
                json!({
                    "request_id": request.request_id,
                    "fairness_score": audit.fairness_score,
                    "privacy_risk": audit.privacy_risk,
                    "recommendations": audit.recommendations,
                }),
            ));
            return Err(TrainingError::Audit("candidate is not compliant".to_string()));
        }

        let metrics = RegistrationMetrics {
            accuracy: evaluation.accuracy,
            f1: evaluation.f1,
            mean_latency_ms: None,
        };
        match self
            .registry
            .register(model, &candidate.artifact_location, metrics, audit.audit_score())
            .await
        {
            Ok(version_id) => {
                info!(model, version = %version_id, "Retrained candidate promoted");
                Ok(format!("promoted version {version_id}"))
            }
            Err(RegistryError::RejectedByGate { reason, version_id, .. }) => {
                self.alerts.append(Alert::new(
                    AlertType::PromotionBlocked,
                    format!("Candidate {version_id} for '{model}' rejected: {reason}"),
                    Some(model.to_string()),
                    json!({ "request_id": request.request_id, "reason": reason }),
                ));
                Err(TrainingError::Registry(RegistryError::RejectedByGate {
                    model_name: model.to_string(),
                    version_id,
                    reason,
                }))
            }
            Err(e) => Err(e.into()),
        }
    }
}
