//! The control plane facade.
//!
//! One explicitly wired object owns the router, monitor, alert log,
//! registry, and retraining scheduler. `start` spawns the monitor and
//! scheduler background loops; everything else is a thin, synchronous
//! pass-through so callers never reach around the facade.

use crate::error::{FailureRecord, Result as RoutingResult, RoutingError};
use crate::routing::{
    RoutingDecision, RoutingStats, TaskProfile, TaskProfiler, TaskRouter, TaskType,
};
use arbiter_abstraction::{EngineKind, EngineResponse, Features, PredictionError};
use arbiter_core::alerting::{Alert, AlertLog, Severity};
use arbiter_core::config::{MonitorConfig, RegistryConfig};
use arbiter_core::monitoring::{MonitorFinding, PerformanceMonitor};
use arbiter_core::registry::{
    ModelRegistry, RegistrationMetrics, RegistryError, VersionId,
};
use arbiter_core::storage::Repository;
use arbiter_training::{
    RetrainPriority, RetrainReason, Retrainer, RetrainingScheduler, SchedulerConfig,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Aggregate health of the system, derived from the recent alert mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemHealth {
    /// No high-severity alerts recently.
    Healthy,
    /// At least one high-severity alert recently.
    Degraded,
    /// At least one error-severity alert recently.
    Critical,
}

/// Per-model status line for the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    /// Active version id, if one is serving.
    pub active_version: Option<String>,
    /// Accuracy from the latest monitor snapshot.
    pub accuracy: Option<f64>,
    /// Drift score from the latest monitor snapshot.
    pub drift_score: Option<f64>,
    /// Mean latency from the latest monitor snapshot.
    pub mean_latency_ms: Option<f64>,
}

/// Point-in-time view of the whole system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    /// Models with an active registered version.
    pub active_model_count: usize,
    /// Predictions recorded since startup.
    pub total_predictions: u64,
    /// Derived health classification.
    pub system_health: SystemHealth,
    /// The most recent alerts, newest first (at most 10).
    pub recent_alerts: Vec<Alert>,
    /// Status per known model.
    pub model_status: HashMap<String, ModelStatus>,
}

/// Configuration for the control plane and its owned services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Performance monitor thresholds and windows.
    pub monitor: MonitorConfig,
    /// Registry acceptance bars.
    pub registry: RegistryConfig,
    /// Retraining scheduler knobs.
    pub scheduler: SchedulerConfig,
}

/// Facade over routing, monitoring, alerting, the registry, and the
/// retraining pipeline.
pub struct ControlPlane {
    profiler: TaskProfiler,
    router: Arc<TaskRouter>,
    monitor: Arc<PerformanceMonitor>,
    registry: Arc<ModelRegistry>,
    alerts: Arc<AlertLog>,
    scheduler: Arc<RetrainingScheduler>,
    config: ControlPlaneConfig,
    stop: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ControlPlane {
    /// Wires the control plane over a repository, router, and retrainer.
    ///
    /// # Errors
    /// Fails when the registry cannot load its persisted manifests.
    pub fn new(
        repo: Arc<dyn Repository>,
        router: TaskRouter,
        retrainer: Arc<dyn Retrainer>,
        config: ControlPlaneConfig,
    ) -> Result<Self, RegistryError> {
        let registry =
            Arc::new(ModelRegistry::open(Arc::clone(&repo), config.registry.clone())?);
        let alerts = Arc::new(AlertLog::open(Arc::clone(&repo)));
        let scheduler = Arc::new(RetrainingScheduler::new(
            retrainer,
            Arc::clone(&registry),
            Arc::clone(&alerts),
            repo,
            config.scheduler.clone(),
        ));
        Ok(Self {
            profiler: TaskProfiler::new(),
            router: Arc::new(router),
            monitor: Arc::new(PerformanceMonitor::new(config.monitor.clone())),
            registry,
            alerts,
            scheduler,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Profiles a task payload.
    #[must_use]
    pub fn profile_task(&self, task_type: TaskType, payload: &Features) -> TaskProfile {
        self.profiler.profile(task_type, payload)
    }

    /// Routes and executes a task through the router.
    ///
    /// Any attempt that failed because a model artifact could not load
    /// queues retraining for that model; when a fallback served, the
    /// previously active version keeps serving in the meantime.
    ///
    /// # Errors
    /// Propagates `RoutingError::AllEnginesFailed` when no engine served.
    pub async fn route_and_execute(
        &self,
        profile: &TaskProfile,
        payload: &Features,
    ) -> RoutingResult<(EngineResponse, RoutingDecision)> {
        let result = self.router.route_and_execute(profile, payload).await;
        let failures: Vec<FailureRecord> = match &result {
            Ok((_, decision)) => decision.failures.clone(),
            Err(RoutingError::AllEnginesFailed { attempts }) => attempts.clone(),
            Err(_) => Vec::new(),
        };
        for record in failures {
            if matches!(record.error, PredictionError::ModelLoadError(_)) {
                warn!(
                    model = %record.engine_id,
                    error = %record.error,
                    "Model failed to load, queueing retraining"
                );
                self.scheduler
                    .enqueue(&record.engine_id, RetrainReason::LoadFailure, RetrainPriority::High)
                    .await;
            }
        }
        result
    }

    /// Feeds an observed output-quality score for an engine back into the
    /// router's quality gate.
    pub fn record_outcome_quality(&self, engine: EngineKind, quality: f64) {
        self.router.record_quality(engine, quality);
    }

    /// Feeds an observed prediction into the performance monitor.
    pub fn record_prediction(
        &self,
        model_name: &str,
        features: Features,
        prediction: Value,
        actual: Option<Value>,
        latency_ms: Option<f64>,
    ) {
        self.monitor.record_prediction(model_name, features, prediction, actual, latency_ms);
    }

    /// Feeds a failed execution attempt into the performance monitor.
    pub fn record_failure(&self, model_name: &str) {
        self.monitor.record_failure(model_name);
    }

    /// Registers a model version through the gated registry.
    ///
    /// # Errors
    /// Propagates registry gate rejections and storage failures.
    pub async fn register_model(
        &self,
        model_name: &str,
        artifact_location: &str,
        metrics: RegistrationMetrics,
        audit_score: f64,
    ) -> Result<VersionId, RegistryError> {
        self.registry.register(model_name, artifact_location, metrics, audit_score).await
    }

    /// Queues a manual retraining request.
    pub async fn request_retraining(&self, model_name: &str) -> bool {
        self.scheduler.enqueue(model_name, RetrainReason::Manual, RetrainPriority::Normal).await
    }

    /// Aggregate routing statistics.
    #[must_use]
    pub fn routing_stats(&self) -> RoutingStats {
        self.router.routing_stats()
    }

    /// The shared performance monitor.
    #[must_use]
    pub fn monitor(&self) -> Arc<PerformanceMonitor> {
        Arc::clone(&self.monitor)
    }

    /// The shared model registry.
    #[must_use]
    pub fn registry(&self) -> Arc<ModelRegistry> {
        Arc::clone(&self.registry)
    }

    /// The shared alert log.
    #[must_use]
    pub fn alerts(&self) -> Arc<AlertLog> {
        Arc::clone(&self.alerts)
    }

    /// Builds the dashboard snapshot.
    pub async fn dashboard(&self) -> DashboardSnapshot {
        let recent_alerts = self.alerts.recent(10);
        let system_health = health_of(&recent_alerts);

        let mut model_status = HashMap::new();
        let mut names = self.monitor.model_names();
        for name in self.registry.model_names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        for name in names {
            let metrics = self.monitor.latest_metrics(&name);
            let active_version =
                self.registry.active_version(&name).await.map(|v| v.version_id.to_string());
            model_status.insert(
                name,
                ModelStatus {
                    active_version,
                    accuracy: metrics.as_ref().and_then(|m| m.accuracy),
                    drift_score: metrics.as_ref().map(|m| m.drift_score),
                    mean_latency_ms: metrics.as_ref().and_then(|m| m.mean_latency_ms),
                },
            );
        }

        DashboardSnapshot {
            active_model_count: self.registry.active_model_count().await,
            total_predictions: self.monitor.total_predictions(),
            system_health,
            recent_alerts,
            model_status,
        }
    }

    /// One monitor tick: run threshold checks, raise alerts, and queue
    /// retraining where a finding warrants it.
    pub async fn run_monitor_tick(&self) {
        for finding in self.monitor.run_checks() {
            self.alerts.append(Alert::from_finding(&finding));
            match &finding {
                MonitorFinding::Degradation { model, .. } => {
                    self.scheduler
                        .enqueue(model, RetrainReason::Degradation, RetrainPriority::High)
                        .await;
                }
                MonitorFinding::DriftDetected { model, .. } => {
                    self.scheduler
                        .enqueue(model, RetrainReason::Drift, RetrainPriority::High)
                        .await;
                }
                MonitorFinding::HighLatency { .. }
                | MonitorFinding::HighErrorRate { .. }
                | MonitorFinding::ModelStale { .. } => {}
            }
        }

        // Active versions past their serving age get a stale finding;
        // the monitor itself has no registry view.
        let max_age = self.config.monitor.max_model_age_days;
        for model in self.registry.stale_active_models(max_age).await {
            let age_days = match self.registry.active_version(&model).await {
                Some(version) => (Utc::now() - version.created_at).num_days(),
                None => continue,
            };
            let finding = MonitorFinding::ModelStale { model: model.clone(), age_days };
            self.alerts.append(Alert::from_finding(&finding));
            self.scheduler.enqueue(&model, RetrainReason::Stale, RetrainPriority::Normal).await;
        }
    }

    /// Spawns the monitor and scheduler background loops.
    pub fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if !handles.is_empty() {
            warn!("Control plane already started");
            return;
        }

        handles.push(tokio::spawn(Arc::clone(&self.scheduler).run()));

        let plane = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let tick = Duration::from_secs(plane.config.monitor.tick_interval_secs);
            info!(interval_secs = tick.as_secs(), "Monitor loop started");
            loop {
                tokio::time::sleep(tick).await;
                if plane.stop.load(Ordering::SeqCst) {
                    break;
                }
                plane.run_monitor_tick().await;
            }
            info!("Monitor loop stopped");
        }));
        info!("Control plane started");
    }

    /// Stops the background loops and waits for them to exit.
    pub async fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.scheduler.shutdown();
        let handles: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            handles.drain(..).collect()
        };
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
        info!("Control plane stopped");
    }
}

fn health_of(recent_alerts: &[Alert]) -> SystemHealth {
    if recent_alerts.iter().any(|a| a.severity == Severity::Error) {
        SystemHealth::Critical
    } else if recent_alerts.iter().any(|a| a.severity == Severity::High) {
        SystemHealth::Degraded
    } else {
        SystemHealth::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RouterConfig;
    use arbiter_abstraction::PredictionError;
    use arbiter_core::alerting::AlertType;
    use arbiter_core::storage::MemoryStore;
    use arbiter_training::{RetrainedCandidate, TrainingError};
    use async_trait::async_trait;
    use serde_json::json;

    struct NeverRetrainer;

    #[async_trait]
    impl Retrainer for NeverRetrainer {
        async fn retrain(&self, _model_name: &str) -> Result<RetrainedCandidate, TrainingError> {
            Err(TrainingError::RetrainFailed("not wired in this test".to_string()))
        }
    }

    /// Local engine whose model artifact never loads.
    struct BrokenArtifactEngine;

    #[async_trait]
    impl arbiter_abstraction::InferenceEngine for BrokenArtifactEngine {
        async fn execute(&self, _payload: &Features) -> Result<EngineResponse, PredictionError> {
            Err(PredictionError::ModelLoadError("artifact missing".to_string()))
        }
        fn kind(&self) -> EngineKind {
            EngineKind::LocalModel
        }
        fn engine_id(&self) -> &str {
            "churn-clf"
        }
    }

    struct OkRemoteEngine;

    #[async_trait]
    impl arbiter_abstraction::InferenceEngine for OkRemoteEngine {
        async fn execute(&self, _payload: &Features) -> Result<EngineResponse, PredictionError> {
            Ok(EngineResponse {
                output: json!("ok"),
                engine: EngineKind::RemoteLlm,
                engine_id: "remote".to_string(),
                latency_ms: 500,
                cost: 0.03,
            })
        }
        fn kind(&self) -> EngineKind {
            EngineKind::RemoteLlm
        }
        fn engine_id(&self) -> &str {
            "remote"
        }
    }

    /// Suitability 0.9 with default weights: clears every default gate.
    fn local_leaning_profile() -> TaskProfile {
        TaskProfile {
            task_type: TaskType::Classification,
            complexity: 0.0,
            data_volume: 0,
            time_sensitivity: 1.0,
            cost_sensitivity: 0.5,
            accuracy_requirement: 1.0,
            structuredness: 0.35,
            structured_output: true,
            creativity_requirement: 0.0,
        }
    }

    fn plane() -> Arc<ControlPlane> {
        Arc::new(
            ControlPlane::new(
                Arc::new(MemoryStore::new()),
                TaskRouter::new(RouterConfig::default()),
                Arc::new(NeverRetrainer),
                ControlPlaneConfig::default(),
            )
            .unwrap(),
        )
    }

    fn features(label: i64) -> Features {
        let mut f = Features::new();
        f.insert("x".to_string(), json!(label));
        f
    }

    #[tokio::test]
    async fn test_dashboard_health_tracks_alert_mix() {
        let plane = plane();
        assert_eq!(plane.dashboard().await.system_health, SystemHealth::Healthy);

        plane.alerts.append(Alert::new(
            AlertType::HighLatency,
            "slow".to_string(),
            Some("clf".to_string()),
            json!({}),
        ));
        assert_eq!(plane.dashboard().await.system_health, SystemHealth::Healthy);

        plane.alerts.append(Alert::new(
            AlertType::DriftDetected,
            "drift".to_string(),
            Some("clf".to_string()),
            json!({}),
        ));
        assert_eq!(plane.dashboard().await.system_health, SystemHealth::Degraded);

        plane.alerts.append(Alert::new(
            AlertType::PromotionBlocked,
            "blocked".to_string(),
            Some("clf".to_string()),
            json!({}),
        ));
        let dashboard = plane.dashboard().await;
        assert_eq!(dashboard.system_health, SystemHealth::Critical);
        assert_eq!(dashboard.recent_alerts.len(), 3);
    }

    #[tokio::test]
    async fn test_dashboard_counts_predictions_and_models() {
        let plane = plane();
        for i in 0..5 {
            plane.record_prediction("clf", features(i), json!(1), Some(json!(1)), Some(12.0));
        }
        plane
            .register_model(
                "clf",
                "/models/v1",
                RegistrationMetrics { accuracy: 0.9, f1: None, mean_latency_ms: None },
                0.95,
            )
            .await
            .unwrap();

        let dashboard = plane.dashboard().await;
        assert_eq!(dashboard.total_predictions, 5);
        assert_eq!(dashboard.active_model_count, 1);
        let status = &dashboard.model_status["clf"];
        assert!(status.active_version.is_some());
    }

    #[tokio::test]
    async fn test_degradation_tick_raises_alert_and_queues_retraining() {
        let plane = plane();

        // A healthy snapshot first, so the next tick has a baseline.
        for i in 0..20 {
            plane.record_prediction("clf", features(i % 3), json!(1), Some(json!(1)), None);
        }
        plane.run_monitor_tick().await;
        assert!(plane.alerts.is_empty());

        // Inject wrong predictions, dropping windowed accuracy well past
        // the degradation fraction.
        for i in 0..80 {
            plane.record_prediction("clf", features(i % 3), json!(0), Some(json!(1)), None);
        }
        plane.run_monitor_tick().await;

        let recent = plane.alerts.recent(10);
        assert!(recent
            .iter()
            .any(|a| a.alert_type == AlertType::PerformanceDegradation));
        assert_eq!(plane.scheduler.queued_len().await, 1);

        // A second tick re-detects but the in-flight dedup holds the
        // queue at one request.
        plane.run_monitor_tick().await;
        assert_eq!(plane.scheduler.queued_len().await, 1);
    }

    #[tokio::test]
    async fn test_stale_active_version_is_flagged_and_queued() {
        let mut config = ControlPlaneConfig::default();
        // Anything registered before "now" is immediately stale.
        config.monitor.max_model_age_days = -1;
        let plane = Arc::new(
            ControlPlane::new(
                Arc::new(MemoryStore::new()),
                TaskRouter::new(RouterConfig::default()),
                Arc::new(NeverRetrainer),
                config,
            )
            .unwrap(),
        );
        plane
            .register_model(
                "clf",
                "/models/v1",
                RegistrationMetrics { accuracy: 0.9, f1: None, mean_latency_ms: None },
                0.95,
            )
            .await
            .unwrap();

        plane.run_monitor_tick().await;
        let recent = plane.alerts.recent(10);
        assert!(recent.iter().any(|a| a.alert_type == AlertType::ModelStale));
        assert_eq!(plane.scheduler.queued_len().await, 1);
    }

    #[tokio::test]
    async fn test_model_load_failure_queues_retraining_and_keeps_serving() {
        let router = TaskRouter::new(RouterConfig::default())
            .with_engine(Arc::new(BrokenArtifactEngine))
            .with_engine(Arc::new(OkRemoteEngine));
        let plane = Arc::new(
            ControlPlane::new(
                Arc::new(MemoryStore::new()),
                router,
                Arc::new(NeverRetrainer),
                ControlPlaneConfig::default(),
            )
            .unwrap(),
        );

        let profile = local_leaning_profile();
        let (response, decision) =
            plane.route_and_execute(&profile, &Features::new()).await.unwrap();

        // The fallback served, and the broken model is queued to retrain.
        assert_eq!(response.engine, EngineKind::RemoteLlm);
        assert!(decision.fallback_used);
        assert_eq!(plane.scheduler.queued_len().await, 1);

        // A second load failure dedups against the queued request.
        plane.route_and_execute(&profile, &Features::new()).await.unwrap();
        assert_eq!(plane.scheduler.queued_len().await, 1);
    }

    #[tokio::test]
    async fn test_generic_engine_failure_does_not_queue_retraining() {
        struct FlakyEngine;

        #[async_trait]
        impl arbiter_abstraction::InferenceEngine for FlakyEngine {
            async fn execute(&self, _payload: &Features) -> Result<EngineResponse, PredictionError> {
                Err(PredictionError::EngineError("connection reset".to_string()))
            }
            fn kind(&self) -> EngineKind {
                EngineKind::LocalModel
            }
            fn engine_id(&self) -> &str {
                "flaky-clf"
            }
        }

        let router = TaskRouter::new(RouterConfig::default())
            .with_engine(Arc::new(FlakyEngine))
            .with_engine(Arc::new(OkRemoteEngine));
        let plane = Arc::new(
            ControlPlane::new(
                Arc::new(MemoryStore::new()),
                router,
                Arc::new(NeverRetrainer),
                ControlPlaneConfig::default(),
            )
            .unwrap(),
        );

        plane.route_and_execute(&local_leaning_profile(), &Features::new()).await.unwrap();
        assert_eq!(plane.scheduler.queued_len().await, 0);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let plane = plane();
        plane.start();
        // A second start is a no-op, not a second set of loops.
        plane.start();
        plane.shutdown().await;
    }

    #[test]
    fn test_profile_task_delegates_to_profiler() {
        let plane = Arc::new(
            ControlPlane::new(
                Arc::new(MemoryStore::new()),
                TaskRouter::new(RouterConfig::default()),
                Arc::new(NeverRetrainer),
                ControlPlaneConfig::default(),
            )
            .unwrap(),
        );
        let profile = plane.profile_task(TaskType::Generation, &Features::new());
        assert_eq!(profile.task_type, TaskType::Generation);
        assert!(profile.creativity_requirement >= 0.8);
    }

    #[tokio::test]
    async fn test_record_failure_feeds_error_rate() {
        let plane = plane();
        for i in 0..9 {
            plane.record_prediction("clf", features(i), json!(1), None, None);
        }
        for _ in 0..3 {
            plane.record_failure("clf");
        }
        plane.run_monitor_tick().await;
        let recent = plane.alerts.recent(10);
        assert!(recent.iter().any(|a| a.alert_type == AlertType::HighErrorRate));
    }
}
