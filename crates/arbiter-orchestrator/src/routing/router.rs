//! Task router: engine selection, execution with fallback, and adaptive
//! threshold tuning.

use super::config::{RoutingRule, RoutingRules};
use super::trackers::{CostTracker, QualityTracker};
use super::types::{RoutingDecision, RoutingStats, SuitabilityWeights, TaskProfile, TaskType};
use crate::error::{FailureRecord, Result, RoutingError};
use arbiter_abstraction::{EngineKind, EngineResponse, Features, InferenceEngine, PredictionError};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Creativity level at or above which a task is pinned to the remote
/// engine regardless of its suitability score.
const CREATIVITY_PIN: f64 = 0.8;

/// Router tuning knobs.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Decisions between adaptive tuning passes.
    pub tune_interval: u64,
    /// How much a tuning pass raises an offending threshold.
    pub threshold_step: f64,
    /// Ceiling thresholds never step past.
    pub threshold_cap: f64,
    /// Mean latency across recent decisions that triggers tuning.
    pub latency_target_ms: f64,
    /// Mean cost across recent decisions that triggers tuning.
    pub cost_target: f64,
    /// Decisions retained for stats and tuning.
    pub history_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tune_interval: 50,
            threshold_step: 0.05,
            threshold_cap: 0.9,
            latency_target_ms: 1000.0,
            cost_target: 0.02,
            history_capacity: 1000,
        }
    }
}

/// Routes tasks between the local predictive model and the remote LLM.
pub struct TaskRouter {
    engines: HashMap<EngineKind, Arc<dyn InferenceEngine>>,
    rules: RwLock<RoutingRules>,
    weights: SuitabilityWeights,
    cost_tracker: Arc<CostTracker>,
    quality_tracker: Arc<QualityTracker>,
    history: Mutex<VecDeque<RoutingDecision>>,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    config: RouterConfig,
}

impl TaskRouter {
    /// Creates a router with default rules, weights, and trackers.
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self {
            engines: HashMap::new(),
            rules: RwLock::new(RoutingRules::default()),
            weights: SuitabilityWeights::default(),
            cost_tracker: Arc::new(CostTracker::new()),
            quality_tracker: Arc::new(QualityTracker::new()),
            history: Mutex::new(VecDeque::new()),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            config,
        }
    }

    /// Registers an engine for its kind. Last registration wins.
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<dyn InferenceEngine>) -> Self {
        self.engines.insert(engine.kind(), engine);
        self
    }

    /// Replaces the rule table.
    #[must_use]
    pub fn with_rules(self, rules: RoutingRules) -> Self {
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = rules;
        self
    }

    /// Replaces the suitability weights.
    #[must_use]
    pub fn with_weights(mut self, weights: SuitabilityWeights) -> Self {
        self.weights = weights;
        self
    }

    /// The cost tracker, shared with callers that observe billing.
    #[must_use]
    pub fn cost_tracker(&self) -> Arc<CostTracker> {
        Arc::clone(&self.cost_tracker)
    }

    /// The quality tracker, shared with callers that score outputs.
    #[must_use]
    pub fn quality_tracker(&self) -> Arc<QualityTracker> {
        Arc::clone(&self.quality_tracker)
    }

    /// The current rule for a task type (after any adaptive tuning).
    #[must_use]
    pub fn rule(&self, task_type: TaskType) -> RoutingRule {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).rule(task_type)
    }

    /// Selects an engine for a profile without executing anything.
    ///
    /// Creative tasks are pinned to the remote engine. Otherwise the
    /// primary engine is selected iff the suitability, quality, and cost
    /// gates all pass; the decision never falls back to a silent default.
    #[must_use]
    pub fn decide(&self, profile: &TaskProfile) -> RoutingDecision {
        let rule = self.rule(profile.task_type);
        let suitability = self.weights.suitability(profile);

        if profile.creativity_requirement >= CREATIVITY_PIN {
            let engine = EngineKind::RemoteLlm;
            return self.decision(
                profile,
                engine,
                (1.0 - suitability).max(0.5),
                format!(
                    "creativity {:.2} >= {CREATIVITY_PIN:.2}: pinned to remote engine",
                    profile.creativity_requirement
                ),
            );
        }

        let quality = self.quality_tracker.mean_quality(rule.primary_engine);
        let cost_estimate =
            self.cost_tracker.estimate(rule.primary_engine, profile.complexity, profile.data_volume);

        let suitability_ok = suitability >= rule.ml_threshold;
        let quality_ok = quality >= rule.quality_minimum;
        let cost_ok = cost_estimate <= rule.cost_limit;

        let reasoning = format!(
            "suitability {suitability:.3} {} threshold {:.3}; quality {quality:.3} {} minimum {:.3}; estimated cost {cost_estimate:.4} {} limit {:.4}",
            gate(suitability_ok),
            rule.ml_threshold,
            gate(quality_ok),
            rule.quality_minimum,
            gate(cost_ok),
            rule.cost_limit,
        );

        if suitability_ok && quality_ok && cost_ok {
            self.decision(profile, rule.primary_engine, suitability, reasoning)
        } else {
            self.decision(
                profile,
                EngineKind::RemoteLlm,
                (1.0 - suitability).max(0.5),
                reasoning,
            )
        }
    }

    fn decision(
        &self,
        profile: &TaskProfile,
        engine: EngineKind,
        confidence: f64,
        reasoning: String,
    ) -> RoutingDecision {
        RoutingDecision {
            task_type: profile.task_type,
            engine,
            confidence,
            cost_estimate: self
                .cost_tracker
                .estimate(engine, profile.complexity, profile.data_volume),
            reasoning,
            fallback_used: false,
            failures: Vec::new(),
            execution_time_ms: None,
            observed_cost: None,
            decided_at: Utc::now(),
        }
    }

    /// Routes and executes a task.
    ///
    /// On failure of the selected engine, retries exactly once with the
    /// configured fallback engine and marks the decision accordingly;
    /// failed attempts stay on the decision as failure records. Observed
    /// cost feeds the cost tracker automatically; output quality is only
    /// assessable by the caller after the fact and arrives through
    /// [`TaskRouter::record_quality`].
    ///
    /// # Errors
    /// Returns `RoutingError::AllEnginesFailed` with one failure record
    /// per attempt when no engine produced a response.
    pub async fn route_and_execute(
        &self,
        profile: &TaskProfile,
        payload: &Features,
    ) -> Result<(EngineResponse, RoutingDecision)> {
        let mut decision = self.decide(profile);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        debug!(task = %profile.task_type, engine = %decision.engine, "Routing decision made");

        let mut attempts = Vec::new();
        let response = match self.attempt(decision.engine, payload).await {
            Ok(response) => Some(response),
            Err(record) => {
                warn!(engine = %decision.engine, error = %record.error, "Engine failed, consulting fallback");
                attempts.push(record);
                let fallback = self
                    .rule(profile.task_type)
                    .fallback_engine
                    .filter(|f| *f != decision.engine);
                match fallback {
                    Some(fallback) => match self.attempt(fallback, payload).await {
                        Ok(response) => {
                            decision.engine = fallback;
                            decision.fallback_used = true;
                            Some(response)
                        }
                        Err(record) => {
                            attempts.push(record);
                            None
                        }
                    },
                    None => None,
                }
            }
        };

        let Some(response) = response else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            self.push_history(decision);
            return Err(RoutingError::AllEnginesFailed { attempts });
        };

        decision.failures = attempts;
        decision.execution_time_ms = Some(response.latency_ms);
        decision.observed_cost = Some(response.cost);
        self.cost_tracker.record(response.engine, response.cost);
        self.push_history(decision.clone());
        self.maybe_tune();
        Ok((response, decision))
    }

    async fn attempt(
        &self,
        kind: EngineKind,
        payload: &Features,
    ) -> std::result::Result<EngineResponse, FailureRecord> {
        let Some(engine) = self.engines.get(&kind) else {
            return Err(FailureRecord::new(
                kind,
                "unregistered",
                PredictionError::UnknownEngine(kind.to_string()),
            ));
        };
        engine
            .execute(payload)
            .await
            .map_err(|e| FailureRecord::new(kind, engine.engine_id(), e))
    }

    /// Feeds an observed output-quality score back into the quality
    /// tracker; future decisions for the engine see the updated rolling
    /// mean through the quality gate.
    pub fn record_quality(&self, engine: EngineKind, quality: f64) {
        self.quality_tracker.record(engine, quality);
    }

    fn push_history(&self, decision: RoutingDecision) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(decision);
        while history.len() > self.config.history_capacity {
            history.pop_front();
        }
    }

    /// Steps thresholds up when recent decisions blew the latency or cost
    /// targets. Thresholds only move up; lowering them is a config reload.
    fn maybe_tune(&self) {
        let total = self.total_requests.load(Ordering::Relaxed);
        if self.config.tune_interval == 0 || total % self.config.tune_interval != 0 {
            return;
        }

        let (mean_latency, mean_cost, task_types) = {
            let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            let recent: Vec<&RoutingDecision> = history
                .iter()
                .rev()
                .take(self.config.tune_interval as usize)
                .filter(|d| d.execution_time_ms.is_some())
                .collect();
            if recent.is_empty() {
                return;
            }
            let mean_latency = recent
                .iter()
                .filter_map(|d| d.execution_time_ms)
                .sum::<u64>() as f64
                / recent.len() as f64;
            let mean_cost =
                recent.iter().filter_map(|d| d.observed_cost).sum::<f64>() / recent.len() as f64;
            let mut task_types: Vec<TaskType> = recent.iter().map(|d| d.task_type).collect();
            task_types.sort_by_key(|t| *t as usize);
            task_types.dedup();
            (mean_latency, mean_cost, task_types)
        };

        let latency_over = mean_latency > self.config.latency_target_ms;
        let cost_over = mean_cost > self.config.cost_target;
        if !latency_over && !cost_over {
            return;
        }

        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        for task_type in task_types {
            let mut rule = rules.rule(task_type);
            let tuned =
                (rule.ml_threshold + self.config.threshold_step).min(self.config.threshold_cap);
            if tuned > rule.ml_threshold {
                info!(
                    task = %task_type,
                    from = rule.ml_threshold,
                    to = tuned,
                    mean_latency_ms = mean_latency,
                    mean_cost,
                    "Adaptive tuning raised ml_threshold"
                );
                rule.ml_threshold = tuned;
                rules.set_rule(task_type, rule);
            }
        }
    }

    /// Aggregate stats over the bounded decision history.
    #[must_use]
    pub fn routing_stats(&self) -> RoutingStats {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let mut distribution: HashMap<EngineKind, u64> = HashMap::new();
        for decision in history.iter() {
            *distribution.entry(decision.engine).or_default() += 1;
        }
        let executed: Vec<&RoutingDecision> =
            history.iter().filter(|d| d.execution_time_ms.is_some()).collect();
        let avg_response_time_ms = if executed.is_empty() {
            0.0
        } else {
            executed.iter().filter_map(|d| d.execution_time_ms).sum::<u64>() as f64
                / executed.len() as f64
        };
        let avg_cost = if executed.is_empty() {
            0.0
        } else {
            executed.iter().filter_map(|d| d.observed_cost).sum::<f64>() / executed.len() as f64
        };
        let total = self.total_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        RoutingStats {
            total_requests: total,
            avg_response_time_ms,
            avg_cost,
            error_rate: if total == 0 { 0.0 } else { failed as f64 / total as f64 },
            routing_distribution: distribution,
        }
    }

}

fn gate(passed: bool) -> &'static str {
    if passed {
        "meets"
    } else {
        "fails"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct StaticEngine {
        kind: EngineKind,
        id: String,
        latency_ms: u64,
        cost: f64,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StaticEngine {
        fn new(kind: EngineKind, latency_ms: u64, cost: f64) -> Self {
            Self {
                kind,
                id: format!("{kind}-test"),
                latency_ms,
                cost,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(kind: EngineKind) -> Self {
            Self { fail: true, ..Self::new(kind, 0, 0.0) }
        }
    }

    #[async_trait]
    impl InferenceEngine for StaticEngine {
        async fn execute(&self, _payload: &Features) -> std::result::Result<EngineResponse, PredictionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PredictionError::EngineError("boom".to_string()));
            }
            Ok(EngineResponse {
                output: json!("ok"),
                engine: self.kind,
                engine_id: self.id.clone(),
                latency_ms: self.latency_ms,
                cost: self.cost,
            })
        }

        fn kind(&self) -> EngineKind {
            self.kind
        }

        fn engine_id(&self) -> &str {
            &self.id
        }
    }

    /// Suitability computes to 0.9 with the default weights.
    fn suitable_profile(task_type: TaskType) -> TaskProfile {
        TaskProfile {
            task_type,
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

    fn rules_with_threshold(task_type: TaskType, ml_threshold: f64) -> RoutingRules {
        let mut rules = RoutingRules::default();
        let mut rule = rules.rule(task_type);
        rule.ml_threshold = ml_threshold;
        rules.set_rule(task_type, rule);
        rules
    }

    #[test]
    fn test_high_suitability_selects_local_with_matching_confidence() {
        let router = TaskRouter::new(RouterConfig::default())
            .with_rules(rules_with_threshold(TaskType::Classification, 0.75));
        let decision = router.decide(&suitable_profile(TaskType::Classification));

        assert_eq!(decision.engine, EngineKind::LocalModel);
        assert!((decision.confidence - 0.9).abs() < 1e-9);
        assert!(decision.reasoning.contains("meets threshold 0.750"));
    }

    #[test]
    fn test_creative_tasks_pin_to_remote_regardless_of_suitability() {
        let router = TaskRouter::new(RouterConfig::default())
            .with_rules(rules_with_threshold(TaskType::Generation, 0.1));
        let mut profile = suitable_profile(TaskType::Generation);
        profile.creativity_requirement = 0.85;

        let decision = router.decide(&profile);
        assert_eq!(decision.engine, EngineKind::RemoteLlm);
        assert!(decision.reasoning.contains("pinned to remote"));
        // Remote confidence has a 0.5 floor.
        assert!(decision.confidence >= 0.5);
    }

    #[test]
    fn test_low_suitability_routes_remote() {
        let router = TaskRouter::new(RouterConfig::default());
        let mut profile = suitable_profile(TaskType::Classification);
        profile.complexity = 1.0;
        profile.structured_output = false;
        profile.accuracy_requirement = 0.0;
        profile.time_sensitivity = 0.0;
        profile.structuredness = 0.0;

        let decision = router.decide(&profile);
        assert_eq!(decision.engine, EngineKind::RemoteLlm);
        assert!(decision.confidence >= 0.5);
        assert!(decision.reasoning.contains("fails threshold"));
    }

    #[test]
    fn test_cost_gate_blocks_local() {
        let mut rules = rules_with_threshold(TaskType::Scoring, 0.5);
        let mut rule = rules.rule(TaskType::Scoring);
        rule.cost_limit = 0.0001;
        rules.set_rule(TaskType::Scoring, rule);

        let router = TaskRouter::new(RouterConfig::default()).with_rules(rules);
        let decision = router.decide(&suitable_profile(TaskType::Scoring));
        assert_eq!(decision.engine, EngineKind::RemoteLlm);
        assert!(decision.reasoning.contains("fails limit"));
    }

    #[tokio::test]
    async fn test_fallback_is_used_exactly_once() {
        let local = Arc::new(StaticEngine::failing(EngineKind::LocalModel));
        let remote = Arc::new(StaticEngine::new(EngineKind::RemoteLlm, 800, 0.03));
        let router = TaskRouter::new(RouterConfig::default())
            .with_engine(Arc::clone(&local) as Arc<dyn InferenceEngine>)
            .with_engine(Arc::clone(&remote) as Arc<dyn InferenceEngine>)
            .with_rules(rules_with_threshold(TaskType::Classification, 0.5));

        let profile = suitable_profile(TaskType::Classification);
        let (response, decision) =
            router.route_and_execute(&profile, &Features::new()).await.unwrap();

        assert_eq!(response.engine, EngineKind::RemoteLlm);
        assert!(decision.fallback_used);
        assert_eq!(decision.engine, EngineKind::RemoteLlm);
        assert_eq!(local.calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);

        // The failed first attempt stays on the decision, typed.
        assert_eq!(decision.failures.len(), 1);
        assert_eq!(decision.failures[0].engine, EngineKind::LocalModel);
        assert!(matches!(decision.failures[0].error, PredictionError::EngineError(_)));
    }

    #[test]
    fn test_quality_feedback_flips_routing_to_remote() {
        let router = TaskRouter::new(RouterConfig::default())
            .with_rules(rules_with_threshold(TaskType::Classification, 0.5));
        let profile = suitable_profile(TaskType::Classification);
        assert_eq!(router.decide(&profile).engine, EngineKind::LocalModel);

        // Poor observed quality drags the rolling mean below the gate.
        for _ in 0..5 {
            router.record_quality(EngineKind::LocalModel, 0.2);
        }
        let decision = router.decide(&profile);
        assert_eq!(decision.engine, EngineKind::RemoteLlm);
        assert!(decision.reasoning.contains("fails minimum"));
    }

    #[tokio::test]
    async fn test_all_engines_failing_is_a_typed_error() {
        let router = TaskRouter::new(RouterConfig::default())
            .with_engine(Arc::new(StaticEngine::failing(EngineKind::LocalModel)))
            .with_engine(Arc::new(StaticEngine::failing(EngineKind::RemoteLlm)))
            .with_rules(rules_with_threshold(TaskType::Classification, 0.5));

        let profile = suitable_profile(TaskType::Classification);
        let err = router.route_and_execute(&profile, &Features::new()).await.unwrap_err();
        match err {
            RoutingError::AllEnginesFailed { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].engine, EngineKind::LocalModel);
                assert_eq!(attempts[1].engine, EngineKind::RemoteLlm);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(router.routing_stats().error_rate > 0.0);
    }

    #[tokio::test]
    async fn test_adaptive_tuning_steps_threshold_up_and_caps() {
        let config = RouterConfig {
            tune_interval: 5,
            latency_target_ms: 10.0,
            ..RouterConfig::default()
        };
        let router = TaskRouter::new(config)
            .with_engine(Arc::new(StaticEngine::new(EngineKind::LocalModel, 50, 0.001)))
            .with_engine(Arc::new(StaticEngine::new(EngineKind::RemoteLlm, 50, 0.03)))
            .with_rules(rules_with_threshold(TaskType::Classification, 0.6));

        let profile = suitable_profile(TaskType::Classification);
        for _ in 0..5 {
            router.route_and_execute(&profile, &Features::new()).await.unwrap();
        }
        let stepped = router.rule(TaskType::Classification).ml_threshold;
        assert!((stepped - 0.65).abs() < 1e-12);

        // Enough tuning passes to hit the cap; the threshold never
        // exceeds it.
        for _ in 0..50 {
            router.route_and_execute(&profile, &Features::new()).await.unwrap();
        }
        assert!(router.rule(TaskType::Classification).ml_threshold <= 0.9);
    }

    #[tokio::test]
    async fn test_routing_stats_aggregate_history() {
        let router = TaskRouter::new(RouterConfig::default())
            .with_engine(Arc::new(StaticEngine::new(EngineKind::LocalModel, 20, 0.001)))
            .with_engine(Arc::new(StaticEngine::new(EngineKind::RemoteLlm, 900, 0.03)))
            .with_rules(rules_with_threshold(TaskType::Classification, 0.5));

        let local_profile = suitable_profile(TaskType::Classification);
        let mut remote_profile = suitable_profile(TaskType::Generation);
        remote_profile.creativity_requirement = 0.9;

        router.route_and_execute(&local_profile, &Features::new()).await.unwrap();
        router.route_and_execute(&remote_profile, &Features::new()).await.unwrap();

        let stats = router.routing_stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.routing_distribution[&EngineKind::LocalModel], 1);
        assert_eq!(stats.routing_distribution[&EngineKind::RemoteLlm], 1);
        assert!((stats.avg_response_time_ms - 460.0).abs() < 1e-9);
        assert_eq!(stats.error_rate, 0.0);
    }
}
