//! Production performance monitoring.
//!
//! Every served prediction is appended to a bounded per-model sliding
//! window. Metrics are recomputed over the trailing window and compared
//! against snapshot history to detect degradation; feature distributions
//! are compared against a baseline slice to score input drift.

pub mod drift;

use crate::config::MonitorConfig;
use arbiter_abstraction::{is_positive, Features};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

/// One observed prediction outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// When the prediction was served.
    pub timestamp: DateTime<Utc>,
    /// Model that served it.
    pub model_name: String,
    /// Input features at prediction time.
    pub features: Features,
    /// The prediction itself.
    pub prediction: Value,
    /// Ground truth, when the caller has it.
    pub actual: Option<Value>,
    /// Observed latency in milliseconds.
    pub latency_ms: Option<f64>,
}

/// Aggregated window snapshot for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Accuracy over the trailing window; `None` until enough
    /// ground-truthed records exist.
    pub accuracy: Option<f64>,
    /// Positive-class precision (discrete outputs only).
    pub precision: Option<f64>,
    /// Positive-class recall (discrete outputs only).
    pub recall: Option<f64>,
    /// F1 score (discrete outputs only).
    pub f1: Option<f64>,
    /// Mean latency over the trailing window.
    pub mean_latency_ms: Option<f64>,
    /// Fraction of failed executions over the outcome window.
    pub error_rate: f64,
    /// Mean per-feature KS statistic vs. the baseline slice.
    pub drift_score: f64,
    /// Ground-truthed records that backed the accuracy figures.
    pub labeled_count: usize,
    /// When this snapshot was computed.
    pub computed_at: DateTime<Utc>,
}

/// A threshold violation surfaced by a monitor tick.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorFinding {
    /// Accuracy dropped versus the snapshot baseline.
    Degradation {
        /// Model name.
        model: String,
        /// Accuracy in the current snapshot.
        current_accuracy: f64,
        /// Mean accuracy of the prior snapshots.
        baseline_accuracy: f64,
    },
    /// Mean latency exceeded the configured ceiling.
    HighLatency {
        /// Model name.
        model: String,
        /// Mean latency in the current snapshot.
        mean_latency_ms: f64,
    },
    /// Error rate exceeded the configured ceiling.
    HighErrorRate {
        /// Model name.
        model: String,
        /// Error rate in the current snapshot.
        error_rate: f64,
    },
    /// Input distribution drifted away from the baseline slice.
    DriftDetected {
        /// Model name.
        model: String,
        /// Drift score in the current snapshot.
        drift_score: f64,
    },
    /// The active version exceeded the maximum serving age.
    ModelStale {
        /// Model name.
        model: String,
        /// Age of the active version in days.
        age_days: i64,
    },
}

impl MonitorFinding {
    /// The model this finding concerns.
    #[must_use]
    pub fn model(&self) -> &str {
        match self {
            Self::Degradation { model, .. }
            | Self::HighLatency { model, .. }
            | Self::HighErrorRate { model, .. }
            | Self::DriftDetected { model, .. }
            | Self::ModelStale { model, .. } => model,
        }
    }
}

#[derive(Debug, Default)]
struct ModelWindow {
    records: VecDeque<PerformanceRecord>,
    /// Success/failure outcome per execution attempt, failures included.
    outcomes: VecDeque<bool>,
    snapshots: VecDeque<ModelMetrics>,
}

/// Records (prediction, outcome) pairs and computes windowed metrics.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    /// Map lock only guards the map shape; each model has its own lock.
    windows: RwLock<HashMap<String, Arc<Mutex<ModelWindow>>>>,
    total_predictions: AtomicU64,
}

impl PerformanceMonitor {
    /// Creates a monitor with the given tunables.
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
            total_predictions: AtomicU64::new(0),
        }
    }

    fn window(&self, model_name: &str) -> Arc<Mutex<ModelWindow>> {
        {
            let windows = self.windows.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(window) = windows.get(model_name) {
                return Arc::clone(window);
            }
        }
        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(windows.entry(model_name.to_string()).or_default())
    }

    /// Appends an observed prediction to the model's sliding window.
    pub fn record_prediction(
        &self,
        model_name: &str,
        features: Features,
        prediction: Value,
        actual: Option<Value>,
        latency_ms: Option<f64>,
    ) {
        let record = PerformanceRecord {
            timestamp: Utc::now(),
            model_name: model_name.to_string(),
            features,
            prediction,
            actual,
            latency_ms,
        };

        let window = self.window(model_name);
        let mut window = window.lock().unwrap_or_else(PoisonError::into_inner);
        window.records.push_back(record);
        while window.records.len() > self.config.window_size {
            window.records.pop_front();
        }
        window.outcomes.push_back(true);
        while window.outcomes.len() > self.config.window_size {
            window.outcomes.pop_front();
        }
        self.total_predictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed execution attempt; feeds the error rate.
    pub fn record_failure(&self, model_name: &str) {
        let window = self.window(model_name);
        let mut window = window.lock().unwrap_or_else(PoisonError::into_inner);
        window.outcomes.push_back(false);
        while window.outcomes.len() > self.config.window_size {
            window.outcomes.pop_front();
        }
    }

    /// Recomputes the metrics snapshot for one model.
    ///
    /// Returns `None` for an untracked model. Accuracy fields stay `None`
    /// until the trailing window holds enough ground-truthed records.
    pub fn compute_metrics(&self, model_name: &str) -> Option<ModelMetrics> {
        let window = {
            let windows = self.windows.read().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(windows.get(model_name)?)
        };
        let window = window.lock().unwrap_or_else(PoisonError::into_inner);
        Some(self.metrics_of(&window))
    }

    fn metrics_of(&self, window: &ModelWindow) -> ModelMetrics {
        let recent: Vec<&PerformanceRecord> = window
            .records
            .iter()
            .rev()
            .take(self.config.metrics_window)
            .collect();

        let labeled: Vec<(&Value, &Value)> = recent
            .iter()
            .filter_map(|r| r.actual.as_ref().map(|a| (&r.prediction, a)))
            .collect();

        let (accuracy, precision, recall, f1) = if labeled.len() >= self.config.min_labeled {
            classification_metrics(&labeled)
        } else {
            (None, None, None, None)
        };

        let latencies: Vec<f64> = recent.iter().filter_map(|r| r.latency_ms).collect();
        let mean_latency_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
        };

        let error_rate = if window.outcomes.is_empty() {
            0.0
        } else {
            let failures = window.outcomes.iter().filter(|ok| !**ok).count();
            failures as f64 / window.outcomes.len() as f64
        };

        ModelMetrics {
            accuracy,
            precision,
            recall,
            f1,
            mean_latency_ms,
            error_rate,
            drift_score: self.drift_of(window),
            labeled_count: labeled.len(),
            computed_at: Utc::now(),
        }
    }

    /// Splits the window into recent/baseline slices and scores drift.
    fn drift_of(&self, window: &ModelWindow) -> f64 {
        let slice = self.config.drift_slice;
        let records: Vec<&PerformanceRecord> = window.records.iter().collect();
        if records.is_empty() {
            return 0.0;
        }

        let recent: Vec<&Features> =
            records.iter().rev().take(slice).map(|r| &r.features).collect();
        // With fewer than two full slices the baseline is the recent slice
        // itself, which scores exactly zero.
        let baseline: Vec<&Features> = if records.len() >= slice * 2 {
            records.iter().take(slice).map(|r| &r.features).collect()
        } else {
            recent.clone()
        };

        drift::drift_score(&baseline, &recent)
    }

    /// Runs all threshold checks across tracked models and advances the
    /// snapshot history. Called once per monitor tick.
    pub fn run_checks(&self) -> Vec<MonitorFinding> {
        let mut findings = Vec::new();
        for model in self.model_names() {
            let window = self.window(&model);
            let mut window = window.lock().unwrap_or_else(PoisonError::into_inner);
            let metrics = self.metrics_of(&window);

            // Degradation baseline: mean accuracy of the prior snapshots.
            if let Some(current) = metrics.accuracy {
                let prior: Vec<f64> = window
                    .snapshots
                    .iter()
                    .rev()
                    .take(self.config.baseline_snapshots)
                    .filter_map(|s| s.accuracy)
                    .collect();
                if !prior.is_empty() {
                    let baseline = prior.iter().sum::<f64>() / prior.len() as f64;
                    if baseline - current > self.config.degradation_fraction {
                        findings.push(MonitorFinding::Degradation {
                            model: model.clone(),
                            current_accuracy: current,
                            baseline_accuracy: baseline,
                        });
                    }
                }
            }

            if let Some(mean) = metrics.mean_latency_ms {
                if mean > self.config.latency_threshold_ms {
                    findings.push(MonitorFinding::HighLatency {
                        model: model.clone(),
                        mean_latency_ms: mean,
                    });
                }
            }

            if metrics.error_rate > self.config.error_rate_threshold {
                findings.push(MonitorFinding::HighErrorRate {
                    model: model.clone(),
                    error_rate: metrics.error_rate,
                });
            }

            if metrics.drift_score > self.config.drift_threshold {
                findings.push(MonitorFinding::DriftDetected {
                    model: model.clone(),
                    drift_score: metrics.drift_score,
                });
            }

            window.snapshots.push_back(metrics);
            while window.snapshots.len() > self.config.snapshot_history {
                window.snapshots.pop_front();
            }
        }

        debug!(findings = findings.len(), "Monitor checks completed");
        findings
    }

    /// The most recent snapshot for a model, if any tick has run.
    pub fn latest_metrics(&self, model_name: &str) -> Option<ModelMetrics> {
        let window = {
            let windows = self.windows.read().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(windows.get(model_name)?)
        };
        let window = window.lock().unwrap_or_else(PoisonError::into_inner);
        window.snapshots.back().cloned()
    }

    /// Retained snapshot history for trend analysis, oldest first.
    pub fn metrics_history(&self, model_name: &str) -> Vec<ModelMetrics> {
        let Some(window) = ({
            let windows = self.windows.read().unwrap_or_else(PoisonError::into_inner);
            windows.get(model_name).map(Arc::clone)
        }) else {
            return Vec::new();
        };
        let window = window.lock().unwrap_or_else(PoisonError::into_inner);
        window.snapshots.iter().cloned().collect()
    }

    /// All model names with at least one recorded event.
    pub fn model_names(&self) -> Vec<String> {
        let windows = self.windows.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = windows.keys().cloned().collect();
        names.sort();
        names
    }

    /// Lifetime count of recorded predictions.
    pub fn total_predictions(&self) -> u64 {
        self.total_predictions.load(Ordering::Relaxed)
    }
}

fn is_integer_like(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64().is_some_and(|v| v.fract() == 0.0),
        _ => true,
    }
}

/// Computes (accuracy, precision, recall, f1) over labeled pairs.
///
/// Numeric pairs with fractional values are treated as continuous output:
/// a prediction within 10% of the actual counts as a match and the
/// positive-class metrics are undefined.
fn classification_metrics(
    labeled: &[(&Value, &Value)],
) -> (Option<f64>, Option<f64>, Option<f64>, Option<f64>) {
    let all_numeric = labeled.iter().all(|(p, a)| p.is_number() && a.is_number());
    let continuous =
        all_numeric && labeled.iter().any(|(p, a)| !is_integer_like(p) || !is_integer_like(a));

    if continuous {
        let matches = labeled
            .iter()
            .filter(|(p, a)| {
                let (p, a) = (p.as_f64().unwrap_or(0.0), a.as_f64().unwrap_or(0.0));
                if a == 0.0 {
                    p == 0.0
                } else {
                    ((p - a) / a).abs() <= 0.1
                }
            })
            .count();
        return (Some(matches as f64 / labeled.len() as f64), None, None, None);
    }

    let correct = labeled.iter().filter(|(p, a)| p == a).count();
    let accuracy = correct as f64 / labeled.len() as f64;

    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (prediction, actual) in labeled {
        match (is_positive(prediction), is_positive(actual)) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => {}
        }
    }

    let precision = (tp + fp > 0).then(|| tp as f64 / (tp + fp) as f64);
    let recall = (tp + fn_ > 0).then(|| tp as f64 / (tp + fn_) as f64);
    let f1 = match (precision, recall) {
        (Some(p), Some(r)) if p + r > 0.0 => Some(2.0 * p * r / (p + r)),
        _ => None,
    };

    (Some(accuracy), precision, recall, f1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn features(x: f64) -> Features {
        let mut f = Features::new();
        f.insert("x".to_string(), json!(x));
        f
    }

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::new(MonitorConfig::default())
    }

    #[test]
    fn test_metrics_require_min_labeled() {
        let m = monitor();
        for _ in 0..5 {
            m.record_prediction("clf", features(1.0), json!(1), Some(json!(1)), Some(5.0));
        }
        let metrics = m.compute_metrics("clf").unwrap();
        assert!(metrics.accuracy.is_none());
        assert_eq!(metrics.labeled_count, 5);
    }

    #[test]
    fn test_discrete_metrics() {
        let m = monitor();
        // 8 true positives, 2 false positives, 5 true negatives,
        // 5 false negatives.
        for _ in 0..8 {
            m.record_prediction("clf", features(1.0), json!(1), Some(json!(1)), None);
        }
        for _ in 0..2 {
            m.record_prediction("clf", features(1.0), json!(1), Some(json!(0)), None);
        }
        for _ in 0..5 {
            m.record_prediction("clf", features(1.0), json!(0), Some(json!(0)), None);
        }
        for _ in 0..5 {
            m.record_prediction("clf", features(1.0), json!(0), Some(json!(1)), None);
        }

        let metrics = m.compute_metrics("clf").unwrap();
        assert_eq!(metrics.accuracy, Some(13.0 / 20.0));
        assert_eq!(metrics.precision, Some(0.8));
        assert_eq!(metrics.recall, Some(8.0 / 13.0));
        assert!(metrics.f1.unwrap() > 0.0);
    }

    #[test]
    fn test_continuous_tolerance_matching() {
        let m = monitor();
        // Within 10% of actual: match. 109 vs 100 matches, 120 does not.
        for _ in 0..6 {
            m.record_prediction("reg", features(1.0), json!(109.0), Some(json!(100.0)), None);
        }
        for _ in 0..6 {
            m.record_prediction("reg", features(1.0), json!(120.0), Some(json!(100.0)), None);
        }
        let metrics = m.compute_metrics("reg").unwrap();
        assert_eq!(metrics.accuracy, Some(0.5));
        assert!(metrics.precision.is_none());
    }

    #[test]
    fn test_trailing_window_reflects_injected_errors() {
        // 1000 correct predictions, then 100 wrong ones: the trailing
        // 100-record window must reflect the injected error rate, not the
        // full-history rate.
        let m = monitor();
        for _ in 0..1000 {
            m.record_prediction("clf", features(1.0), json!(1), Some(json!(1)), None);
        }
        assert_eq!(m.compute_metrics("clf").unwrap().accuracy, Some(1.0));

        for _ in 0..100 {
            m.record_prediction("clf", features(1.0), json!(0), Some(json!(1)), None);
        }
        let metrics = m.compute_metrics("clf").unwrap();
        assert_eq!(metrics.accuracy, Some(0.0));
    }

    #[test]
    fn test_window_eviction_bounds_memory() {
        let m = PerformanceMonitor::new(MonitorConfig {
            window_size: 10,
            ..MonitorConfig::default()
        });
        for i in 0..100 {
            m.record_prediction("clf", features(f64::from(i)), json!(1), None, None);
        }
        let windows = m.windows.read().unwrap();
        let window = windows.get("clf").unwrap().lock().unwrap();
        assert_eq!(window.records.len(), 10);
    }

    #[test]
    fn test_drift_zero_until_two_slices_then_detects_shift() {
        let m = monitor();
        for i in 0..100 {
            m.record_prediction("clf", features(f64::from(i % 10)), json!(1), None, None);
        }
        // Fewer than two full slices: baseline == recent, drift exactly 0.
        assert_eq!(m.compute_metrics("clf").unwrap().drift_score, 0.0);

        for i in 0..100 {
            m.record_prediction("clf", features(f64::from(i % 10) + 50.0), json!(1), None, None);
        }
        let metrics = m.compute_metrics("clf").unwrap();
        assert!(metrics.drift_score > 0.9, "expected drift, got {}", metrics.drift_score);
    }

    #[test]
    fn test_error_rate_from_failures() {
        let m = monitor();
        for _ in 0..8 {
            m.record_prediction("clf", features(1.0), json!(1), None, None);
        }
        m.record_failure("clf");
        m.record_failure("clf");
        let metrics = m.compute_metrics("clf").unwrap();
        assert_eq!(metrics.error_rate, 0.2);
    }

    #[test]
    fn test_run_checks_flags_degradation() {
        let m = monitor();
        for _ in 0..100 {
            m.record_prediction("clf", features(1.0), json!(1), Some(json!(1)), Some(5.0));
        }
        // Build snapshot history at full accuracy.
        for _ in 0..3 {
            assert!(m.run_checks().is_empty());
        }
        // Collapse accuracy in the trailing window.
        for _ in 0..100 {
            m.record_prediction("clf", features(1.0), json!(0), Some(json!(1)), Some(5.0));
        }
        let findings = m.run_checks();
        assert!(findings
            .iter()
            .any(|f| matches!(f, MonitorFinding::Degradation { model, .. } if model == "clf")));
    }

    #[test]
    fn test_metrics_history_keeps_bounded_trend_oldest_first() {
        let m = PerformanceMonitor::new(MonitorConfig {
            snapshot_history: 3,
            ..MonitorConfig::default()
        });
        assert!(m.metrics_history("clf").is_empty());

        for _ in 0..20 {
            m.record_prediction("clf", features(1.0), json!(1), Some(json!(1)), Some(5.0));
        }
        m.run_checks();
        m.run_checks();
        let history = m.metrics_history("clf");
        assert_eq!(history.len(), 2);
        assert!(history[0].computed_at <= history[1].computed_at);
        assert_eq!(history.last(), m.latest_metrics("clf").as_ref());

        // History is capped at the configured depth.
        for _ in 0..5 {
            m.run_checks();
        }
        assert_eq!(m.metrics_history("clf").len(), 3);
    }

    #[test]
    fn test_run_checks_flags_latency_and_error_rate() {
        let m = monitor();
        for _ in 0..20 {
            m.record_prediction("slow", features(1.0), json!(1), Some(json!(1)), Some(2500.0));
        }
        for _ in 0..5 {
            m.record_failure("slow");
        }
        let findings = m.run_checks();
        assert!(findings.iter().any(|f| matches!(f, MonitorFinding::HighLatency { .. })));
        assert!(findings.iter().any(|f| matches!(f, MonitorFinding::HighErrorRate { .. })));
    }
}
