//! Configuration for monitoring and registry acceptance.

use serde::{Deserialize, Serialize};

/// Tunables for the performance monitor and its background loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between monitor ticks, in seconds.
    pub tick_interval_secs: u64,
    /// Maximum records retained per model (oldest evicted on overflow).
    pub window_size: usize,
    /// Number of most-recent records considered when recomputing metrics.
    pub metrics_window: usize,
    /// Minimum ground-truthed records required before metrics are computed.
    pub min_labeled: usize,
    /// Accuracy drop (vs. snapshot baseline) that counts as degradation.
    pub degradation_fraction: f64,
    /// Mean latency above this is flagged, in milliseconds.
    pub latency_threshold_ms: f64,
    /// Error rate above this is flagged.
    pub error_rate_threshold: f64,
    /// Drift score above this is flagged.
    pub drift_threshold: f64,
    /// Slice length used for the drift baseline/recent comparison.
    pub drift_slice: usize,
    /// Prior snapshots averaged to form the degradation baseline.
    pub baseline_snapshots: usize,
    /// Metrics snapshots retained per model for trend analysis.
    pub snapshot_history: usize,
    /// Active versions older than this many days are queued for retraining.
    pub max_model_age_days: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 300,
            window_size: 1000,
            metrics_window: 100,
            min_labeled: 10,
            degradation_fraction: 0.1,
            latency_threshold_ms: 1000.0,
            error_rate_threshold: 0.1,
            drift_threshold: 0.3,
            drift_slice: 100,
            baseline_snapshots: 9,
            snapshot_history: 50,
            max_model_age_days: 90,
        }
    }
}

/// Acceptance bar for registering a model version as active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Minimum accuracy a candidate must report at registration.
    pub min_accuracy: f64,
    /// Minimum audit score a candidate must carry.
    pub min_audit_score: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { min_accuracy: 0.7, min_audit_score: 0.8 }
    }
}
