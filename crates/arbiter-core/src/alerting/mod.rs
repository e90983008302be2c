//! Structured alerts and the append-only alert log.
//!
//! Alert construction is a pure function of monitor output; each alert
//! type carries a fixed severity. Alerts are immutable once created and
//! persistence is best-effort so a failing store never blocks a monitor
//! tick.

use crate::monitoring::MonitorFinding;
use crate::storage::Repository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;
use uuid::Uuid;

/// How many alerts the in-memory recency buffer retains.
const RECENT_CAPACITY: usize = 100;

/// Classification of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Windowed accuracy dropped against the snapshot baseline.
    PerformanceDegradation,
    /// Input distribution drifted from the baseline slice.
    DriftDetected,
    /// Mean latency exceeded the ceiling.
    HighLatency,
    /// Error rate exceeded the ceiling.
    HighErrorRate,
    /// Active version exceeded its maximum serving age.
    ModelStale,
    /// The fairness/evaluation audit itself failed to run.
    AuditFailure,
    /// A candidate version was blocked from promotion.
    PromotionBlocked,
}

/// Severity of an alert. Fixed per alert type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Error,
}

impl AlertType {
    /// The fixed severity for this alert type.
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            AlertType::PerformanceDegradation
            | AlertType::DriftDetected
            | AlertType::HighErrorRate => Severity::High,
            AlertType::HighLatency | AlertType::ModelStale => Severity::Medium,
            AlertType::AuditFailure | AlertType::PromotionBlocked => Severity::Error,
        }
    }
}

/// A threshold violation record. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert id.
    pub id: String,
    /// Alert classification.
    pub alert_type: AlertType,
    /// Severity, derived from the type.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Model the alert concerns, when applicable.
    pub model: Option<String>,
    /// Structured context for downstream consumers.
    pub metadata: Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Creates an alert; severity follows the type.
    #[must_use]
    pub fn new(alert_type: AlertType, message: String, model: Option<String>, metadata: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            alert_type,
            severity: alert_type.severity(),
            message,
            model,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Maps a monitor finding to its alert. Pure.
    #[must_use]
    pub fn from_finding(finding: &MonitorFinding) -> Self {
        match finding {
            MonitorFinding::Degradation { model, current_accuracy, baseline_accuracy } => {
                Self::new(
                    AlertType::PerformanceDegradation,
                    format!(
                        "Accuracy for '{model}' dropped to {current_accuracy:.3} (baseline {baseline_accuracy:.3})"
                    ),
                    Some(model.clone()),
                    json!({ "current_accuracy": current_accuracy, "baseline_accuracy": baseline_accuracy }),
                )
            }
            MonitorFinding::HighLatency { model, mean_latency_ms } => Self::new(
                AlertType::HighLatency,
                format!("Mean latency for '{model}' is {mean_latency_ms:.0}ms"),
                Some(model.clone()),
                json!({ "mean_latency_ms": mean_latency_ms }),
            ),
            MonitorFinding::HighErrorRate { model, error_rate } => Self::new(
                AlertType::HighErrorRate,
                format!("Error rate for '{model}' is {error_rate:.3}"),
                Some(model.clone()),
                json!({ "error_rate": error_rate }),
            ),
            MonitorFinding::DriftDetected { model, drift_score } => Self::new(
                AlertType::DriftDetected,
                format!("Input drift for '{model}' scored {drift_score:.3}"),
                Some(model.clone()),
                json!({ "drift_score": drift_score }),
            ),
            MonitorFinding::ModelStale { model, age_days } => Self::new(
                AlertType::ModelStale,
                format!("Active version of '{model}' is {age_days} days old"),
                Some(model.clone()),
                json!({ "age_days": age_days }),
            ),
        }
    }
}

/// Append-only alert log over the repository.
pub struct AlertLog {
    repo: Arc<dyn Repository>,
    seq: AtomicU64,
    recent: RwLock<VecDeque<Alert>>,
}

impl AlertLog {
    /// Opens the log, resuming the sequence from persisted entries.
    #[must_use]
    pub fn open(repo: Arc<dyn Repository>) -> Self {
        let seq = repo.list("alerts/").map(|keys| keys.len() as u64).unwrap_or(0);
        Self { repo, seq: AtomicU64::new(seq), recent: RwLock::new(VecDeque::new()) }
    }

    /// Appends an alert. Persistence is best-effort: a write failure is
    /// logged and the alert still lands in the recency buffer.
    pub fn append(&self, alert: Alert) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let key = format!("alerts/{seq:08}");
        match serde_json::to_value(&alert) {
            Ok(value) => {
                if let Err(e) = self.repo.put(&key, &value) {
                    warn!(alert_id = %alert.id, error = %e, "Failed to persist alert (non-blocking)");
                }
            }
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "Failed to serialize alert (non-blocking)");
            }
        }

        let mut recent = self.recent.write().unwrap_or_else(PoisonError::into_inner);
        recent.push_back(alert);
        while recent.len() > RECENT_CAPACITY {
            recent.pop_front();
        }
    }

    /// The `n` most recent alerts, newest first.
    pub fn recent(&self, n: usize) -> Vec<Alert> {
        let recent = self.recent.read().unwrap_or_else(PoisonError::into_inner);
        recent.iter().rev().take(n).cloned().collect()
    }

    /// Total alerts appended since the log was first opened.
    pub fn len(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Whether the log has never seen an alert.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
