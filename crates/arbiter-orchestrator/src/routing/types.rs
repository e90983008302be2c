//! Routing data types: task profiles, decisions, and aggregate stats.

use arbiter_abstraction::EngineKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The class of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Assign one of a fixed set of labels.
    Classification,
    /// Produce a numeric score.
    Scoring,
    /// Pull structured fields out of unstructured input.
    Extraction,
    /// Open-ended text generation.
    Generation,
    /// Condense input into a shorter form.
    Summarization,
}

impl TaskType {
    /// All task types, for iterating rule tables.
    pub const ALL: [TaskType; 5] = [
        TaskType::Classification,
        TaskType::Scoring,
        TaskType::Extraction,
        TaskType::Generation,
        TaskType::Summarization,
    ];
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Classification => "classification",
            TaskType::Scoring => "scoring",
            TaskType::Extraction => "extraction",
            TaskType::Generation => "generation",
            TaskType::Summarization => "summarization",
        };
        write!(f, "{s}")
    }
}

/// Characterization of one task, produced by the profiler.
///
/// All scalar fields are in `[0, 1]` except `data_volume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProfile {
    /// The class of work.
    pub task_type: TaskType,
    /// Estimated task complexity.
    pub complexity: f64,
    /// Payload size in bytes (serialized).
    pub data_volume: usize,
    /// How latency-sensitive the caller is.
    pub time_sensitivity: f64,
    /// How cost-sensitive the caller is.
    pub cost_sensitivity: f64,
    /// Required output accuracy.
    pub accuracy_requirement: f64,
    /// Fraction of the payload that is flat, scalar data.
    pub structuredness: f64,
    /// Whether the output must conform to a schema.
    pub structured_output: bool,
    /// How much open-ended creativity the task needs.
    pub creativity_requirement: f64,
}

/// Weights for the ML-suitability score.
///
/// Negative weights push a factor toward the remote engine; positive
/// weights toward the local model. The raw weighted sum is normalized
/// into `[0, 1]` by shifting by the magnitude of the negative weights
/// and dividing by the total span.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuitabilityWeights {
    pub complexity: f64,
    pub structuredness: f64,
    pub creativity: f64,
    pub time_sensitivity: f64,
    pub accuracy: f64,
    pub structured_output: f64,
}

impl Default for SuitabilityWeights {
    fn default() -> Self {
        Self {
            complexity: -0.3,
            structuredness: 0.2,
            creativity: -0.4,
            time_sensitivity: 0.1,
            accuracy: 0.1,
            structured_output: 0.2,
        }
    }
}

impl SuitabilityWeights {
    /// The ML-suitability score for a profile, in `[0, 1]`.
    #[must_use]
    pub fn suitability(&self, profile: &TaskProfile) -> f64 {
        let raw = self.complexity * profile.complexity
            + self.structuredness * profile.structuredness
            + self.creativity * profile.creativity_requirement
            + self.time_sensitivity * profile.time_sensitivity
            + self.accuracy * profile.accuracy_requirement
            + self.structured_output * f64::from(profile.structured_output);

        let negative: f64 = [
            self.complexity,
            self.structuredness,
            self.creativity,
            self.time_sensitivity,
            self.accuracy,
            self.structured_output,
        ]
        .iter()
        .filter(|w| **w < 0.0)
        .sum::<f64>()
        .abs();
        let span: f64 = [
            self.complexity,
            self.structuredness,
            self.creativity,
            self.time_sensitivity,
            self.accuracy,
            self.structured_output,
        ]
        .iter()
        .map(|w| w.abs())
        .sum();

        if span == 0.0 {
            return 0.5;
        }
        ((raw + negative) / span).clamp(0.0, 1.0)
    }
}

/// The outcome of routing one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// The task class this decision was made for.
    pub task_type: TaskType,
    /// Selected engine.
    pub engine: EngineKind,
    /// Decision confidence in `[0, 1]`.
    pub confidence: f64,
    /// Which gates passed or failed, for the audit trail.
    pub reasoning: String,
    /// Estimated cost of the selected engine for this task.
    pub cost_estimate: f64,
    /// Whether execution fell back to the secondary engine.
    pub fallback_used: bool,
    /// Attempts that failed before the served response, if any.
    pub failures: Vec<crate::error::FailureRecord>,
    /// Observed execution latency, filled in after execution.
    pub execution_time_ms: Option<u64>,
    /// Observed execution cost, filled in after execution.
    pub observed_cost: Option<f64>,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

/// Aggregate routing statistics over the bounded decision history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingStats {
    /// Total routed requests since startup.
    pub total_requests: u64,
    /// Mean observed latency across the history.
    pub avg_response_time_ms: f64,
    /// Mean observed cost across the history.
    pub avg_cost: f64,
    /// Fraction of requests where every engine failed.
    pub error_rate: f64,
    /// Requests per selected engine kind, across the history.
    pub routing_distribution: HashMap<EngineKind, u64>,
}
