//! Task profiling heuristics.
//!
//! The profiler turns a task type plus raw payload into a [`TaskProfile`]
//! using cheap keyword and size heuristics. No model call is involved;
//! profiling must stay orders of magnitude cheaper than the task itself.

use super::types::{TaskProfile, TaskType};
use arbiter_abstraction::Features;
use serde_json::Value;
use tracing::trace;

/// Keywords that mark a payload as needing open-ended creativity.
const CREATIVE_KEYWORDS: [&str; 5] = ["creative", "story", "poem", "brainstorm", "imagine"];

/// Keywords that mark a payload as analytically complex.
const COMPLEX_KEYWORDS: [&str; 5] = ["analyze", "reason", "explain", "compare", "multi-step"];

/// Weights for the complexity estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplexityWeights {
    /// Weight of the payload-size factor.
    pub size: f64,
    /// Weight of the nesting-depth factor.
    pub nesting: f64,
    /// Weight of the keyword factor.
    pub keywords: f64,
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        Self { size: 0.4, nesting: 0.3, keywords: 0.3 }
    }
}

/// Produces [`TaskProfile`]s from task type and payload.
#[derive(Debug, Clone, Default)]
pub struct TaskProfiler {
    weights: ComplexityWeights,
}

impl TaskProfiler {
    /// Creates a profiler with the default complexity weights.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a profiler with custom complexity weights.
    #[must_use]
    pub fn with_weights(weights: ComplexityWeights) -> Self {
        Self { weights }
    }

    /// Profiles a task. Scalar overrides in the payload
    /// (`accuracy_requirement`, `time_sensitivity`, `cost_sensitivity`)
    /// take precedence over the per-type defaults, clamped to `[0, 1]`.
    #[must_use]
    pub fn profile(&self, task_type: TaskType, payload: &Features) -> TaskProfile {
        let data_volume = payload_bytes(payload);
        let complexity = self.complexity(payload, data_volume);
        let structuredness = structuredness(payload);
        let creativity_requirement = creativity(task_type, payload);
        let structured_output = matches!(
            task_type,
            TaskType::Classification | TaskType::Scoring | TaskType::Extraction
        ) || payload.contains_key("output_schema");

        let accuracy_default = match task_type {
            TaskType::Scoring => 0.85,
            TaskType::Classification => 0.8,
            TaskType::Extraction => 0.75,
            TaskType::Summarization => 0.6,
            TaskType::Generation => 0.5,
        };

        let profile = TaskProfile {
            task_type,
            complexity,
            data_volume,
            time_sensitivity: scalar_override(payload, "time_sensitivity")
                .unwrap_or_else(|| deadline_sensitivity(payload)),
            cost_sensitivity: scalar_override(payload, "cost_sensitivity").unwrap_or(0.5),
            accuracy_requirement: scalar_override(payload, "accuracy_requirement")
                .unwrap_or(accuracy_default),
            structuredness,
            structured_output,
            creativity_requirement,
        };
        trace!(
            task = %task_type,
            complexity = profile.complexity,
            creativity = profile.creativity_requirement,
            volume = profile.data_volume,
            "Task profiled"
        );
        profile
    }

    fn complexity(&self, payload: &Features, data_volume: usize) -> f64 {
        // Size factor saturates at ~10 KiB of payload.
        let size_factor = (data_volume as f64 / 10_240.0).min(1.0);
        let nested = payload.values().filter(|v| v.is_object() || v.is_array()).count();
        let nesting_factor = if payload.is_empty() {
            0.0
        } else {
            nested as f64 / payload.len() as f64
        };
        let hits = keyword_hits(payload, &COMPLEX_KEYWORDS);
        let keyword_factor = (hits as f64 / 2.0).min(1.0);

        (self.weights.size * size_factor
            + self.weights.nesting * nesting_factor
            + self.weights.keywords * keyword_factor)
            .clamp(0.0, 1.0)
    }
}

fn payload_bytes(payload: &Features) -> usize {
    serde_json::to_string(payload).map(|s| s.len()).unwrap_or(0)
}

/// Fraction of payload values that are flat scalars.
fn structuredness(payload: &Features) -> f64 {
    if payload.is_empty() {
        return 0.0;
    }
    let scalar = payload
        .values()
        .filter(|v| v.is_number() || v.is_boolean() || matches!(v, Value::String(s) if s.len() <= 64))
        .count();
    scalar as f64 / payload.len() as f64
}

fn creativity(task_type: TaskType, payload: &Features) -> f64 {
    let base = match task_type {
        TaskType::Generation => 0.9,
        TaskType::Summarization => 0.5,
        TaskType::Extraction => 0.2,
        TaskType::Classification | TaskType::Scoring => 0.1,
    };
    let bump: f64 = if keyword_hits(payload, &CREATIVE_KEYWORDS) > 0 { 0.2 } else { 0.0 };
    (base + bump).min(1.0)
}

fn deadline_sensitivity(payload: &Features) -> f64 {
    match payload.get("deadline_ms").and_then(Value::as_f64) {
        Some(ms) if ms < 1000.0 => 1.0,
        Some(ms) if ms < 5000.0 => 0.8,
        Some(_) => 0.6,
        None => 0.5,
    }
}

fn scalar_override(payload: &Features, key: &str) -> Option<f64> {
    payload.get(key).and_then(Value::as_f64).map(|v| v.clamp(0.0, 1.0))
}

fn keyword_hits(payload: &Features, keywords: &[&str]) -> usize {
    payload
        .values()
        .filter_map(Value::as_str)
        .map(|text| {
            let lower = text.to_lowercase();
            keywords.iter().filter(|k| lower.contains(*k)).count()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn features(pairs: &[(&str, Value)]) -> Features {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_generation_tasks_profile_as_creative() {
        let profiler = TaskProfiler::new();
        let p = profiler.profile(TaskType::Generation, &features(&[("prompt", json!("hello"))]));
        assert!(p.creativity_requirement >= 0.8);
        assert!(!p.structured_output);

        let p = profiler.profile(
            TaskType::Summarization,
            &features(&[("text", json!("write a creative story about rust"))]),
        );
        assert!((p.creativity_requirement - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_scalar_payload_is_fully_structured() {
        let profiler = TaskProfiler::new();
        let p = profiler.profile(
            TaskType::Classification,
            &features(&[("age", json!(41)), ("active", json!(true)), ("tier", json!("gold"))]),
        );
        assert_eq!(p.structuredness, 1.0);
        assert!(p.structured_output);
        assert_eq!(p.accuracy_requirement, 0.8);
    }

    #[test]
    fn test_nested_payload_raises_complexity() {
        let profiler = TaskProfiler::new();
        let flat = profiler.profile(TaskType::Scoring, &features(&[("x", json!(1))]));
        let nested = profiler.profile(
            TaskType::Scoring,
            &features(&[
                ("x", json!({ "a": [1, 2, 3], "b": { "c": 4 } })),
                ("y", json!([1, 2, 3])),
            ]),
        );
        assert!(nested.complexity > flat.complexity);
    }

    #[test]
    fn test_payload_overrides_are_clamped() {
        let profiler = TaskProfiler::new();
        let p = profiler.profile(
            TaskType::Extraction,
            &features(&[
                ("accuracy_requirement", json!(7.5)),
                ("cost_sensitivity", json!(0.9)),
                ("deadline_ms", json!(500)),
            ]),
        );
        assert_eq!(p.accuracy_requirement, 1.0);
        assert_eq!(p.cost_sensitivity, 0.9);
        assert_eq!(p.time_sensitivity, 1.0);
    }
}
