//! Per-task-type routing rules, with defaults in code and optional TOML
//! overrides.

use super::types::TaskType;
use crate::error::{Result, RoutingError};
use arbiter_abstraction::EngineKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Routing rule for one task type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Engine preferred when the task is ML-suitable.
    pub primary_engine: EngineKind,
    /// Engine to retry with once when execution fails.
    pub fallback_engine: Option<EngineKind>,
    /// Minimum ML-suitability score for the primary engine.
    pub ml_threshold: f64,
    /// Maximum estimated cost (USD) for the primary engine.
    pub cost_limit: f64,
    /// Minimum rolling quality for the primary engine.
    pub quality_minimum: f64,
}

/// The full rule table, one rule per task type.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingRules {
    rules: HashMap<TaskType, RoutingRule>,
}

impl Default for RoutingRules {
    fn default() -> Self {
        let mut rules = HashMap::new();
        for task_type in TaskType::ALL {
            let ml_threshold = match task_type {
                TaskType::Classification | TaskType::Scoring => 0.6,
                TaskType::Extraction => 0.65,
                TaskType::Summarization => 0.7,
                TaskType::Generation => 0.85,
            };
            rules.insert(
                task_type,
                RoutingRule {
                    primary_engine: EngineKind::LocalModel,
                    fallback_engine: Some(EngineKind::RemoteLlm),
                    ml_threshold,
                    cost_limit: 0.05,
                    quality_minimum: 0.7,
                },
            );
        }
        Self { rules }
    }
}

impl RoutingRules {
    /// The rule for a task type. Every type has one.
    #[must_use]
    pub fn rule(&self, task_type: TaskType) -> RoutingRule {
        self.rules.get(&task_type).copied().unwrap_or_else(|| {
            // Default table covers all types; reachable only via a
            // hand-built table.
            RoutingRules::default().rules[&task_type]
        })
    }

    /// Replaces the rule for one task type.
    pub fn set_rule(&mut self, task_type: TaskType, rule: RoutingRule) {
        self.rules.insert(task_type, rule);
    }

    /// Checks every rule for sane bounds.
    ///
    /// # Errors
    /// Returns `RoutingError::Config` naming the offending task type.
    pub fn validate(&self) -> Result<()> {
        for task_type in TaskType::ALL {
            if !self.rules.contains_key(&task_type) {
                return Err(RoutingError::Config(format!("no rule for task type {task_type}")));
            }
        }
        for (task_type, rule) in &self.rules {
            if !(0.0..=1.0).contains(&rule.ml_threshold) {
                return Err(RoutingError::Config(format!(
                    "ml_threshold for {task_type} must be in [0, 1], got {}",
                    rule.ml_threshold
                )));
            }
            if !(0.0..=1.0).contains(&rule.quality_minimum) {
                return Err(RoutingError::Config(format!(
                    "quality_minimum for {task_type} must be in [0, 1], got {}",
                    rule.quality_minimum
                )));
            }
            if rule.cost_limit <= 0.0 {
                return Err(RoutingError::Config(format!(
                    "cost_limit for {task_type} must be positive, got {}",
                    rule.cost_limit
                )));
            }
            if rule.fallback_engine == Some(rule.primary_engine) {
                return Err(RoutingError::Config(format!(
                    "fallback engine for {task_type} equals the primary engine"
                )));
            }
        }
        Ok(())
    }
}

/// One rule as written in the TOML file. Unset fields keep the default.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawRule {
    primary_engine: Option<String>,
    fallback_engine: Option<String>,
    ml_threshold: Option<f64>,
    cost_limit: Option<f64>,
    quality_minimum: Option<f64>,
}

/// Loads routing rules from a TOML file.
///
/// The file holds one table per task type (`[classification]`,
/// `[generation]`, ...); missing tables and fields fall back to the
/// defaults.
pub struct RoutingConfigLoader;

impl RoutingConfigLoader {
    /// Loads and validates a rule table.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed, names an
    /// unknown task type or engine, or fails validation.
    pub fn load(path: &Path) -> Result<RoutingRules> {
        let raw = std::fs::read_to_string(path)?;
        let tables: HashMap<String, RawRule> = toml::from_str(&raw)?;

        let mut rules = RoutingRules::default();
        for (name, table) in tables {
            let task_type = parse_task_type(&name)
                .ok_or_else(|| RoutingError::Config(format!("unknown task type '{name}'")))?;
            let mut rule = rules.rule(task_type);
            if let Some(engine) = table.primary_engine {
                rule.primary_engine = parse_engine(&engine)?;
            }
            if let Some(engine) = table.fallback_engine {
                rule.fallback_engine = Some(parse_engine(&engine)?);
            }
            if let Some(v) = table.ml_threshold {
                rule.ml_threshold = v;
            }
            if let Some(v) = table.cost_limit {
                rule.cost_limit = v;
            }
            if let Some(v) = table.quality_minimum {
                rule.quality_minimum = v;
            }
            rules.set_rule(task_type, rule);
        }
        rules.validate()?;
        info!(path = %path.display(), "Routing rules loaded");
        Ok(rules)
    }
}

fn parse_task_type(name: &str) -> Option<TaskType> {
    match name.to_lowercase().as_str() {
        "classification" => Some(TaskType::Classification),
        "scoring" => Some(TaskType::Scoring),
        "extraction" => Some(TaskType::Extraction),
        "generation" => Some(TaskType::Generation),
        "summarization" => Some(TaskType::Summarization),
        _ => None,
    }
}

fn parse_engine(name: &str) -> Result<EngineKind> {
    EngineKind::parse(name)
        .ok_or_else(|| RoutingError::Config(format!("unknown engine '{name}'")))
}
