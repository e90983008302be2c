//! Engine abstraction layer for Arbiter.
//!
//! This crate defines the capability traits the routing and audit layers
//! depend on: a synchronous [`Predictor`] for local predictive models, an
//! async [`InferenceEngine`] for anything a task can be executed against,
//! and the shared error/response types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Feature map passed to predictors and engines.
///
/// Values are JSON so numeric, categorical, and nested payloads all travel
/// through the same type.
pub type Features = HashMap<String, serde_json::Value>;

/// Represents an error that can occur when executing a model or engine.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PredictionError {
    /// The engine call itself failed (e.g., network issues, process error).
    #[error("Engine Error: {0}")]
    EngineError(String),

    /// The input features were missing or malformed for this model.
    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    /// A stored model artifact could not be loaded or deserialized.
    #[error("Model Load Error: {0}")]
    ModelLoadError(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    SerializationError(String),

    /// The requested engine is not registered or configured.
    #[error("Unknown Engine: {0}")]
    UnknownEngine(String),

    /// Other unexpected errors.
    #[error("Other Prediction Error: {0}")]
    Other(String),
}

/// Which class of engine served (or should serve) a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Cheap local predictive model.
    LocalModel,
    /// Remote large-language-model call.
    RemoteLlm,
    /// Combined local + remote ensemble.
    Ensemble,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::LocalModel => write!(f, "local-model"),
            EngineKind::RemoteLlm => write!(f, "remote-llm"),
            EngineKind::Ensemble => write!(f, "ensemble"),
        }
    }
}

impl EngineKind {
    /// Parses an engine kind from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local-model" | "local_model" | "local" => Some(EngineKind::LocalModel),
            "remote-llm" | "remote_llm" | "remote" => Some(EngineKind::RemoteLlm),
            "ensemble" => Some(EngineKind::Ensemble),
            _ => None,
        }
    }
}

/// Output of a single prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutput {
    /// The predicted value (class label, score, or structured payload).
    pub value: serde_json::Value,
    /// Optional model-reported confidence in [0, 1].
    pub confidence: Option<f64>,
}

impl PredictionOutput {
    /// Creates an output with no confidence attached.
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self { value, confidence: None }
    }

    /// Creates an output with a confidence score.
    #[must_use]
    pub fn with_confidence(value: serde_json::Value, confidence: f64) -> Self {
        Self { value, confidence: Some(confidence) }
    }
}

/// The response from executing a task against an engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    /// The produced output.
    pub output: serde_json::Value,
    /// Engine that produced the output.
    pub engine: EngineKind,
    /// Identifier of the concrete engine instance (e.g., model name).
    pub engine_id: String,
    /// Observed execution latency in milliseconds.
    pub latency_ms: u64,
    /// Observed or estimated cost in USD for this call.
    pub cost: f64,
}

/// Whether a prediction or label value counts as the positive class.
///
/// Shared by the monitoring metrics and the fairness audit so both layers
/// agree on what "selected" means.
#[must_use]
pub fn is_positive(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|v| v > 0.5),
        serde_json::Value::String(s) => {
            matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "positive")
        }
        _ => false,
    }
}

/// A minimal capability interface for local predictive models.
///
/// Any model implementation satisfies the router and audit layers by
/// implementing `predict`; `predict_with_confidence` has a default that
/// delegates to it.
pub trait Predictor: Send + Sync {
    /// Produces a prediction for the given feature map.
    ///
    /// # Errors
    /// Returns a `PredictionError` if the features are invalid or the
    /// underlying model fails.
    fn predict(&self, features: &Features) -> Result<PredictionOutput, PredictionError>;

    /// Produces a prediction with an explicit confidence estimate.
    ///
    /// The default implementation delegates to [`Predictor::predict`].
    fn predict_with_confidence(
        &self,
        features: &Features,
    ) -> Result<PredictionOutput, PredictionError> {
        self.predict(features)
    }
}

/// Optional explainability capabilities a predictor may expose.
///
/// The fairness audit engine scores models higher when these are present.
pub trait Explainable {
    /// Global feature importances, if the model can produce them.
    fn feature_importances(&self) -> Option<HashMap<String, f64>> {
        None
    }

    /// Whether the model supports per-prediction (local) explanations.
    fn supports_local_explanations(&self) -> bool {
        false
    }
}

/// A trait for executing routed tasks against an engine.
///
/// All engines must be `Send + Sync` to allow concurrent use across tasks.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Executes a task payload and returns the engine response.
    ///
    /// # Errors
    /// Returns a `PredictionError` if execution fails. The router treats
    /// any error as grounds for trying the configured fallback engine.
    async fn execute(&self, payload: &Features) -> Result<EngineResponse, PredictionError>;

    /// The class of this engine.
    fn kind(&self) -> EngineKind;

    /// Stable identifier for this engine instance.
    fn engine_id(&self) -> &str;
}
