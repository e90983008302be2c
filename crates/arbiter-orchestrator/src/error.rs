// Error types for routing and the control plane

use arbiter_abstraction::{EngineKind, PredictionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for routing operations
pub type Result<T> = std::result::Result<T, RoutingError>;

/// One failed execution attempt during routing.
///
/// Carries the typed error so callers can react to specific failure
/// classes (a model-load failure queues retraining, for example).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Engine that was tried.
    pub engine: EngineKind,
    /// Identifier of the concrete engine instance.
    pub engine_id: String,
    /// The error it returned.
    pub error: PredictionError,
    /// When the attempt failed.
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    #[must_use]
    pub fn new(engine: EngineKind, engine_id: &str, error: PredictionError) -> Self {
        Self { engine, engine_id: engine_id.to_string(), error, failed_at: Utc::now() }
    }
}

/// Routing and execution errors
#[derive(Debug, Error)]
pub enum RoutingError {
    /// The selected engine and every configured fallback failed
    #[error("All engines failed ({} attempts)", attempts.len())]
    AllEnginesFailed {
        /// Per-engine failure records, in attempt order
        attempts: Vec<FailureRecord>,
    },

    /// Routing configuration was invalid
    #[error("Routing config error: {0}")]
    Config(String),

    /// Reading the routing configuration file failed
    #[error("Routing config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Parsing the routing configuration file failed
    #[error("Routing config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
