// Error types for the retraining pipeline

use arbiter_abstraction::PredictionError;
use arbiter_core::RegistryError;
use thiserror::Error;

/// Result type for training operations
pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

/// Retraining pipeline errors
#[derive(Debug, Error)]
pub enum TrainingError {
    /// The retraining routine itself failed
    #[error("Retraining failed: {0}")]
    RetrainFailed(String),

    /// A prediction during evaluation or audit failed
    #[error("Prediction error: {0}")]
    Prediction(#[from] PredictionError),

    /// Registry promotion failed
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Evaluation input was unusable (empty or mismatched sets)
    #[error("Invalid evaluation input: {0}")]
    InvalidInput(String),

    /// The audit could not run to completion
    #[error("Audit error: {0}")]
    Audit(String),
}
