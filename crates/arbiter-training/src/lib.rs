//! Retraining pipeline for Arbiter.
//!
//! A queue-driven scheduler consumes retraining requests in the
//! background, runs the externally supplied retraining routine, and gates
//! the produced candidate behind the evaluation and fairness audit
//! engines before the registry will promote it.

pub mod audit;
pub mod error;
pub mod evaluation;
pub mod job;
pub mod scheduler;

pub use audit::{AuditConfig, AuditReport, BiasTest, BiasTestResult, FairnessAuditor, PrivacyRisk};
pub use error::{TrainingError, TrainingResult};
pub use evaluation::{EvaluationEngine, EvaluationReport};
pub use job::{
    HoldoutSet, RetrainPriority, RetrainReason, RetrainedCandidate, Retrainer, RetrainingEvent,
    RetrainingEventKind, RetrainingRequest,
};
pub use scheduler::{RetrainingScheduler, SchedulerConfig};
