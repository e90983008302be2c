//! Arbiter orchestration layer.
//!
//! Routes tasks between the local predictive model and the remote LLM,
//! and owns the control plane that ties routing to the monitoring,
//! alerting, registry, and retraining services.

pub mod control_plane;
pub mod error;
pub mod routing;

pub use control_plane::{
    ControlPlane, ControlPlaneConfig, DashboardSnapshot, ModelStatus, SystemHealth,
};
pub use error::{FailureRecord, RoutingError};
pub use routing::{
    ComplexityWeights, CostTracker, QualityTracker, RouterConfig, RoutingConfigLoader,
    RoutingDecision, RoutingRule, RoutingRules, RoutingStats, SuitabilityWeights, TaskProfile,
    TaskProfiler, TaskRouter, TaskType,
};
