//! Task routing between the local predictive model and the remote LLM.

pub mod config;
pub mod profiler;
pub mod router;
pub mod trackers;
pub mod types;

pub use config::{RoutingConfigLoader, RoutingRule, RoutingRules};
pub use profiler::{ComplexityWeights, TaskProfiler};
pub use router::{RouterConfig, TaskRouter};
pub use trackers::{CostTracker, QualityTracker};
pub use types::{RoutingDecision, RoutingStats, SuitabilityWeights, TaskProfile, TaskType};
