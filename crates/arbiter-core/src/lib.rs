//! Core state for the Arbiter control plane.
//!
//! This crate owns the durable and shared-mutable pieces of the system:
//! the repository abstraction over the backing store, the model registry
//! with its single-active-version invariant, the performance monitor with
//! sliding windows and drift detection, and the append-only alert log.

pub mod alerting;
pub mod config;
pub mod monitoring;
pub mod registry;
pub mod storage;

pub use alerting::{Alert, AlertLog, AlertType, Severity};
pub use config::{MonitorConfig, RegistryConfig};
pub use monitoring::{ModelMetrics, MonitorFinding, PerformanceMonitor, PerformanceRecord};
pub use registry::{ModelRegistry, ModelVersion, RegistrationMetrics, RegistryError, VersionId};
pub use storage::{JsonFileStore, MemoryStore, Repository, StorageError};
