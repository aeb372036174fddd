// Merge Gate Library - pull request release gating
// This exposes the core components for testing and integration

pub mod config;
pub mod gate;
pub mod pull_request;
pub mod repository;
pub mod requirements;
pub mod shutdown;
pub mod telemetry;

// Re-export key types for easy access
pub use crate::config::{config, MergeGateConfig};
pub use gate::{GateError, LandOutcome, MergeGate};
pub use pull_request::PullRequestRef;
pub use repository::{RepositoryCoordinator, RepositoryError, RepositoryLock};
pub use requirements::{
    registry, AggregateReport, AutoMergeStatus, EvaluationError, MergeRequirement,
    ModuleRegistry, PayloadHandler, PayloadType, RequirementAggregator, TwentyFourHourRule,
};
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{generate_correlation_id, init_telemetry};
pub use tokio_util::sync::CancellationToken;
