//! Merge requirements
//!
//! A merge requirement is a pluggable readiness check evaluated against a
//! pull request. Each requirement reports progress in its own unit, so the
//! aggregator only ever combines readiness and re-check delays.

pub mod aggregator;
pub mod registry;
pub mod twenty_four_hour;

pub use aggregator::{AggregateReport, RequirementAggregator, RequirementOutcome};
pub use registry::{registry, ModuleRegistry, ModuleRegistryBuilder, RegistryError};
pub use twenty_four_hour::TwentyFourHourRule;

use crate::pull_request::PullRequestRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

/// Result of evaluating one requirement, or the aggregate of all of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoMergeStatus {
    /// Progress toward readiness, in a requirement-defined unit
    pub progress: i64,
    /// Progress needed for readiness, same unit as `progress`
    pub required_progress: i64,
    /// Seconds until the pull request should be evaluated again; 0 means ready
    pub reevaluate_in: u64,
}

impl AutoMergeStatus {
    pub fn ready(progress: i64, required_progress: i64) -> Self {
        Self {
            progress,
            required_progress,
            reevaluate_in: 0,
        }
    }

    /// A not-ready status. The delay is at least one second so that a pending
    /// status is never mistaken for a ready one.
    pub fn pending(progress: i64, required_progress: i64, reevaluate_in: u64) -> Self {
        Self {
            progress,
            required_progress,
            reevaluate_in: reevaluate_in.max(1),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.reevaluate_in == 0
    }

    pub fn reevaluate_after(&self) -> Duration {
        Duration::from_secs(self.reevaluate_in)
    }
}

impl fmt::Display for AutoMergeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ready() {
            write!(f, "ready ({}/{})", self.progress, self.required_progress)
        } else {
            write!(
                f,
                "pending ({}/{}), re-check in {}s",
                self.progress, self.required_progress, self.reevaluate_in
            )
        }
    }
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Evaluation cancelled")]
    Cancelled,
    #[error("Requirement evaluation failed: {0}")]
    Failed(String),
}

/// Tag identifying a webhook payload kind, e.g. `pull_request`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadType(String);

impl PayloadType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handler invoked by the webhook dispatcher for one payload type
#[async_trait]
pub trait PayloadHandler: Send + Sync {
    fn payload_type(&self) -> &PayloadType;

    async fn handle(
        &self,
        payload: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<(), EvaluationError>;
}

/// A pluggable merge requirement
///
/// Implementations must be safe to evaluate concurrently for different pull
/// requests and must not mutate shared state while evaluating.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait MergeRequirement: Send + Sync {
    /// Stable unique identifier
    fn id(&self) -> Uuid;

    fn name(&self) -> String;

    fn description(&self) -> String;

    fn enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// One-time startup hook, run by the registry
    async fn initialize(&self, _cancel: &CancellationToken) -> Result<(), EvaluationError> {
        Ok(())
    }

    async fn evaluate(
        &self,
        pull_request: &PullRequestRef,
        cancel: &CancellationToken,
    ) -> Result<AutoMergeStatus, EvaluationError>;

    /// Handlers for `payload_type`; unknown types yield nothing
    fn payload_handlers(&self, _payload_type: &PayloadType) -> Vec<Arc<dyn PayloadHandler>> {
        Vec::new()
    }
}
