//! Merge gate
//!
//! Caller-side control flow: evaluate every enabled requirement and, once the
//! pull request is ready, land it while holding the repository lock.

use crate::pull_request::PullRequestRef;
use crate::repository::{RepositoryCoordinator, RepositoryError};
use crate::requirements::{
    AggregateReport, EvaluationError, MergeRequirement, ModuleRegistry, RequirementAggregator,
};
use crate::telemetry::{create_gate_span, generate_correlation_id};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl GateError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            GateError::Evaluation(EvaluationError::Cancelled)
                | GateError::Repository(RepositoryError::Cancelled)
        )
    }
}

#[derive(Debug)]
pub enum LandOutcome {
    /// Not ready yet; evaluate again after `report.status.reevaluate_in` seconds
    Deferred(AggregateReport),
    /// Working commit pushed to the pull request's base branch
    Landed { sha: String, report: AggregateReport },
}

pub struct MergeGate {
    requirements: Vec<Arc<dyn MergeRequirement>>,
    aggregator: RequirementAggregator,
    coordinator: Arc<RepositoryCoordinator>,
}

impl MergeGate {
    /// Toggling requirements on `registry` afterwards still affects this gate;
    /// the instances are shared.
    pub fn new(
        registry: &ModuleRegistry,
        aggregator: RequirementAggregator,
        coordinator: Arc<RepositoryCoordinator>,
    ) -> Self {
        Self {
            requirements: registry.modules().to_vec(),
            aggregator,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Arc<RepositoryCoordinator> {
        &self.coordinator
    }

    pub async fn evaluate(
        &self,
        pull_request: &PullRequestRef,
        cancel: &CancellationToken,
    ) -> Result<AggregateReport, GateError> {
        let span = create_gate_span("evaluate", pull_request.number, &generate_correlation_id());
        let report = self
            .aggregator
            .evaluate(&self.requirements, pull_request, cancel)
            .instrument(span)
            .await?;
        Ok(report)
    }

    /// Evaluate and, when ready, land the pull request onto its base branch.
    ///
    /// One lock covers the fetch, squash and push. A rejected push is returned
    /// as an error and not retried; take a fresh evaluation before trying again.
    pub async fn land(
        &self,
        pull_request: &PullRequestRef,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<LandOutcome, GateError> {
        let correlation_id = generate_correlation_id();
        let span = create_gate_span("land", pull_request.number, &correlation_id);

        async {
            let report = self
                .aggregator
                .evaluate(&self.requirements, pull_request, cancel)
                .await?;
            if !report.is_ready() {
                info!(
                    reevaluate_in = report.status.reevaluate_in,
                    "Pull request not ready, deferring"
                );
                return Ok(LandOutcome::Deferred(report));
            }

            let lock = self.coordinator.acquire_lock(cancel).await?;
            let sha = self
                .coordinator
                .create_working_commit(pull_request, &lock, cancel)
                .await?;
            self.coordinator
                .push(
                    self.coordinator.remote(),
                    &pull_request.base_branch,
                    &sha,
                    token,
                    false,
                    &lock,
                    cancel,
                )
                .await?;
            drop(lock);

            info!(%sha, branch = %pull_request.base_branch, "Pull request landed");
            Ok::<_, GateError>(LandOutcome::Landed { sha, report })
        }
        .instrument(span)
        .await
    }
}
