use super::{AutoMergeStatus, EvaluationError, MergeRequirement};
use crate::pull_request::PullRequestRef;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Re-check delay used for a requirement whose evaluation failed
pub const DEFAULT_FAILURE_REEVALUATE_SECONDS: u64 = 300;

/// Outcome of one requirement inside an aggregate evaluation
#[derive(Debug, Clone, Serialize)]
pub struct RequirementOutcome {
    pub id: Uuid,
    pub name: String,
    pub status: AutoMergeStatus,
    /// Set when the evaluation failed and `status` is the substituted pending status
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub status: AutoMergeStatus,
    pub outcomes: Vec<RequirementOutcome>,
}

impl AggregateReport {
    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    pub fn pending(&self) -> impl Iterator<Item = &RequirementOutcome> {
        self.outcomes.iter().filter(|o| !o.status.is_ready())
    }
}

/// Folds the results of every enabled requirement into one status
#[derive(Debug, Clone)]
pub struct RequirementAggregator {
    failure_reevaluate_in: u64,
}

impl Default for RequirementAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_REEVALUATE_SECONDS)
    }
}

impl RequirementAggregator {
    pub fn new(failure_reevaluate_in: u64) -> Self {
        Self {
            failure_reevaluate_in: failure_reevaluate_in.max(1),
        }
    }

    /// Evaluate every enabled requirement concurrently.
    ///
    /// The aggregate is ready iff every requirement is ready; otherwise its
    /// delay is the smallest positive delay among the pending requirements.
    /// Progress counts ready requirements out of those evaluated. Failed
    /// requirements count as pending; cancellation aborts the whole call.
    pub async fn evaluate(
        &self,
        requirements: &[Arc<dyn MergeRequirement>],
        pull_request: &PullRequestRef,
        cancel: &CancellationToken,
    ) -> Result<AggregateReport, EvaluationError> {
        let enabled: Vec<&Arc<dyn MergeRequirement>> =
            requirements.iter().filter(|r| r.enabled()).collect();

        let mut pending = enabled
            .iter()
            .map(|requirement| async move {
                let result = requirement.evaluate(pull_request, cancel).await;
                (*requirement, result)
            })
            .collect::<FuturesUnordered<_>>();

        let mut outcomes = Vec::with_capacity(enabled.len());
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EvaluationError::Cancelled),
                next = pending.next() => next,
            };
            let Some((requirement, result)) = next else {
                break;
            };

            let outcome = match result {
                Ok(status) => RequirementOutcome {
                    id: requirement.id(),
                    name: requirement.name(),
                    status,
                    error: None,
                },
                Err(EvaluationError::Cancelled) => return Err(EvaluationError::Cancelled),
                Err(e) => {
                    warn!(
                        requirement = %requirement.name(),
                        pr = pull_request.number,
                        error = %e,
                        "Requirement evaluation failed, treating as not ready"
                    );
                    RequirementOutcome {
                        id: requirement.id(),
                        name: requirement.name(),
                        status: AutoMergeStatus::pending(0, 1, self.failure_reevaluate_in),
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        // Completion order is arbitrary; report in registration order
        outcomes.sort_by_key(|o| enabled.iter().position(|r| r.id() == o.id));

        let status = combine(outcomes.iter().map(|o| &o.status));
        info!(
            pr = pull_request.number,
            ready = status.is_ready(),
            satisfied = status.progress,
            required = status.required_progress,
            reevaluate_in = status.reevaluate_in,
            "Merge requirements evaluated"
        );

        Ok(AggregateReport { status, outcomes })
    }
}

/// Combine individual statuses by readiness only
pub fn combine<'a>(statuses: impl IntoIterator<Item = &'a AutoMergeStatus>) -> AutoMergeStatus {
    let mut total = 0i64;
    let mut ready = 0i64;
    let mut min_delay: Option<u64> = None;

    for status in statuses {
        total += 1;
        if status.is_ready() {
            ready += 1;
        } else {
            min_delay = Some(min_delay.map_or(status.reevaluate_in, |d| d.min(status.reevaluate_in)));
        }
    }

    match min_delay {
        None => AutoMergeStatus::ready(ready, total),
        Some(delay) => AutoMergeStatus::pending(ready, total, delay),
    }
}
