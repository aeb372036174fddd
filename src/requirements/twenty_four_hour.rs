use super::{AutoMergeStatus, EvaluationError, MergeRequirement};
use crate::pull_request::PullRequestRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Twenty. Four. Hour. Rule.
pub const HOURS_REQUIRED: i64 = 24;

const SECONDS_PER_HOUR: i64 = 60 * 60;

/// Requires 24 hours to pass since the pull request was opened
#[derive(Debug)]
pub struct TwentyFourHourRule {
    enabled: AtomicBool,
}

impl Default for TwentyFourHourRule {
    fn default() -> Self {
        Self::new()
    }
}

impl TwentyFourHourRule {
    pub const ID: Uuid = Uuid::from_u128(0x7854_4889_5447_47f2_b300_3fb7_b703_c3cc);

    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    /// Evaluate against an explicit clock reading.
    ///
    /// Whole hours are recomputed from `now` on every call; no deadline is
    /// stored, so the re-check delay drifts with the caller's cadence.
    ///
    /// At exactly 24 elapsed hours the rule is still pending and asks to be
    /// checked again in one hour, not in zero seconds: a zero delay always
    /// means ready.
    pub fn evaluate_at(&self, pull_request: &PullRequestRef, now: DateTime<Utc>) -> AutoMergeStatus {
        let hours = hours_since_opened(pull_request.created_at, now);

        if hours > HOURS_REQUIRED {
            return AutoMergeStatus::ready(hours, HOURS_REQUIRED);
        }

        // Exactly 24 elapsed hours is still not ready; check again in an hour
        let remaining_hours = (HOURS_REQUIRED - hours).max(1);
        AutoMergeStatus::pending(
            hours,
            HOURS_REQUIRED,
            (remaining_hours * SECONDS_PER_HOUR) as u64,
        )
    }
}

/// Floor of the elapsed wall-clock time in hours. Negative when the pull
/// request claims to be opened in the future (clock skew).
pub fn hours_since_opened(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_seconds().div_euclid(SECONDS_PER_HOUR)
}

#[async_trait]
impl MergeRequirement for TwentyFourHourRule {
    fn id(&self) -> Uuid {
        Self::ID
    }

    fn name(&self) -> String {
        "24-Hour Rule".to_string()
    }

    fn description(&self) -> String {
        "Merge requirement of having 24 hours pass since the pull request was originally opened"
            .to_string()
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    async fn evaluate(
        &self,
        pull_request: &PullRequestRef,
        cancel: &CancellationToken,
    ) -> Result<AutoMergeStatus, EvaluationError> {
        if pull_request.number == 0 {
            return Err(EvaluationError::InvalidArgument(
                "pull request number must be non-zero".to_string(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(EvaluationError::Cancelled);
        }

        let status = self.evaluate_at(pull_request, Utc::now());
        debug!(
            pr = pull_request.number,
            hours = status.progress,
            reevaluate_in = status.reevaluate_in,
            "24-hour rule evaluated"
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirements::PayloadType;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn opened_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn pr() -> PullRequestRef {
        PullRequestRef::new(17, opened_at()).with_commits(["abc123"])
    }

    #[test]
    fn test_ready_after_twenty_five_hours() {
        let rule = TwentyFourHourRule::new();
        let status = rule.evaluate_at(&pr(), opened_at() + Duration::hours(25));

        assert!(status.is_ready());
        assert_eq!(status.progress, 25);
        assert_eq!(status.required_progress, HOURS_REQUIRED);
        assert_eq!(status.reevaluate_in, 0);
    }

    #[test]
    fn test_freshly_opened_waits_a_full_day() {
        let rule = TwentyFourHourRule::new();
        let status = rule.evaluate_at(&pr(), opened_at());

        assert!(!status.is_ready());
        assert_eq!(status.progress, 0);
        assert_eq!(status.reevaluate_in, 24 * 3600);
    }

    #[test]
    fn test_partial_hours_are_floored() {
        let rule = TwentyFourHourRule::new();
        let now = opened_at() + Duration::hours(5) + Duration::minutes(59);
        let status = rule.evaluate_at(&pr(), now);

        assert_eq!(status.progress, 5);
        assert_eq!(status.reevaluate_in, 19 * 3600);
    }

    #[test]
    fn test_exactly_twenty_four_hours_is_not_ready() {
        let rule = TwentyFourHourRule::new();
        let status = rule.evaluate_at(&pr(), opened_at() + Duration::hours(24));

        assert!(!status.is_ready());
        assert_eq!(status.progress, 24);
        assert_eq!(status.reevaluate_in, 3600);
    }

    #[test]
    fn test_future_creation_time_floors_negative() {
        let now = opened_at() - Duration::minutes(30);
        assert_eq!(hours_since_opened(opened_at(), now), -1);

        let status = TwentyFourHourRule::new().evaluate_at(&pr(), now);
        assert_eq!(status.reevaluate_in, 25 * 3600);
    }

    #[tokio::test]
    async fn test_evaluate_rejects_unnumbered_pull_request() {
        let rule = TwentyFourHourRule::new();
        let invalid = PullRequestRef::new(0, opened_at());

        let result = rule.evaluate(&invalid, &CancellationToken::new()).await;
        assert!(matches!(result, Err(EvaluationError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_evaluate_honors_cancellation() {
        let rule = TwentyFourHourRule::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = rule.evaluate(&pr(), &cancel).await;
        assert!(matches!(result, Err(EvaluationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_evaluate_uses_wall_clock() {
        let rule = TwentyFourHourRule::new();
        let old = PullRequestRef::new(3, Utc::now() - Duration::days(3));

        let status = rule.evaluate(&old, &CancellationToken::new()).await.unwrap();
        assert!(status.is_ready());
        assert!(status.progress >= 72);
    }

    #[test]
    fn test_identity_and_toggle() {
        let rule = TwentyFourHourRule::new();
        assert_eq!(rule.id().to_string(), "78544889-5447-47f2-b300-3fb7b703c3cc");
        assert_eq!(rule.name(), "24-Hour Rule");
        assert!(rule.enabled());

        rule.set_enabled(false);
        assert!(!rule.enabled());
        assert!(rule
            .payload_handlers(&PayloadType::new("pull_request"))
            .is_empty());
    }

    proptest! {
        #[test]
        fn prop_not_ready_within_threshold(hours in 0i64..24, extra_minutes in 0i64..60) {
            let rule = TwentyFourHourRule::new();
            let now = opened_at() + Duration::hours(hours) + Duration::minutes(extra_minutes);
            let status = rule.evaluate_at(&pr(), now);

            prop_assert!(!status.is_ready());
            prop_assert_eq!(status.progress, hours);
            prop_assert_eq!(status.reevaluate_in, ((24 - hours) * 3600) as u64);
        }

        #[test]
        fn prop_ready_past_threshold(hours in 25i64..10_000) {
            let rule = TwentyFourHourRule::new();
            let status = rule.evaluate_at(&pr(), opened_at() + Duration::hours(hours));

            prop_assert!(status.is_ready());
            prop_assert_eq!(status.progress, hours);
        }
    }
}
