use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of a pull request handed to the gate by the webhook/API layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    /// Pull request number, `refs/pull/<number>/head` on the remote
    pub number: u64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Source commit SHAs, oldest first
    pub commits: Vec<String>,
    /// Integration branch the pull request targets
    pub base_branch: String,
}

impl PullRequestRef {
    pub fn new(number: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            number,
            title: String::new(),
            created_at,
            commits: Vec::new(),
            base_branch: "main".to_string(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_commits<I, S>(mut self, commits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commits = commits.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_base_branch(mut self, base: impl Into<String>) -> Self {
        self.base_branch = base.into();
        self
    }

    /// The ref the pull request head is published under on the remote
    pub fn head_ref(&self) -> String {
        format!("refs/pull/{}/head", self.number)
    }

    /// Last commit of the snapshot, if any
    pub fn head_commit(&self) -> Option<&str> {
        self.commits.last().map(String::as_str)
    }

    pub fn needs_squash(&self) -> bool {
        self.commits.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builder_keeps_commit_order() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let pr = PullRequestRef::new(42, created)
            .with_title("Add feature")
            .with_commits(["aaa", "bbb", "ccc"])
            .with_base_branch("develop");

        assert_eq!(pr.head_ref(), "refs/pull/42/head");
        assert_eq!(pr.head_commit(), Some("ccc"));
        assert_eq!(pr.commits, vec!["aaa", "bbb", "ccc"]);
        assert_eq!(pr.base_branch, "develop");
        assert!(pr.needs_squash());
    }

    #[test]
    fn test_single_commit_does_not_squash() {
        let pr = PullRequestRef::new(7, Utc::now()).with_commits(["abc"]);
        assert!(!pr.needs_squash());
        assert!(PullRequestRef::new(8, Utc::now()).head_commit().is_none());
    }
}
