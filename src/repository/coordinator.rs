use super::lock::{acquire_file_lock, RepositoryLock};
use super::operations::{parse_commit_sha, Committer, WorkingCopy};
use super::RepositoryError;
use crate::config::RepositoryConfig;
use crate::pull_request::PullRequestRef;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const LOCK_FILE_NAME: &str = "merge-gate.lock";

/// Serializes every git-mutating operation on one working copy.
///
/// Each mutating call takes the [`RepositoryLock`] returned by
/// [`acquire_lock`](Self::acquire_lock) as proof of ownership. The lock is
/// meant to span a whole sequence (fetch, squash, push) so that no other
/// caller can interleave.
pub struct RepositoryCoordinator {
    id: Uuid,
    path: PathBuf,
    lock_path: PathBuf,
    remote: String,
    fetch_token: Option<String>,
    committer: Committer,
    mutex: Arc<Mutex<()>>,
    acquisitions: AtomicU64,
}

impl std::fmt::Debug for RepositoryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryCoordinator")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("remote", &self.remote)
            .finish()
    }
}

impl RepositoryCoordinator {
    /// Open an existing working copy
    pub fn open(config: &RepositoryConfig) -> Result<Self, RepositoryError> {
        let copy = WorkingCopy::open(&config.path, committer(config))?;
        Ok(Self::from_parts(config, copy.git_dir()))
    }

    /// Open the working copy, cloning `remote_url` into place first if needed
    pub async fn initialize(
        config: &RepositoryConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, RepositoryError> {
        if config.path.join(".git").exists() {
            return Self::open(config);
        }
        let url = config.remote_url.clone().ok_or_else(|| {
            RepositoryError::InvalidArgument(format!(
                "no working copy at {} and no remote_url to clone from",
                config.path.display()
            ))
        })?;

        let path = config.path.clone();
        let token = config.token.clone();
        let committer = committer(config);
        let clone_cancel = cancel.clone();
        let git_dir = tokio::task::spawn_blocking(move || {
            let copy =
                WorkingCopy::clone_from(&url, &path, token.as_deref(), committer, &clone_cancel)?;
            Ok::<_, RepositoryError>(copy.git_dir().to_path_buf())
        })
        .await??;

        Ok(Self::from_parts(config, &git_dir))
    }

    fn from_parts(config: &RepositoryConfig, git_dir: &Path) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: config.path.clone(),
            lock_path: git_dir.join(LOCK_FILE_NAME),
            remote: config.remote.clone(),
            fetch_token: config.token.clone(),
            committer: committer(config),
            mutex: Arc::new(Mutex::new(())),
            acquisitions: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the remote pull requests are fetched from
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Wait until no other caller holds the working copy.
    ///
    /// Cancellation aborts the wait without granting the lock.
    #[instrument(skip(self, cancel), fields(repo = %self.path.display()))]
    pub async fn acquire_lock(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RepositoryLock, RepositoryError> {
        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RepositoryError::Cancelled),
            guard = self.mutex.clone().lock_owned() => guard,
        };
        let file = acquire_file_lock(self.lock_path.clone(), cancel).await?;

        let sequence = self.acquisitions.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(sequence, "Repository lock acquired");
        Ok(RepositoryLock::new(self.id, sequence, file, guard))
    }

    fn verify(&self, lock: &RepositoryLock) -> Result<(), RepositoryError> {
        if lock.coordinator() != self.id {
            return Err(RepositoryError::LockNotHeld);
        }
        Ok(())
    }

    /// Run blocking git work to completion. Never abandoned midway, so the
    /// lock is not released while libgit2 is still writing.
    async fn run_blocking<T, F>(&self, work: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(WorkingCopy) -> Result<T, RepositoryError> + Send + 'static,
    {
        let path = self.path.clone();
        let committer = self.committer.clone();
        tokio::task::spawn_blocking(move || work(WorkingCopy::open(&path, committer)?)).await?
    }

    /// Fetch the pull request and return the SHA to land, squashed into one
    /// commit atop the integration branch tip when it has several commits.
    #[instrument(skip_all, fields(pr = pull_request.number, lock_seq = lock.sequence()))]
    pub async fn create_working_commit(
        &self,
        pull_request: &PullRequestRef,
        lock: &RepositoryLock,
        cancel: &CancellationToken,
    ) -> Result<String, RepositoryError> {
        self.verify(lock)?;
        if cancel.is_cancelled() {
            return Err(RepositoryError::Cancelled);
        }

        let pull_request = pull_request.clone();
        let remote = self.remote.clone();
        let token = self.fetch_token.clone();
        let cancel = cancel.clone();
        let oid = self
            .run_blocking(move |copy| {
                copy.working_commit(&pull_request, &remote, token.as_deref(), &cancel)
            })
            .await?;

        info!(sha = %oid, "Working commit ready");
        Ok(oid.to_string())
    }

    /// Stage exactly `paths` and commit them
    #[instrument(skip_all, fields(paths = paths.len(), lock_seq = lock.sequence()))]
    pub async fn commit_changes(
        &self,
        paths: &[PathBuf],
        message: &str,
        lock: &RepositoryLock,
        cancel: &CancellationToken,
    ) -> Result<String, RepositoryError> {
        self.verify(lock)?;
        if cancel.is_cancelled() {
            return Err(RepositoryError::Cancelled);
        }

        let paths = paths.to_vec();
        let message = message.to_string();
        let oid = self
            .run_blocking(move |copy| copy.commit_paths(&paths, &message))
            .await?;
        Ok(oid.to_string())
    }

    /// Push `commit_sha` to `branch` on `remote`, using `token` as the password.
    ///
    /// A rejected non-force push surfaces as [`RepositoryError::PushRejected`];
    /// it is never retried or escalated to a force push.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, token, lock, cancel), fields(lock_seq = lock.sequence()))]
    pub async fn push(
        &self,
        remote: &str,
        branch: &str,
        commit_sha: &str,
        token: &str,
        force: bool,
        lock: &RepositoryLock,
        cancel: &CancellationToken,
    ) -> Result<(), RepositoryError> {
        self.verify(lock)?;
        if branch.is_empty() {
            return Err(RepositoryError::InvalidArgument("branch is empty".to_string()));
        }
        let commit = parse_commit_sha(commit_sha)?;
        if cancel.is_cancelled() {
            return Err(RepositoryError::Cancelled);
        }

        let remote = remote.to_string();
        let branch = branch.to_string();
        let token = (!token.is_empty()).then(|| token.to_string());
        let cancel = cancel.clone();
        self.run_blocking(move |copy| {
            copy.push(&remote, &branch, commit, token.as_deref(), force, &cancel)
        })
        .await
    }
}

fn committer(config: &RepositoryConfig) -> Committer {
    Committer {
        name: config.committer_name.clone(),
        email: config.committer_email.clone(),
    }
}
