//! Blocking libgit2 operations on the managed working copy.
//!
//! Nothing here synchronizes; callers run these through the coordinator while
//! holding a [`RepositoryLock`](super::RepositoryLock).

use super::RepositoryError;
use crate::pull_request::PullRequestRef;
use git2::build::RepoBuilder;
use git2::{
    Commit, Cred, ErrorCode, FetchOptions, Oid, PushOptions, RemoteCallbacks, Repository,
    Signature,
};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Identity used for commits the gate creates
#[derive(Debug, Clone)]
pub struct Committer {
    pub name: String,
    pub email: String,
}

impl Default for Committer {
    fn default() -> Self {
        Self {
            name: "Merge Gate".to_string(),
            email: "merge-gate@users.noreply.github.com".to_string(),
        }
    }
}

pub struct WorkingCopy {
    repo: Repository,
    committer: Committer,
}

impl WorkingCopy {
    pub fn open<P: AsRef<Path>>(path: P, committer: Committer) -> Result<Self, RepositoryError> {
        let repo = Repository::open(path.as_ref()).map_err(|e| {
            RepositoryError::operation(
                "open",
                format!("{}: {}", path.as_ref().display(), e.message()),
            )
        })?;
        Ok(Self { repo, committer })
    }

    /// Clone `url` into `path`, authenticating with `token` when given
    pub fn clone_from(
        url: &str,
        path: &Path,
        token: Option<&str>,
        committer: Committer,
        cancel: &CancellationToken,
    ) -> Result<Self, RepositoryError> {
        let mut callbacks = RemoteCallbacks::new();
        install_credentials(&mut callbacks, token);
        callbacks.transfer_progress(|_| !cancel.is_cancelled());

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);

        let repo = RepoBuilder::new()
            .fetch_options(fetch_options)
            .clone(url, path)
            .map_err(|e| RepositoryError::from_git("clone", e, cancel))?;
        info!(url, path = %path.display(), "Cloned working copy");
        Ok(Self { repo, committer })
    }

    /// Path of the `.git` directory
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    fn signature(&self) -> Result<Signature<'static>, RepositoryError> {
        // Prefer the working copy's configured identity
        match self.repo.signature() {
            Ok(sig) => Ok(sig),
            Err(_) => Ok(Signature::now(&self.committer.name, &self.committer.email)?),
        }
    }

    pub fn fetch(
        &self,
        remote_name: &str,
        refspecs: &[String],
        token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), RepositoryError> {
        let mut remote = self.repo.find_remote(remote_name).map_err(|_| {
            RepositoryError::operation("fetch", format!("remote '{remote_name}' not found"))
        })?;

        let mut callbacks = RemoteCallbacks::new();
        install_credentials(&mut callbacks, token);
        callbacks.transfer_progress(|_| !cancel.is_cancelled());

        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);

        remote
            .fetch(refspecs, Some(&mut options), None)
            .map_err(|e| RepositoryError::from_git("fetch", e, cancel))?;
        debug!(remote = remote_name, ?refspecs, "Fetched");
        Ok(())
    }

    /// Resolve a fully qualified reference to the commit it points at
    pub fn resolve(&self, reference: &str) -> Result<Oid, RepositoryError> {
        let reference = self.repo.find_reference(reference).map_err(|e| {
            RepositoryError::operation("resolve", format!("{reference}: {}", e.message()))
        })?;
        Ok(reference.peel_to_commit()?.id())
    }

    /// Fetch the pull request and produce the commit to land.
    ///
    /// A single-commit pull request lands as-is. Otherwise the head is merged
    /// onto the integration branch tip in memory and written as one commit
    /// whose only parent is that tip. No branch ref is moved.
    pub fn working_commit(
        &self,
        pull_request: &PullRequestRef,
        remote_name: &str,
        token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Oid, RepositoryError> {
        let expected = pull_request.head_commit().ok_or_else(|| {
            RepositoryError::InvalidArgument(format!(
                "pull request #{} has no commits",
                pull_request.number
            ))
        })?;
        let expected = parse_commit_sha(expected)?;

        let base_tracking = format!("refs/remotes/{remote_name}/{}", pull_request.base_branch);
        let head_tracking = format!("refs/remotes/{remote_name}/pull/{}", pull_request.number);
        self.fetch(
            remote_name,
            &[
                format!("+refs/heads/{}:{base_tracking}", pull_request.base_branch),
                format!("+{}:{head_tracking}", pull_request.head_ref()),
            ],
            token,
            cancel,
        )?;
        if cancel.is_cancelled() {
            return Err(RepositoryError::Cancelled);
        }

        let head = self.resolve(&head_tracking)?;
        if head != expected {
            return Err(RepositoryError::operation(
                "fetch",
                format!(
                    "pull request #{} head moved: expected {expected}, fetched {head}",
                    pull_request.number
                ),
            ));
        }

        if !pull_request.needs_squash() {
            return Ok(head);
        }

        let base = self.resolve(&base_tracking)?;
        let message = self.squash_message(pull_request, base, head)?;
        self.squash(base, head, &message)
    }

    fn squash_message(
        &self,
        pull_request: &PullRequestRef,
        base: Oid,
        head: Oid,
    ) -> Result<String, RepositoryError> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push(head)?;
        revwalk.hide(base)?;
        revwalk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)?;

        let mut message = if pull_request.title.is_empty() {
            format!("Squashed pull request #{}\n", pull_request.number)
        } else {
            format!("{} (#{})\n", pull_request.title, pull_request.number)
        };
        for oid in revwalk {
            let commit = self.repo.find_commit(oid?)?;
            message.push_str(&format!("\n* {}", commit.summary().unwrap_or("")));
        }
        message.push('\n');
        Ok(message)
    }

    /// Write a single commit with `base` as parent and the merge of `head` as tree
    pub fn squash(&self, base: Oid, head: Oid, message: &str) -> Result<Oid, RepositoryError> {
        let base_commit = self.repo.find_commit(base)?;
        let head_commit = self.repo.find_commit(head)?;

        let mut index = self.repo.merge_commits(&base_commit, &head_commit, None)?;
        if index.has_conflicts() {
            let mut conflicts = Vec::new();
            for conflict in index.conflicts()? {
                let conflict = conflict?;
                if let Some(entry) = conflict.our.or(conflict.their) {
                    conflicts.push(String::from_utf8_lossy(&entry.path).into_owned());
                }
            }
            return Err(RepositoryError::operation(
                "squash",
                format!(
                    "pull request conflicts with integration branch in: {}",
                    conflicts.join(", ")
                ),
            ));
        }

        let tree_id = index.write_tree_to(&self.repo)?;
        let tree = self.repo.find_tree(tree_id)?;
        let committer = self.signature()?;
        let oid = self.repo.commit(
            None,
            &head_commit.author(),
            &committer,
            message,
            &tree,
            &[&base_commit],
        )?;

        info!(%base, %head, squashed = %oid, "Squashed pull request commits");
        Ok(oid)
    }

    /// Stage exactly `paths` and commit them on HEAD. Paths missing from the
    /// working tree are staged as deletions.
    pub fn commit_paths(&self, paths: &[PathBuf], message: &str) -> Result<Oid, RepositoryError> {
        if paths.is_empty() {
            return Err(RepositoryError::InvalidArgument(
                "no paths to stage".to_string(),
            ));
        }
        let workdir = self
            .repo
            .workdir()
            .ok_or_else(|| RepositoryError::InvalidArgument("working copy is bare".to_string()))?
            .to_path_buf();

        let mut index = self.repo.index()?;
        for path in paths {
            let relative = if path.is_absolute() {
                path.strip_prefix(&workdir).map_err(|_| {
                    RepositoryError::InvalidArgument(format!(
                        "{} is outside the working copy",
                        path.display()
                    ))
                })?
            } else {
                path.as_path()
            };

            let staged = if workdir.join(relative).exists() {
                index.add_path(relative)
            } else {
                index.remove_path(relative)
            };
            staged.map_err(|e| {
                RepositoryError::operation("stage", format!("{}: {}", relative.display(), e.message()))
            })?;
        }
        index.write()?;

        let tree = self.repo.find_tree(index.write_tree()?)?;
        let signature = self.signature()?;
        let parent = self.head_commit()?;
        let parents: Vec<&Commit> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .map_err(|e| RepositoryError::operation("commit", e.message()))?;
        info!(commit = %oid, paths = paths.len(), "Committed staged paths");
        Ok(oid)
    }

    fn head_commit(&self) -> Result<Option<Commit<'_>>, RepositoryError> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Push `commit` to `refs/heads/<branch>` on `remote_name`.
    ///
    /// Without `force`, a remote branch that is not an ancestor of `commit`
    /// rejects the push and the remote is left untouched.
    pub fn push(
        &self,
        remote_name: &str,
        branch: &str,
        commit: Oid,
        token: Option<&str>,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(), RepositoryError> {
        self.repo.find_commit(commit).map_err(|_| {
            RepositoryError::InvalidArgument(format!("commit {commit} is not in the working copy"))
        })?;
        let mut remote = self.repo.find_remote(remote_name).map_err(|_| {
            RepositoryError::operation("push", format!("remote '{remote_name}' not found"))
        })?;

        // libgit2 pushes references, not bare commits
        let staging = format!("refs/merge-gate/push/{branch}");
        self.repo
            .reference(&staging, commit, true, "merge-gate: stage push")?;

        let rejected = RefCell::new(None::<String>);
        let result = {
            let mut callbacks = RemoteCallbacks::new();
            install_credentials(&mut callbacks, token);
            callbacks.push_update_reference(|refname, status| {
                if let Some(status) = status {
                    *rejected.borrow_mut() = Some(format!("{refname}: {status}"));
                }
                Ok(())
            });
            callbacks.push_negotiation(|_| {
                if cancel.is_cancelled() {
                    Err(git2::Error::from_str("push cancelled"))
                } else {
                    Ok(())
                }
            });

            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);

            let plus = if force { "+" } else { "" };
            let refspec = format!("{plus}{staging}:refs/heads/{branch}");
            remote.push(&[refspec.as_str()], Some(&mut options))
        };

        if let Ok(mut reference) = self.repo.find_reference(&staging) {
            let _ = reference.delete();
        }

        let rejection = |reason: String| RepositoryError::PushRejected {
            remote: remote_name.to_string(),
            branch: branch.to_string(),
            sha: commit.to_string(),
            reason,
        };
        match result {
            Err(_) if cancel.is_cancelled() => return Err(RepositoryError::Cancelled),
            Err(e) if e.code() == ErrorCode::NotFastForward => {
                return Err(rejection(e.message().to_string()))
            }
            Err(e) => return Err(RepositoryError::operation("push", e.message())),
            Ok(()) => {}
        }
        if let Some(reason) = rejected.into_inner() {
            return Err(rejection(reason));
        }

        info!(remote = remote_name, branch, %commit, force, "Pushed");
        Ok(())
    }
}

/// Parse a full 40-character hex SHA. Abbreviated SHAs are rejected;
/// libgit2 would otherwise zero-pad them into a different object id.
pub(crate) fn parse_commit_sha(sha: &str) -> Result<Oid, RepositoryError> {
    if sha.len() != 40 || !sha.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(RepositoryError::InvalidArgument(format!(
            "'{sha}' is not a full commit SHA"
        )));
    }
    Ok(Oid::from_str(sha)?)
}

/// Use the token in place of a password; fall back to libgit2 defaults
fn install_credentials<'a>(callbacks: &mut RemoteCallbacks<'a>, token: Option<&'a str>) {
    callbacks.credentials(move |_url, username_from_url, _allowed_types| match token {
        Some(token) => Cred::userpass_plaintext(username_from_url.unwrap_or("x-access-token"), token),
        None => Cred::default(),
    });
}
