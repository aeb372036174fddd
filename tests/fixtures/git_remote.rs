/// Git fixtures: a bare "remote" standing in for the hosting service, with an
/// integration branch and pull request heads published under refs/pull/N/head.
use chrono::{DateTime, Utc};
use git2::{Oid, Repository, Signature};
use merge_gate::config::RepositoryConfig;
use merge_gate::PullRequestRef;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const INTEGRATION_BRANCH: &str = "main";

pub struct RemoteFixture {
    _dir: TempDir,
    root: PathBuf,
    pub remote: Repository,
    pub initial: Oid,
}

impl RemoteFixture {
    /// Bare remote with a single README commit on `main`
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let root = dir.path().to_path_buf();
        let remote = Repository::init_bare(root.join("remote.git")).expect("Failed to init remote");
        remote
            .set_head(&branch_ref(INTEGRATION_BRANCH))
            .expect("Failed to point HEAD at main");

        let initial = commit_file(
            &remote,
            None,
            Some(&branch_ref(INTEGRATION_BRANCH)),
            "README.md",
            "# Fixture\n",
            "Initial commit",
        );

        Self {
            _dir: dir,
            root,
            remote,
            initial,
        }
    }

    pub fn url(&self) -> String {
        self.remote.path().to_string_lossy().into_owned()
    }

    /// Configuration for a working copy that does not exist yet and will be
    /// cloned from the remote on initialization
    pub fn repository_config(&self, name: &str) -> RepositoryConfig {
        RepositoryConfig {
            path: self.working_copy_path(name),
            remote_url: Some(self.url()),
            committer_name: "Fixture Gate".to_string(),
            committer_email: "gate@fixture.test".to_string(),
            ..RepositoryConfig::default()
        }
    }

    pub fn working_copy_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn branch_tip(&self, branch: &str) -> Oid {
        self.remote
            .refname_to_id(&branch_ref(branch))
            .expect("Branch missing on remote")
    }

    /// Publish a pull request whose commits each rewrite one file, oldest first
    pub fn publish_pull_request(
        &self,
        number: u64,
        changes: &[(&str, &str)],
        created_at: DateTime<Utc>,
    ) -> PullRequestRef {
        let mut parent = self.branch_tip(INTEGRATION_BRANCH);
        let mut commits = Vec::new();
        for (i, (path, content)) in changes.iter().enumerate() {
            let update_ref = (i + 1 == changes.len()).then(|| format!("refs/pull/{number}/head"));
            parent = commit_file(
                &self.remote,
                Some(parent),
                update_ref.as_deref(),
                path,
                content,
                &format!("Change {path} ({})", i + 1),
            );
            commits.push(parent.to_string());
        }

        PullRequestRef::new(number, created_at)
            .with_title(format!("Fixture pull request {number}"))
            .with_commits(commits)
            .with_base_branch(INTEGRATION_BRANCH)
    }

    /// Move the remote integration branch forward behind the gate's back
    pub fn advance_branch(&self, path: &str, content: &str) -> Oid {
        let tip = self.branch_tip(INTEGRATION_BRANCH);
        commit_file(
            &self.remote,
            Some(tip),
            Some(&branch_ref(INTEGRATION_BRANCH)),
            path,
            content,
            "Concurrent change",
        )
    }

    /// Content of `path` in the tree of `commit`
    pub fn read_file(&self, commit: Oid, path: &str) -> Option<String> {
        let tree = self.remote.find_commit(commit).ok()?.tree().ok()?;
        let entry = tree.get_path(Path::new(path)).ok()?;
        let blob = self.remote.find_blob(entry.id()).ok()?;
        Some(String::from_utf8_lossy(blob.content()).into_owned())
    }
}

pub fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{branch}")
}

pub fn signature() -> Signature<'static> {
    Signature::now("Fixture Author", "author@fixture.test").expect("Failed to build signature")
}

/// Commit a single top-level file on top of `parent` directly in the object
/// database; works for bare repositories
pub fn commit_file(
    repo: &Repository,
    parent: Option<Oid>,
    update_ref: Option<&str>,
    path: &str,
    content: &str,
    message: &str,
) -> Oid {
    let parent = parent.map(|oid| repo.find_commit(oid).expect("Parent commit missing"));
    let base_tree = parent.as_ref().map(|c| c.tree().expect("Parent tree missing"));

    let blob = repo.blob(content.as_bytes()).expect("Failed to write blob");
    let mut builder = repo
        .treebuilder(base_tree.as_ref())
        .expect("Failed to create tree builder");
    builder
        .insert(path, blob, 0o100644)
        .expect("Failed to insert blob");
    let tree = repo
        .find_tree(builder.write().expect("Failed to write tree"))
        .expect("Tree missing");

    let sig = signature();
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(update_ref, &sig, &sig, message, &tree, &parents)
        .expect("Failed to commit")
}

/// Number of commits reachable from `tip`
pub fn history_len(repo: &Repository, tip: Oid) -> usize {
    let mut revwalk = repo.revwalk().expect("Failed to create revwalk");
    revwalk.push(tip).expect("Failed to push tip");
    revwalk.count()
}
