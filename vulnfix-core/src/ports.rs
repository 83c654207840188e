//! Port traits for I/O abstraction.
//!
//! The orchestrator only talks to the outside world through these traits.
//! Network-bound ports are async; subprocess-bound ports are synchronous and
//! called from the sequential fix loop.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use vulnfix_domain::Packument;

/// Package metadata lookups.
#[async_trait]
pub trait RegistryPort: Send + Sync {
    /// Base URL tarball locations are derived from.
    fn registry_url(&self) -> &str;

    async fn fetch_packument(&self, name: &str) -> anyhow::Result<Packument>;
}

/// The package manager that owns the checkout (npm or pnpm).
pub trait PackageManagerPort: Send + Sync {
    fn install(&self, dir: &Utf8Path) -> anyhow::Result<()>;

    fn run_script(&self, dir: &Utf8Path, script: &str) -> anyhow::Result<()>;

    fn remove_node_modules(&self, dir: &Utf8Path) -> anyhow::Result<()>;
}

/// Git operations on the checkout.
pub trait GitPort: Send + Sync {
    fn is_repo(&self, repo_root: &Utf8Path) -> bool;

    fn current_branch(&self, repo_root: &Utf8Path) -> anyhow::Result<String>;

    /// Paths (relative to the root) with uncommitted changes, untracked included.
    fn changed_files(&self, repo_root: &Utf8Path) -> anyhow::Result<Vec<Utf8PathBuf>>;

    /// Creates `branch` from the current HEAD and switches to it.
    fn create_branch(&self, repo_root: &Utf8Path, branch: &str) -> anyhow::Result<()>;

    fn commit(&self, repo_root: &Utf8Path, message: &str, files: &[Utf8PathBuf]) -> anyhow::Result<()>;

    fn push(&self, repo_root: &Utf8Path, branch: &str) -> anyhow::Result<()>;

    fn remote_branch_exists(&self, repo_root: &Utf8Path, branch: &str) -> anyhow::Result<bool>;

    fn delete_remote_branch(&self, repo_root: &Utf8Path, branch: &str) -> anyhow::Result<()>;

    fn delete_local_branch(&self, repo_root: &Utf8Path, branch: &str) -> anyhow::Result<()>;

    fn reset_hard(&self, repo_root: &Utf8Path, rev: &str) -> anyhow::Result<()>;

    /// Removes untracked and ignored files (`clean -fdx`).
    fn clean(&self, repo_root: &Utf8Path) -> anyhow::Result<()>;

    fn checkout(&self, repo_root: &Utf8Path, branch: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub head: String,

    /// GraphQL node id, needed to enable auto-merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

/// Code host pull request API.
#[async_trait]
pub trait PullRequestPort: Send + Sync {
    async fn find_open_pr(&self, head: &str) -> anyhow::Result<Option<PullRequest>>;

    async fn create_pr(&self, request: &NewPullRequest) -> anyhow::Result<PullRequest>;

    async fn enable_auto_merge(&self, pr: &PullRequest) -> anyhow::Result<()>;

    /// Head branches starting with `prefix` whose pull requests were closed
    /// or merged and that have no open pull request. Listings may be capped
    /// at a fixed number of pages, newest first.
    async fn closed_pr_branches(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

/// Destination for run artifacts (`report.json`, `report.md`).
pub trait ArtifactSink {
    fn write_artifact(&self, name: &str, contents: &[u8]) -> anyhow::Result<()>;
}
