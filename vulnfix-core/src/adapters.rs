//! Default port implementations: HTTP registry, shell package manager and
//! git, and the GitHub pull request API.

use crate::ports::{
    ArtifactSink, GitPort, NewPullRequest, PackageManagerPort, PullRequest, PullRequestPort,
    RegistryPort,
};
use anyhow::{Context, bail};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::process::Command;
use tracing::{debug, warn};
use vulnfix_domain::Packument;
use vulnfix_domain::lockfile::LockfileKind;
use vulnfix_scan::http::check_response;

const USER_AGENT: &str = concat!("vulnfix/", env!("CARGO_PKG_VERSION"));
const STDERR_TAIL: usize = 2000;

/// Upper bound on pages followed for one pull request listing.
const MAX_PAGES: usize = 50;

fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("build http client")
}

/// Registry path segment for a package name; the scope separator is escaped.
pub fn encode_package_name(name: &str) -> String {
    match name.strip_prefix('@') {
        Some(rest) => format!("@{}", urlencoding::encode(rest)),
        None => urlencoding::encode(name).into_owned(),
    }
}

/// npm-compatible registry over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRegistry {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn packument_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, encode_package_name(name))
    }
}

#[async_trait]
impl RegistryPort for HttpRegistry {
    fn registry_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_packument(&self, name: &str) -> anyhow::Result<Packument> {
        let url = self.packument_url(name);
        debug!(package = name, %url, "fetching packument");
        let resp = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("request packument for {name}"))?;
        let resp = check_response(resp)
            .await
            .with_context(|| format!("fetch packument for {name}"))?;
        resp.json::<Packument>()
            .await
            .with_context(|| format!("decode packument for {name}"))
    }
}

fn tail(text: &str) -> &str {
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text;
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Runs `program args..` in `dir`, returning stdout; a non-zero exit becomes
/// an error carrying the tail of stderr.
fn run_command(program: &str, args: &[&str], dir: &Utf8Path) -> anyhow::Result<String> {
    debug!(program, args = ?args, %dir, "running command");
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn {program}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "`{program} {}` failed ({}): {}",
            args.join(" "),
            output.status,
            tail(&stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// npm or pnpm, invoked as a subprocess.
#[derive(Debug, Clone, Copy)]
pub struct ShellPackageManager {
    pub kind: LockfileKind,
}

impl ShellPackageManager {
    pub fn new(kind: LockfileKind) -> Self {
        Self { kind }
    }

    fn install_args(&self) -> &'static [&'static str] {
        match self.kind {
            LockfileKind::Npm => &["install", "--no-audit", "--no-fund"],
            // the lockfile is reconciled by pnpm from the edited manifests
            LockfileKind::Pnpm => &["install", "--no-frozen-lockfile"],
        }
    }
}

impl PackageManagerPort for ShellPackageManager {
    fn install(&self, dir: &Utf8Path) -> anyhow::Result<()> {
        run_command(self.kind.agent(), self.install_args(), dir)
            .with_context(|| format!("{} install in {dir}", self.kind.agent()))?;
        Ok(())
    }

    fn run_script(&self, dir: &Utf8Path, script: &str) -> anyhow::Result<()> {
        run_command(self.kind.agent(), &["run", script], dir)
            .with_context(|| format!("{} run {script} in {dir}", self.kind.agent()))?;
        Ok(())
    }

    fn remove_node_modules(&self, dir: &Utf8Path) -> anyhow::Result<()> {
        let path = dir.join("node_modules");
        if path.is_dir() {
            fs::remove_dir_all(&path).with_context(|| format!("remove {path}"))?;
        }
        Ok(())
    }
}

/// Committer identity passed with `-c user.name=.. -c user.email=..`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitAuthor {
    pub name: String,
    pub email: String,
}

/// Git via the `git` executable.
#[derive(Debug, Clone)]
pub struct ShellGitPort {
    pub remote: String,
    pub author: Option<GitAuthor>,
}

impl Default for ShellGitPort {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            author: None,
        }
    }
}

impl ShellGitPort {
    fn git(&self, repo_root: &Utf8Path, args: &[&str]) -> anyhow::Result<String> {
        run_command("git", args, repo_root)
    }
}

/// Paths from `git status --porcelain` output; renames report the new path.
pub fn parse_porcelain(status: &str) -> Vec<Utf8PathBuf> {
    status
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path = &line[3..];
            let path = path.rsplit_once(" -> ").map_or(path, |(_, to)| to);
            Utf8PathBuf::from(path.trim_matches('"'))
        })
        .collect()
}

impl GitPort for ShellGitPort {
    fn is_repo(&self, repo_root: &Utf8Path) -> bool {
        self.git(repo_root, &["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.trim() == "true")
            .unwrap_or(false)
    }

    fn current_branch(&self, repo_root: &Utf8Path) -> anyhow::Result<String> {
        let out = self.git(repo_root, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    fn changed_files(&self, repo_root: &Utf8Path) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let out = self.git(repo_root, &["status", "--porcelain", "--untracked-files=all"])?;
        Ok(parse_porcelain(&out))
    }

    fn create_branch(&self, repo_root: &Utf8Path, branch: &str) -> anyhow::Result<()> {
        self.git(repo_root, &["checkout", "-b", branch])
            .with_context(|| format!("create branch {branch}"))?;
        Ok(())
    }

    fn commit(&self, repo_root: &Utf8Path, message: &str, files: &[Utf8PathBuf]) -> anyhow::Result<()> {
        if files.is_empty() {
            bail!("nothing to commit");
        }
        let mut add = vec!["add", "--"];
        add.extend(files.iter().map(|f| f.as_str()));
        self.git(repo_root, &add)?;

        let identity = self
            .author
            .as_ref()
            .map(|a| (format!("user.name={}", a.name), format!("user.email={}", a.email)));
        let mut args: Vec<&str> = Vec::new();
        if let Some((name, email)) = &identity {
            args.extend(["-c", name.as_str(), "-c", email.as_str()]);
        }
        args.extend(["commit", "-m", message]);
        self.git(repo_root, &args).context("git commit")?;
        Ok(())
    }

    fn push(&self, repo_root: &Utf8Path, branch: &str) -> anyhow::Result<()> {
        self.git(repo_root, &["push", "--set-upstream", &self.remote, branch])
            .with_context(|| format!("push {branch}"))?;
        Ok(())
    }

    fn remote_branch_exists(&self, repo_root: &Utf8Path, branch: &str) -> anyhow::Result<bool> {
        let out = self.git(repo_root, &["ls-remote", "--heads", &self.remote, branch])?;
        Ok(!out.trim().is_empty())
    }

    fn delete_remote_branch(&self, repo_root: &Utf8Path, branch: &str) -> anyhow::Result<()> {
        self.git(repo_root, &["push", &self.remote, "--delete", branch])
            .with_context(|| format!("delete remote branch {branch}"))?;
        Ok(())
    }

    fn delete_local_branch(&self, repo_root: &Utf8Path, branch: &str) -> anyhow::Result<()> {
        self.git(repo_root, &["branch", "-D", branch])
            .with_context(|| format!("delete local branch {branch}"))?;
        Ok(())
    }

    fn reset_hard(&self, repo_root: &Utf8Path, rev: &str) -> anyhow::Result<()> {
        self.git(repo_root, &["reset", "--hard", rev])?;
        Ok(())
    }

    fn clean(&self, repo_root: &Utf8Path) -> anyhow::Result<()> {
        self.git(repo_root, &["clean", "-fdx"])?;
        Ok(())
    }

    fn checkout(&self, repo_root: &Utf8Path, branch: &str) -> anyhow::Result<()> {
        self.git(repo_root, &["checkout", branch])
            .with_context(|| format!("checkout {branch}"))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GhPull {
    number: u64,
    html_url: String,
    #[serde(default)]
    node_id: Option<String>,
    head: GhRef,
}

#[derive(Debug, Deserialize)]
struct GhRef {
    #[serde(rename = "ref")]
    name: String,
}

impl From<GhPull> for PullRequest {
    fn from(pull: GhPull) -> Self {
        PullRequest {
            number: pull.number,
            url: pull.html_url,
            head: pull.head.name,
            node_id: pull.node_id,
        }
    }
}

const AUTO_MERGE_MUTATION: &str = "mutation($pullRequestId: ID!, $mergeMethod: PullRequestMergeMethod!) {
  enablePullRequestAutoMerge(input: {pullRequestId: $pullRequestId, mergeMethod: $mergeMethod}) {
    pullRequest { number }
  }
}";

/// GitHub REST for pull requests, GraphQL for auto-merge.
#[derive(Debug, Clone)]
pub struct GitHubPullRequests {
    http: reqwest::Client,
    api_url: String,
    repository: String,
    token: String,
}

impl GitHubPullRequests {
    pub fn new(api_url: impl Into<String>, repository: impl Into<String>, token: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client()?,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            repository: repository.into(),
            token: token.into(),
        })
    }

    fn owner(&self) -> &str {
        self.repository.split('/').next().unwrap_or(&self.repository)
    }

    fn pulls_url(&self) -> String {
        format!("{}/repos/{}/pulls", self.api_url, self.repository)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn list_pulls(&self, query: &[(&str, &str)]) -> anyhow::Result<Vec<GhPull>> {
        let resp = self
            .request(reqwest::Method::GET, &self.pulls_url())
            .query(query)
            .send()
            .await
            .context("list pull requests")?;
        let resp = check_response(resp).await.context("list pull requests")?;
        resp.json().await.context("decode pull request list")
    }

    /// Like `list_pulls`, following `Link: rel="next"` up to [`MAX_PAGES`].
    async fn list_all_pulls(&self, query: &[(&str, &str)]) -> anyhow::Result<Vec<GhPull>> {
        let mut pulls = Vec::new();
        let mut request = self.request(reqwest::Method::GET, &self.pulls_url()).query(query);
        for _ in 0..MAX_PAGES {
            let resp = request.send().await.context("list pull requests")?;
            let resp = check_response(resp).await.context("list pull requests")?;
            let next = resp
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_link);
            let page: Vec<GhPull> = resp.json().await.context("decode pull request list")?;
            pulls.extend(page);
            match next {
                Some(url) => request = self.request(reqwest::Method::GET, &url),
                None => return Ok(pulls),
            }
        }
        warn!(pages = MAX_PAGES, fetched = pulls.len(), "pull request listing truncated");
        Ok(pulls)
    }
}

/// Target of the `rel="next"` entry in a `Link` header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == r#"rel="next""#)
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

#[async_trait]
impl PullRequestPort for GitHubPullRequests {
    async fn find_open_pr(&self, head: &str) -> anyhow::Result<Option<PullRequest>> {
        let head = format!("{}:{head}", self.owner());
        let pulls = self.list_pulls(&[("state", "open"), ("head", head.as_str())]).await?;
        Ok(pulls.into_iter().next().map(PullRequest::from))
    }

    async fn create_pr(&self, request: &NewPullRequest) -> anyhow::Result<PullRequest> {
        let body = json!({
            "title": request.title,
            "head": request.head,
            "base": request.base,
            "body": request.body,
        });
        let resp = self
            .request(reqwest::Method::POST, &self.pulls_url())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("open pull request for {}", request.head))?;
        let resp = check_response(resp)
            .await
            .with_context(|| format!("open pull request for {}", request.head))?;
        let pull: GhPull = resp.json().await.context("decode created pull request")?;
        Ok(pull.into())
    }

    async fn enable_auto_merge(&self, pr: &PullRequest) -> anyhow::Result<()> {
        let Some(node_id) = &pr.node_id else {
            bail!("pull request #{} has no node id", pr.number);
        };
        let body = json!({
            "query": AUTO_MERGE_MUTATION,
            "variables": { "pullRequestId": node_id, "mergeMethod": "SQUASH" },
        });
        let url = format!("{}/graphql", self.api_url);
        let resp = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await
            .context("enable auto-merge")?;
        let resp = check_response(resp).await.context("enable auto-merge")?;
        let payload: serde_json::Value = resp.json().await.context("decode graphql response")?;
        if let Some(errors) = payload.get("errors").filter(|e| !e.is_null()) {
            bail!("enable auto-merge for #{}: {errors}", pr.number);
        }
        Ok(())
    }

    async fn closed_pr_branches(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let query = [("state", "closed"), ("per_page", "100"), ("sort", "updated"), ("direction", "desc")];
        let closed = self.list_all_pulls(&query).await?;
        let open: BTreeSet<String> = self
            .list_all_pulls(&[("state", "open"), ("per_page", "100")])
            .await?
            .into_iter()
            .map(|p| p.head.name)
            .collect();
        let branches: BTreeSet<String> = closed
            .into_iter()
            .map(|p| p.head.name)
            .filter(|name| name.starts_with(prefix) && !open.contains(name))
            .collect();
        Ok(branches.into_iter().collect())
    }
}

/// Writes artifacts under one output directory, creating it on demand.
#[derive(Debug, Clone)]
pub struct DirArtifactSink {
    pub out_dir: Utf8PathBuf,
}

impl DirArtifactSink {
    pub fn new(out_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

impl ArtifactSink for DirArtifactSink {
    fn write_artifact(&self, name: &str, contents: &[u8]) -> anyhow::Result<()> {
        fs::create_dir_all(&self.out_dir).with_context(|| format!("create {}", self.out_dir))?;
        let path = self.out_dir.join(name);
        fs::write(&path, contents).with_context(|| format!("write {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run_git(root: &Utf8Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(root)
            .status()
            .expect("run git");
        assert!(status.success(), "git {:?} failed", args);
    }

    fn make_git_repo() -> (TempDir, Utf8PathBuf) {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
        run_git(&root, &["init", "-q", "-b", "main"]);
        run_git(&root, &["config", "user.name", "vulnfix-test"]);
        run_git(&root, &["config", "user.email", "vulnfix@test.invalid"]);
        run_git(&root, &["commit", "-q", "--allow-empty", "-m", "init"]);
        (temp, root)
    }

    #[test]
    fn scoped_names_escape_the_slash() {
        assert_eq!(encode_package_name("lodash"), "lodash");
        assert_eq!(encode_package_name("@babel/core"), "@babel%2Fcore");
    }

    #[test]
    fn packument_url_joins_base() {
        let registry = HttpRegistry::new("https://registry.example.test/").unwrap();
        assert_eq!(
            registry.packument_url("@types/node"),
            "https://registry.example.test/@types%2Fnode"
        );
        assert_eq!(registry.registry_url(), "https://registry.example.test");
    }

    #[test]
    fn porcelain_paths() {
        let out = " M package.json\n?? packages/web/new.txt\nR  old.js -> new.js\n";
        assert_eq!(
            parse_porcelain(out),
            vec![
                Utf8PathBuf::from("package.json"),
                Utf8PathBuf::from("packages/web/new.txt"),
                Utf8PathBuf::from("new.js"),
            ]
        );
    }

    #[test]
    fn stderr_tail_respects_char_boundaries() {
        let long = "é".repeat(STDERR_TAIL);
        let t = tail(&long);
        assert!(t.len() <= STDERR_TAIL);
        assert!(t.chars().all(|c| c == 'é'));
    }

    #[test]
    fn github_pull_decodes() {
        let raw = r#"{"number":7,"html_url":"https://github.com/acme/web/pull/7","node_id":"PR_x","head":{"ref":"vulnfix/root/lodash-4.17.21"}}"#;
        let pull: PullRequest = serde_json::from_str::<GhPull>(raw).unwrap().into();
        assert_eq!(pull.number, 7);
        assert_eq!(pull.head, "vulnfix/root/lodash-4.17.21");
        assert_eq!(pull.node_id.as_deref(), Some("PR_x"));
    }

    #[test]
    fn link_header_next_page() {
        let header = r#"<https://api.github.com/repositories/1/pulls?state=closed&page=2>; rel="next", <https://api.github.com/repositories/1/pulls?state=closed&page=9>; rel="last""#;
        assert_eq!(
            next_link(header).as_deref(),
            Some("https://api.github.com/repositories/1/pulls?state=closed&page=2")
        );

        let last_page = r#"<https://api.github.com/repositories/1/pulls?page=1>; rel="first", <https://api.github.com/repositories/1/pulls?page=8>; rel="prev""#;
        assert_eq!(next_link(last_page), None);
        assert_eq!(next_link(""), None);
    }

    #[test]
    fn shell_git_port_outside_repo() {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
        assert!(!ShellGitPort::default().is_repo(&root));
    }

    #[test]
    fn shell_git_port_branch_commit_and_reset() {
        let (_temp, root) = make_git_repo();
        let git = ShellGitPort::default();
        assert!(git.is_repo(&root));
        assert_eq!(git.current_branch(&root).unwrap(), "main");

        fs::write(root.join("package.json"), "{}\n").unwrap();
        let changed = git.changed_files(&root).unwrap();
        assert_eq!(changed, vec![Utf8PathBuf::from("package.json")]);

        git.create_branch(&root, "vulnfix/root/a-1.0.1").unwrap();
        git.commit(&root, "fix(deps): bump a", &changed).unwrap();
        assert!(git.changed_files(&root).unwrap().is_empty());

        git.checkout(&root, "main").unwrap();
        assert!(!root.join("package.json").exists());
        git.delete_local_branch(&root, "vulnfix/root/a-1.0.1").unwrap();

        fs::write(root.join("stray.txt"), "x").unwrap();
        git.reset_hard(&root, "HEAD").unwrap();
        git.clean(&root).unwrap();
        assert!(!root.join("stray.txt").exists());
    }

    #[test]
    fn artifact_sink_creates_out_dir() {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
        let sink = DirArtifactSink::new(root.join("artifacts/vulnfix"));
        sink.write_artifact("report.md", b"# vulnfix run\n").unwrap();
        let text = fs::read_to_string(root.join("artifacts/vulnfix/report.md")).unwrap();
        assert_eq!(text, "# vulnfix run\n");
    }

    #[test]
    fn remove_node_modules_is_idempotent() {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
        fs::create_dir_all(root.join("node_modules/lodash")).unwrap();
        let pm = ShellPackageManager::new(LockfileKind::Npm);
        pm.remove_node_modules(&root).unwrap();
        pm.remove_node_modules(&root).unwrap();
        assert!(!root.join("node_modules").exists());
    }
}
