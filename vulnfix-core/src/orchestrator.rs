//! Sequential fix loop: one candidate at a time against one checkout.
//!
//! A candidate is (workspace, package, installed version, alert). Each one
//! runs as a transaction: select a target, mutate the tree and manifest,
//! persist, install and optionally test. Failures restore the touched files
//! and are recorded on the attempt; they never stop the loop.

use crate::branches::{
    branch_name, cleanup_error_branches, cleanup_failed_pr_branches,
    cleanup_stale_branch, cleanup_successful_pr_local_branch,
};
use crate::error::FixError;
use crate::ports::{GitPort, NewPullRequest, PackageManagerPort, PullRequestPort, RegistryPort};
use crate::settings::{CiSettings, FixSettings};
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use semver::Version;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use vulnfix_domain::lockfile::{self, LoadedLockfile};
use vulnfix_domain::ports::ProjectDir;
use vulnfix_domain::range::parse_version;
use vulnfix_domain::{
    CuratedCatalog, NodeId, NpmRange, Packument, SelectRequest, TreeError, select_patch_version,
    update_node,
};
use vulnfix_edit::{
    DEPENDENCY_SECTIONS, EditableManifest, FileSnapshot, MANIFEST_FILE, rewrite, set_override,
};
use vulnfix_policy::VulnInfo;
use vulnfix_render::{render_commit_message, render_pr_body, render_pr_title};
use vulnfix_types::attempt::{BranchRecord, BranchState, FixAttempt, FixStage, SkipReason};
use vulnfix_types::report::RunReport;

/// Every external effect the loop needs.
#[derive(Clone, Copy)]
pub struct Ports<'a> {
    pub registry: &'a dyn RegistryPort,
    pub package_manager: &'a dyn PackageManagerPort,
    pub git: &'a dyn GitPort,

    /// Required for publishing in CI; unused otherwise.
    pub pull_requests: Option<&'a dyn PullRequestPort>,
}

#[derive(Debug, Clone)]
struct Candidate {
    /// Tree location of the workspace; "" for the root.
    location: String,
    old_version: String,
    info: VulnInfo,
}

impl Candidate {
    fn workspace(&self) -> &str {
        if self.location.is_empty() { "." } else { &self.location }
    }
}

pub struct Orchestrator<'a> {
    settings: &'a FixSettings,
    ports: Ports<'a>,
    catalog: &'a CuratedCatalog,
    view: ProjectDir,
    lockfile: LoadedLockfile,
    in_git: bool,
    applied: BTreeSet<String>,
    fixed: usize,

    /// Set when the checkout could not be restored after an attempt.
    unsettled: Option<String>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        settings: &'a FixSettings,
        ports: Ports<'a>,
        catalog: &'a CuratedCatalog,
        lockfile: LoadedLockfile,
    ) -> Self {
        let in_git = ports.git.is_repo(&settings.repo_root);
        Self {
            settings,
            ports,
            catalog,
            view: ProjectDir::new(settings.repo_root.clone()),
            lockfile,
            in_git,
            applied: BTreeSet::new(),
            fixed: 0,
            unsettled: None,
        }
    }

    pub fn lockfile(&self) -> &LoadedLockfile {
        &self.lockfile
    }

    fn root(&self) -> &Utf8Path {
        &self.settings.repo_root
    }

    fn limit_reached(&self) -> bool {
        self.settings.limit.is_some_and(|limit| self.fixed >= limit)
    }

    fn reload(&mut self) -> anyhow::Result<()> {
        self.lockfile = lockfile::load(&self.view).context("reload lockfile")?;
        Ok(())
    }

    /// Brings the checkout and the in-memory tree back to the base state.
    fn recover(&mut self) -> anyhow::Result<()> {
        match &self.settings.ci {
            Some(ci) => self.reset_to_base(ci),
            None => self.reload(),
        }
    }

    fn restore_checkout(&mut self) {
        if let Err(err) = self.recover() {
            let cause = format!("{err:#}");
            warn!(%cause, "could not restore checkout");
            self.unsettled = Some(cause);
        }
    }

    /// Retries a recovery that failed after an earlier attempt.
    fn settle(&mut self) -> Result<(), String> {
        let Some(previous) = self.unsettled.take() else {
            return Ok(());
        };
        debug!(%previous, "retrying checkout recovery");
        self.recover().map_err(|err| {
            let cause = format!("{err:#}");
            self.unsettled = Some(cause.clone());
            cause
        })
    }

    fn manifest_path(&self, location: &str) -> Utf8PathBuf {
        if location.is_empty() {
            self.root().join(MANIFEST_FILE)
        } else {
            self.root().join(location).join(MANIFEST_FILE)
        }
    }

    /// Deletes this tool's branches whose pull requests were closed or merged.
    pub async fn prune_stale_branches(&self, report: &mut RunReport) {
        let (Some(ci), Some(prs)) = (&self.settings.ci, self.ports.pull_requests) else {
            return;
        };
        if !ci.prune_stale_branches {
            return;
        }
        let prefix = format!("{}/", self.settings.branch_prefix());
        let branches = match prs.closed_pr_branches(&prefix).await {
            Ok(branches) => branches,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "could not list closed pull requests");
                report.errors.push(format!("list closed pull requests: {err:#}"));
                return;
            }
        };

        for branch in branches {
            match self.ports.git.remote_branch_exists(self.root(), &branch) {
                Ok(true) => {
                    let mut record = BranchRecord::new(&branch);
                    record.state = if cleanup_stale_branch(self.ports.git, self.root(), &branch) {
                        BranchState::Stale
                    } else {
                        BranchState::Errored
                    };
                    info!(%branch, state = ?record.state, "pruned stale branch");
                    report.pruned_branches.push(record);
                }
                Ok(false) => debug!(%branch, "stale branch already gone"),
                Err(err) => warn!(%branch, error = %format!("{err:#}"), "could not query remote branch"),
            }
        }
    }

    /// Workspaces (root last) × installed versions × alerts matching them.
    fn candidates(&self, name: &str, infos: &[VulnInfo]) -> Result<Vec<Candidate>, TreeError> {
        let tree = &self.lockfile.tree;
        let mut workspaces: Vec<NodeId> = tree.workspaces().to_vec();
        workspaces.push(tree.root());

        let mut out = Vec::new();
        for ws in workspaces {
            let versions: BTreeSet<String> = tree
                .workspace_nodes_named(ws, name)?
                .into_iter()
                .map(|id| tree.node(id).version().to_string())
                .collect();
            for old in versions {
                let Some(installed) = parse_version(&old) else {
                    debug!(package = name, version = %old, "skipping non-semver install");
                    continue;
                };
                for info in infos {
                    let matches = info
                        .vulnerable_range()
                        .and_then(|r| NpmRange::parse(&r).ok())
                        .is_some_and(|r| r.satisfies(&installed));
                    if matches {
                        out.push(Candidate {
                            location: tree.node(ws).location.clone(),
                            old_version: old.clone(),
                            info: info.clone(),
                        });
                    }
                }
            }
        }
        Ok(out)
    }

    /// Works through every package in `fix_map`, recording one attempt per
    /// candidate. A checkout that cannot be restored fails the candidates
    /// that follow until a later recovery succeeds.
    pub async fn fix_all(&mut self, fix_map: &BTreeMap<String, Vec<VulnInfo>>, report: &mut RunReport) {
        for (name, infos) in fix_map {
            let candidates = match self.candidates(name, infos) {
                Ok(candidates) => candidates,
                Err(err) => {
                    warn!(package = %name, error = %err, "could not enumerate installs");
                    report.errors.push(format!("enumerate installs of {name}: {err}"));
                    continue;
                }
            };
            if candidates.is_empty() {
                debug!(package = %name, "no installed version matches an alert");
                continue;
            }

            if self.limit_reached() {
                for candidate in &candidates {
                    let mut attempt = discovered(name, candidate);
                    attempt.skipped(SkipReason::LimitReached);
                    report.push(attempt);
                }
                continue;
            }

            if self.catalog.is_drop_in(name) {
                info!(package = %name, "curated drop-in replacement available; skipping");
                for candidate in &candidates {
                    let mut attempt = discovered(name, candidate);
                    attempt.skipped(SkipReason::CuratedReplacement);
                    report.push(attempt);
                }
                continue;
            }

            let packument = match self.ports.registry.fetch_packument(name).await {
                Ok(packument) => packument,
                Err(err) => {
                    let cause = format!("{err:#}");
                    for candidate in &candidates {
                        let mut attempt = discovered(name, candidate);
                        fail(&mut attempt, &cause);
                        report.push(attempt);
                    }
                    continue;
                }
            };
            let available = packument.available_versions();

            for candidate in &candidates {
                if self.limit_reached() {
                    let mut attempt = discovered(name, candidate);
                    attempt.skipped(SkipReason::LimitReached);
                    report.push(attempt);
                    continue;
                }
                if let Err(cause) = self.settle() {
                    let mut attempt = discovered(name, candidate);
                    fail(&mut attempt, format!("checkout not restored: {cause}"));
                    report.push(attempt);
                    continue;
                }
                let attempt = self.attempt(name, candidate, &packument, &available).await;
                if let Some(cause) = &self.unsettled {
                    report
                        .errors
                        .push(format!("restore checkout after {name} in {}: {cause}", attempt.workspace));
                }
                report.push(attempt);
            }
        }
    }

    /// Whether another workspace already moved `name` to `target` this run.
    fn applied_elsewhere(&self, name: &str, target: &Version) -> bool {
        let suffix = format!(":{name}@{target}");
        self.applied.iter().any(|key| key.ends_with(&suffix))
    }

    fn select_target(&self, name: &str, candidate: &Candidate, available: &[Version]) -> Option<Version> {
        let current = parse_version(&candidate.old_version)?;
        let vulnerable = NpmRange::parse(&candidate.info.vulnerable_range()?).ok()?;
        let first_patched = candidate.info.first_patched().and_then(parse_version);
        select_patch_version(
            &SelectRequest {
                name,
                current: &current,
                available,
                vulnerable: &vulnerable,
                first_patched: first_patched.as_ref(),
            },
            self.catalog,
        )
    }

    async fn attempt(
        &mut self,
        name: &str,
        candidate: &Candidate,
        packument: &Packument,
        available: &[Version],
    ) -> FixAttempt {
        let settings = self.settings;
        let workspace = candidate.workspace();
        let mut attempt = discovered(name, candidate);

        let Some(target) = self.select_target(name, candidate, available) else {
            let err = FixError::NoSuitableVersion {
                package: name.to_string(),
                version: candidate.old_version.clone(),
            };
            fail(&mut attempt, err);
            return attempt;
        };
        attempt.target_version = Some(target.to_string());
        attempt.enter(FixStage::PatchSelected);

        let key = format!("{workspace}:{name}@{target}");
        if self.applied.contains(&key) {
            debug!(package = %name, %workspace, %target, "already applied this run");
            attempt.skipped(SkipReason::AlreadyApplied);
            return attempt;
        }
        let Some(metadata) = packument.metadata(&target) else {
            fail(&mut attempt, format!("registry has no metadata for {name}@{target}"));
            return attempt;
        };

        let tree = &self.lockfile.tree;
        let Some(ws_id) = tree.by_location(&candidate.location) else {
            fail(&mut attempt, format!("workspace `{workspace}` missing from reloaded lockfile"));
            return attempt;
        };
        let installed = match tree.workspace_nodes_named(ws_id, name) {
            Ok(found) => found,
            Err(err) => {
                fail(&mut attempt, err);
                return attempt;
            }
        };
        let mut nodes: Vec<NodeId> = installed
            .iter()
            .copied()
            .filter(|id| tree.node(*id).version() == candidate.old_version)
            .collect();
        // A hoisted install shared with a workspace fixed earlier this run is
        // already at the target; only this workspace's manifest is left.
        let synced = nodes.is_empty() && self.applied_elsewhere(name, &target);
        if synced {
            let target = target.to_string();
            nodes = installed
                .into_iter()
                .filter(|id| tree.node(*id).version() == target && tree.is_top_level(ws_id, *id))
                .collect();
        }
        if nodes.is_empty() {
            debug!(package = %name, %workspace, old = %candidate.old_version, "version no longer installed");
            attempt.skipped(SkipReason::AlreadyApplied);
            return attempt;
        }
        let top = nodes.iter().copied().find(|id| tree.is_top_level(ws_id, *id));
        let is_root = ws_id == tree.root();

        let manifest_path = self.manifest_path(&candidate.location);
        let lock_path = self.view.path(&self.lockfile.path);
        let snapshots = match (FileSnapshot::capture(&manifest_path), FileSnapshot::capture(&lock_path)) {
            (Ok(manifest), Ok(lock)) => [manifest, lock],
            (Err(err), _) | (_, Err(err)) => {
                fail(&mut attempt, format!("{err:#}"));
                return attempt;
            }
        };
        let mut manifest = match EditableManifest::load(&manifest_path) {
            Ok(manifest) => manifest,
            Err(err) => {
                fail(&mut attempt, err);
                return attempt;
            }
        };

        let registry = self.ports.registry.registry_url().to_string();
        let mut mutated = false;
        for id in &nodes {
            match update_node(&mut self.lockfile.tree, *id, &target, metadata, &registry) {
                Ok(changed) => mutated |= changed,
                Err(err) => {
                    fail(&mut attempt, err);
                    self.restore_checkout();
                    return attempt;
                }
            }
        }

        let section = DEPENDENCY_SECTIONS
            .into_iter()
            .find(|s| manifest.dependency(s, name).is_some());
        attempt.old_spec = section.and_then(|s| manifest.dependency(s, name)).map(str::to_string);

        let mut changed = match top {
            Some(id) => rewrite(
                &mut manifest,
                &self.lockfile.tree,
                ws_id,
                id,
                &target,
                settings.range_style,
            ),
            None => false,
        };
        if changed {
            attempt.new_spec = section.and_then(|s| manifest.dependency(s, name)).map(str::to_string);
        } else if section.is_none() && is_root && settings.write_overrides && !synced {
            changed = set_override(
                &mut manifest,
                self.lockfile.kind,
                name,
                &candidate.old_version,
                &target.to_string(),
            );
        }

        if !changed {
            debug!(package = %name, %workspace, "manifest unchanged; not installing");
            if mutated {
                self.restore_checkout();
            }
            attempt.skipped(if synced {
                SkipReason::AlreadyApplied
            } else {
                SkipReason::ManifestUnchanged
            });
            return attempt;
        }

        self.applied.insert(key);
        attempt.manifest_diff = manifest.pending_diff().ok().filter(|d| !d.is_empty());

        match self.install_and_verify(&mut manifest, &lock_path, &mut attempt) {
            Ok(()) => {
                attempt.fixed();
                self.fixed += 1;
                info!(package = %name, %workspace, from = %candidate.old_version, to = %target, "fixed");
                if let Some(ci) = &settings.ci
                    && let Err(err) = self.publish(&mut attempt, ci).await
                {
                    warn!(package = %name, %workspace, cause = %err, "publishing failed");
                    attempt.failed(err.to_string());
                }
            }
            Err(err) => {
                warn!(package = %name, %workspace, cause = %err, "fix failed; reverting");
                attempt.failed(err.to_string());
                self.revert(&snapshots);
                attempt.enter(FixStage::Reverted);
            }
        }
        self.restore_checkout();
        attempt
    }

    fn install_and_verify(
        &mut self,
        manifest: &mut EditableManifest,
        lock_path: &Utf8Path,
        attempt: &mut FixAttempt,
    ) -> Result<(), FixError> {
        let io = |err: String| FixError::InstallOrTestFailure { cause: err };

        manifest.save().map_err(|e| io(format!("write manifest: {e}")))?;
        if let Some(text) = self.lockfile.render().map_err(|e| io(format!("render lockfile: {e}")))? {
            fs::write(lock_path, text).map_err(|e| io(format!("write lockfile: {e}")))?;
        }

        attempt.enter(FixStage::Installing);
        self.ports
            .package_manager
            .install(self.root())
            .map_err(|e| FixError::install(&e))?;

        if self.settings.run_tests {
            self.ports
                .package_manager
                .run_script(self.root(), &self.settings.test_script)
                .map_err(|e| FixError::install(&e))?;
            attempt.enter(FixStage::Tested);
        }
        Ok(())
    }

    /// Puts the checkout back the way it was before the attempt.
    ///
    /// Snapshotted files are restored first. Inside a git checkout the
    /// worktree then gets `reset --hard` + `clean -fdx`; outside git
    /// `node_modules` is removed and reinstalled.
    fn revert(&self, snapshots: &[FileSnapshot]) {
        for snapshot in snapshots {
            if let Err(err) = snapshot.restore() {
                warn!(path = %snapshot.path, error = %format!("{err:#}"), "could not restore snapshot");
            }
        }

        let root = self.root();
        if self.in_git {
            let reset = self
                .ports
                .git
                .reset_hard(root, "HEAD")
                .and_then(|()| self.ports.git.clean(root));
            if let Err(err) = reset {
                warn!(error = %format!("{err:#}"), "git reset after failed attempt");
            }
            return;
        }

        let reinstall = self
            .ports
            .package_manager
            .remove_node_modules(root)
            .and_then(|()| self.ports.package_manager.install(root));
        if let Err(err) = reinstall {
            warn!(error = %format!("{err:#}"), "reinstall after failed attempt");
        }
    }

    fn reset_to_base(&mut self, ci: &CiSettings) -> anyhow::Result<()> {
        let git = self.ports.git;
        let root = self.root();
        git.checkout(root, &ci.base_branch)?;
        git.reset_hard(root, "HEAD")?;
        git.clean(root)?;
        self.reload()
    }

    async fn publish(&self, attempt: &mut FixAttempt, ci: &CiSettings) -> Result<(), FixError> {
        let Some(prs) = self.ports.pull_requests else {
            warn!(package = %attempt.package, "no pull request port configured; not publishing");
            return Ok(());
        };
        let git = self.ports.git;
        let root = self.root();
        let target = attempt.target_version.clone().unwrap_or_default();
        let branch = branch_name(
            self.settings.branch_prefix(),
            &attempt.workspace,
            &attempt.package,
            &target,
        );
        let mut record = BranchRecord::new(&branch);

        if let Some(pr) = prs.find_open_pr(&branch).await.map_err(|e| FixError::git(&e))? {
            info!(%branch, pr = pr.number, "pull request already open");
            record.state = BranchState::PrOpen;
            record.pr_number = Some(pr.number);
            record.pr_url = Some(pr.url);
            attempt.branch = Some(record);
            return Ok(());
        }
        if git.remote_branch_exists(root, &branch).map_err(|e| FixError::git(&e))? {
            info!(%branch, "remote branch already exists");
            record.state = BranchState::Pushed;
            attempt.branch = Some(record);
            return Ok(());
        }

        let leave = |git: &dyn GitPort| {
            if let Err(err) = git.checkout(root, &ci.base_branch) {
                warn!(branch = %ci.base_branch, error = %format!("{err:#}"), "could not return to base branch");
            }
        };

        if let Err(err) = git.create_branch(root, &branch) {
            cleanup_error_branches(git, root, &branch, false);
            return Err(FixError::git(&err));
        }
        record.state = BranchState::Created;

        let committed = git
            .changed_files(root)
            .and_then(|files| git.commit(root, &render_commit_message(attempt), &files))
            .and_then(|()| git.push(root, &branch));
        if let Err(err) = committed {
            leave(git);
            cleanup_error_branches(git, root, &branch, false);
            record.state = BranchState::Errored;
            attempt.branch = Some(record);
            return Err(FixError::git(&err));
        }
        record.state = BranchState::Pushed;

        let request = NewPullRequest {
            head: branch.clone(),
            base: ci.base_branch.clone(),
            title: render_pr_title(attempt),
            body: render_pr_body(attempt),
        };
        let pr = match prs.create_pr(&request).await {
            Ok(pr) => pr,
            Err(err) => {
                leave(git);
                cleanup_failed_pr_branches(git, root, &branch);
                record.state = BranchState::Errored;
                attempt.branch = Some(record);
                return Err(FixError::git(&err));
            }
        };
        info!(%branch, pr = pr.number, url = %pr.url, "opened pull request");
        record.state = BranchState::PrOpen;
        record.pr_number = Some(pr.number);
        record.pr_url = Some(pr.url.clone());

        if ci.auto_merge
            && let Err(err) = prs.enable_auto_merge(&pr).await
        {
            warn!(pr = pr.number, error = %format!("{err:#}"), "could not enable auto-merge");
        }

        leave(git);
        cleanup_successful_pr_local_branch(git, root, &branch);
        attempt.branch = Some(record);
        attempt.enter(FixStage::Published);
        Ok(())
    }
}

fn fail(attempt: &mut FixAttempt, cause: impl std::fmt::Display) {
    warn!(package = %attempt.package, workspace = %attempt.workspace, %cause, "fix failed");
    attempt.failed(cause.to_string());
}

fn discovered(name: &str, candidate: &Candidate) -> FixAttempt {
    let mut attempt = FixAttempt::discovered(name, candidate.workspace(), &candidate.old_version);
    attempt.advisories.push(candidate.info.advisory_id().to_string());
    attempt
}
