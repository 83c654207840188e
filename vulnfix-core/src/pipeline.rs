//! Scan and fix pipelines, extracted from the CLI.
//!
//! All effects go through port traits; callers supply adapters.

use crate::error::FixError;
use crate::orchestrator::{Orchestrator, Ports};
use crate::ports::ArtifactSink;
use crate::settings::{FixSettings, ScanSettings};
use anyhow::Context;
use camino::Utf8Path;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;
use vulnfix_domain::lockfile::{self, LoadedLockfile};
use vulnfix_domain::ports::ProjectDir;
use vulnfix_domain::{CuratedCatalog, DependencyTree};
use vulnfix_edit::{EditableManifest, MANIFEST_FILE};
use vulnfix_policy::{PolicyResolver, VulnInfo, plan_alerts};
use vulnfix_render::render_run_md;
use vulnfix_scan::{AlertSource, collect_alerts, scan};
use vulnfix_types::alert::ArtifactRecord;
use vulnfix_types::purl::Purl;
use vulnfix_types::report::{RunReport, ToolInfo};

/// Error type for pipeline results. Exit code 2 = unfixed vulnerabilities
/// under `--fail-on-unfixed`, 1 = tool error.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("policy block")]
    PolicyBlock,
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

/// Every installed package in the tree as an npm purl, deduplicated.
pub fn tree_purls(tree: &DependencyTree) -> Vec<String> {
    let purls: BTreeSet<String> = tree
        .ids()
        .map(|id| tree.node(id))
        .filter(|node| !node.is_project() && !node.version().is_empty())
        .map(|node| Purl::npm(&node.name, node.version()).to_string())
        .collect();
    purls.into_iter().collect()
}

/// Override entries already present in the root manifest.
fn overridden_packages(repo_root: &Utf8Path) -> anyhow::Result<BTreeSet<String>> {
    let path = repo_root.join(MANIFEST_FILE);
    if !path.is_file() {
        return Ok(BTreeSet::new());
    }
    let manifest = EditableManifest::load(&path).with_context(|| format!("load {path}"))?;
    Ok(manifest.override_names())
}

/// Outcome of `run_scan`.
pub struct ScanOutcome {
    pub lockfile: LoadedLockfile,
    pub records: BTreeMap<String, ArtifactRecord>,
    pub fix_map: BTreeMap<String, Vec<VulnInfo>>,

    /// Surfaced alerts with no usable fix, per package.
    pub informational: BTreeMap<String, Vec<VulnInfo>>,
}

impl ScanOutcome {
    pub fn informational_count(&self) -> usize {
        self.informational.values().map(Vec::len).sum()
    }
}

/// Loads the lockfile, scans its packages and reduces the alerts to
/// per-package fix work.
pub async fn run_scan(
    repo_root: &Utf8Path,
    settings: &ScanSettings,
    source: Arc<dyn AlertSource>,
    policy: &PolicyResolver,
    cancel: &CancellationToken,
) -> Result<ScanOutcome, ToolError> {
    settings.validate()?;
    let view = ProjectDir::new(repo_root);
    let lockfile = lockfile::load(&view).context("load lockfile")?;

    let purls = if settings.purls.is_empty() {
        tree_purls(&lockfile.tree)
    } else {
        settings.purls.clone()
    };
    debug!(purls = purls.len(), "scanning");

    let records = collect_alerts(scan(source, purls, settings.options(), cancel))
        .await
        .map_err(|err| FixError::ScannerTransport {
            cause: err.to_string(),
        })
        .context("scan dependencies")?;

    let overridden = overridden_packages(repo_root)?;
    let plan = plan_alerts(records.values(), policy, &overridden);
    let outcome = ScanOutcome {
        lockfile,
        records,
        fix_map: plan.fixable,
        informational: plan.informational,
    };
    info!(
        artifacts = outcome.records.len(),
        fixable_packages = outcome.fix_map.len(),
        informational = outcome.informational_count(),
        "scan complete"
    );
    Ok(outcome)
}

/// Outcome of `run_fix`.
pub struct FixOutcome {
    pub report: RunReport,
    pub markdown: String,

    /// At least one candidate ended `Failed`.
    pub has_unfixed: bool,
}

/// Runs the whole fix flow: scan, prune stale branches (CI), fix each
/// candidate, summarize.
pub async fn run_fix(
    settings: &FixSettings,
    source: Arc<dyn AlertSource>,
    policy: &PolicyResolver,
    ports: Ports<'_>,
    catalog: &CuratedCatalog,
    tool: ToolInfo,
    cancel: &CancellationToken,
) -> Result<FixOutcome, ToolError> {
    settings.validate()?;

    let mut report = RunReport::new(tool);
    report.run.started_at = Some(Utc::now());
    report.run.run_id = Some(Uuid::new_v4().to_string());
    report.ci = settings.ci.is_some();

    let scanned = run_scan(&settings.repo_root, &settings.scan, source, policy, cancel).await?;
    report.summary.scanned = scanned.records.len() as u64;
    report.summary.fixable_packages = scanned.fix_map.len() as u64;
    report.summary.informational = scanned.informational_count() as u64;

    let mut orchestrator = Orchestrator::new(settings, ports, catalog, scanned.lockfile);
    orchestrator.prune_stale_branches(&mut report).await;
    orchestrator.fix_all(&scanned.fix_map, &mut report).await;

    report.run.ended_at = Some(Utc::now());
    info!(
        fixed = report.summary.fixed,
        failed = report.summary.failed,
        skipped = report.summary.skipped,
        "fix run complete"
    );

    let markdown = render_run_md(&report);
    let has_unfixed = report.has_failures();
    Ok(FixOutcome {
        report,
        markdown,
        has_unfixed,
    })
}

/// Writes `report.json` and `report.md`.
pub fn write_fix_artifacts(outcome: &FixOutcome, sink: &dyn ArtifactSink) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&outcome.report).context("serialize report")?;
    sink.write_artifact("report.json", json.as_bytes())?;
    sink.write_artifact("report.md", outcome.markdown.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purls_skip_projects_and_dedupe() {
        let mut tree = DependencyTree::new("app", "1.0.0");
        let root = tree.root();
        let ws = tree.add_workspace("packages/web", "web", "0.1.0");
        tree.add_package(root, "node_modules/lodash", "lodash", "4.17.20");
        tree.add_package(ws, "packages/web/node_modules/lodash", "lodash", "4.17.20");
        tree.add_package(root, "node_modules/@babel/core", "@babel/core", "7.24.0");

        assert_eq!(
            tree_purls(&tree),
            vec![
                "pkg:npm/%40babel/core@7.24.0".to_string(),
                "pkg:npm/lodash@4.17.20".to_string(),
            ]
        );
    }
}
