//! Rendering helpers (markdown) for pull requests, commits and run reports.

use vulnfix_types::attempt::{FixAttempt, FixStatus, SkipReason};
use vulnfix_types::report::RunReport;

fn workspace_label(workspace: &str) -> &str {
    if workspace == "." || workspace.is_empty() {
        "root"
    } else {
        workspace
    }
}

fn target(attempt: &FixAttempt) -> &str {
    attempt.target_version.as_deref().unwrap_or("?")
}

fn advisory_link(id: &str) -> String {
    if id.starts_with("GHSA-") {
        format!("[{id}](https://github.com/advisories/{id})")
    } else if id.starts_with("CVE-") {
        format!("[{id}](https://nvd.nist.gov/vuln/detail/{id})")
    } else {
        format!("`{id}`")
    }
}

pub fn render_pr_title(attempt: &FixAttempt) -> String {
    let mut title = format!(
        "Fix {}: bump {} from {} to {}",
        attempt.advisories.first().map_or("vulnerability", String::as_str),
        attempt.package,
        attempt.old_version,
        target(attempt)
    );
    if workspace_label(&attempt.workspace) != "root" {
        title.push_str(&format!(" in {}", attempt.workspace));
    }
    title
}

pub fn render_commit_message(attempt: &FixAttempt) -> String {
    let mut out = format!(
        "fix(deps): bump {} from {} to {}\n",
        attempt.package,
        attempt.old_version,
        target(attempt)
    );
    if !attempt.advisories.is_empty() {
        out.push('\n');
        out.push_str(&format!("Resolves {}.\n", attempt.advisories.join(", ")));
    }
    out
}

pub fn render_pr_body(attempt: &FixAttempt) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Bumps `{}` from `{}` to `{}` in the `{}` workspace.\n\n",
        attempt.package,
        attempt.old_version,
        target(attempt),
        workspace_label(&attempt.workspace)
    ));

    if !attempt.advisories.is_empty() {
        out.push_str("## Advisories\n\n");
        for id in &attempt.advisories {
            out.push_str(&format!("- {}\n", advisory_link(id)));
        }
        out.push('\n');
    }

    if let (Some(old), Some(new)) = (&attempt.old_spec, &attempt.new_spec) {
        out.push_str(&format!("Declared range: `{old}` → `{new}`\n\n"));
    }

    if let Some(diff) = attempt.manifest_diff.as_deref().filter(|d| !d.is_empty()) {
        out.push_str("<details>\n<summary>Manifest diff</summary>\n\n```diff\n");
        out.push_str(diff);
        if !diff.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("```\n\n</details>\n\n");
    }

    out.push_str("_Opened by vulnfix. Dependencies were reinstalled");
    out.push_str(if attempt.reached(vulnfix_types::attempt::FixStage::Tested) {
        " and the test script passed._\n"
    } else {
        "._\n"
    });
    out
}

fn status_label(attempt: &FixAttempt) -> String {
    match (attempt.status, attempt.skip_reason) {
        (FixStatus::Fixed, _) => "fixed".to_string(),
        (FixStatus::Failed, _) => "failed".to_string(),
        (FixStatus::Skipped, Some(reason)) => format!("skipped ({})", skip_label(reason)),
        (FixStatus::Skipped, None) => "skipped".to_string(),
    }
}

fn skip_label(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::CuratedReplacement => "curated replacement",
        SkipReason::AlreadyApplied => "already applied",
        SkipReason::ManifestUnchanged => "manifest unchanged",
        SkipReason::LimitReached => "limit reached",
    }
}

pub fn render_run_md(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str("# vulnfix run\n\n");
    out.push_str(&format!("- Artifacts scanned: {}\n", report.summary.scanned));
    out.push_str(&format!(
        "- Packages with fixable alerts: {}\n",
        report.summary.fixable_packages
    ));
    if report.summary.informational > 0 {
        out.push_str(&format!(
            "- Alerts without a fix: {}\n",
            report.summary.informational
        ));
    }
    out.push_str(&format!(
        "- Fixed: {} / Failed: {} / Skipped: {}\n",
        report.summary.fixed, report.summary.failed, report.summary.skipped
    ));
    if report.ci {
        out.push_str("- Mode: CI (branches and pull requests)\n");
    }
    out.push('\n');

    out.push_str("## Attempts\n\n");
    if report.attempts.is_empty() {
        out.push_str("_Nothing to fix._\n");
    } else {
        out.push_str("| Package | Workspace | From | To | Status | Notes |\n");
        out.push_str("|---|---|---|---|---|---|\n");
        for a in &report.attempts {
            let notes = a
                .cause
                .clone()
                .or_else(|| a.branch.as_ref().map(|b| format!("branch `{}`", b.name)))
                .unwrap_or_default()
                .replace('|', "\\|")
                .replace('\n', " ");
            out.push_str(&format!(
                "| `{}` | {} | {} | {} | {} | {} |\n",
                a.package,
                workspace_label(&a.workspace),
                a.old_version,
                a.target_version.as_deref().unwrap_or("-"),
                status_label(a),
                notes
            ));
        }
    }

    if !report.pruned_branches.is_empty() {
        out.push_str("\n## Pruned branches\n\n");
        for b in &report.pruned_branches {
            out.push_str(&format!("- `{}`\n", b.name));
        }
    }

    if !report.errors.is_empty() {
        out.push_str("\n## Errors\n\n");
        for e in &report.errors {
            out.push_str(&format!("- {e}\n"));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vulnfix_types::attempt::FixStage;
    use vulnfix_types::report::ToolInfo;

    fn fixed_attempt() -> FixAttempt {
        let mut a = FixAttempt::discovered("lodash", ".", "4.17.20");
        a.target_version = Some("4.17.21".into());
        a.old_spec = Some("^4.17.20".into());
        a.new_spec = Some("^4.17.21".into());
        a.advisories = vec!["GHSA-35jh-r3h4-6jhm".into()];
        a.manifest_diff = Some("-a\n+b\n".into());
        a.enter(FixStage::PatchSelected);
        a.enter(FixStage::Installing);
        a.fixed();
        a
    }

    #[test]
    fn pr_title_and_commit() {
        let a = fixed_attempt();
        assert_eq!(
            render_pr_title(&a),
            "Fix GHSA-35jh-r3h4-6jhm: bump lodash from 4.17.20 to 4.17.21"
        );
        assert_eq!(
            render_commit_message(&a),
            "fix(deps): bump lodash from 4.17.20 to 4.17.21\n\nResolves GHSA-35jh-r3h4-6jhm.\n"
        );
    }

    #[test]
    fn pr_body_links_advisories_and_embeds_diff() {
        let body = render_pr_body(&fixed_attempt());
        assert!(body.contains("https://github.com/advisories/GHSA-35jh-r3h4-6jhm"));
        assert!(body.contains("```diff\n-a\n+b\n```"));
        assert!(body.contains("`^4.17.20` → `^4.17.21`"));
        assert!(body.ends_with("Dependencies were reinstalled._\n"));
    }

    #[test]
    fn run_summary_lists_attempts() {
        let mut report = RunReport::new(ToolInfo {
            name: "vulnfix".into(),
            version: None,
            repo: None,
            commit: None,
        });
        report.push(fixed_attempt());
        let mut failed = FixAttempt::discovered("qs", "packages/api", "6.5.0");
        failed.failed("npm install exited with 1 | see log");
        report.push(failed);

        let md = render_run_md(&report);
        assert!(md.contains("- Fixed: 1 / Failed: 1 / Skipped: 0"));
        assert!(md.contains("| `qs` | packages/api | 6.5.0 | - | failed | npm install exited with 1 \\| see log |"));
        assert!(md.contains("| `lodash` | root | 4.17.20 | 4.17.21 | fixed |"));
    }

    #[test]
    fn run_summary_counts_alerts_without_a_fix() {
        let mut report = RunReport::new(ToolInfo {
            name: "vulnfix".into(),
            version: None,
            repo: None,
            commit: None,
        });
        assert!(!render_run_md(&report).contains("without a fix"));
        report.summary.informational = 3;
        assert!(render_run_md(&report).contains("- Alerts without a fix: 3\n"));
    }

    #[test]
    fn empty_run() {
        let report = RunReport::new(ToolInfo {
            name: "vulnfix".into(),
            version: None,
            repo: None,
            commit: None,
        });
        assert!(render_run_md(&report).contains("_Nothing to fix._"));
    }
}
