//! Naming and cleanup of the per-fix branches published in CI.

use crate::ports::GitPort;
use camino::Utf8Path;
use tracing::{debug, warn};

fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim_start_matches('@').chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// `{prefix}/{workspace}/{package}-{version}`; the root workspace is `root`.
pub fn branch_name(prefix: &str, workspace: &str, package: &str, version: &str) -> String {
    let workspace = match slug(workspace.trim_matches('/')) {
        ws if ws.is_empty() || ws == "." => "root".to_string(),
        ws => ws,
    };
    format!(
        "{}/{workspace}/{}-{}",
        prefix.trim_matches('/'),
        slug(package),
        slug(version)
    )
}

/// Removes a branch whose pull request was closed or merged.
///
/// The local branch is only removed once the remote one is gone.
pub fn cleanup_stale_branch(git: &dyn GitPort, repo_root: &Utf8Path, branch: &str) -> bool {
    if let Err(err) = git.delete_remote_branch(repo_root, branch) {
        warn!(branch, error = %format!("{err:#}"), "could not delete stale remote branch");
        return false;
    }
    match git.delete_local_branch(repo_root, branch) {
        Ok(()) => true,
        Err(err) => {
            debug!(branch, error = %format!("{err:#}"), "no local branch to delete");
            false
        }
    }
}

/// Removes both sides of a branch whose pull request could not be opened.
pub fn cleanup_failed_pr_branches(git: &dyn GitPort, repo_root: &Utf8Path, branch: &str) -> bool {
    let remote = git.delete_remote_branch(repo_root, branch);
    let local = git.delete_local_branch(repo_root, branch);
    if let Err(err) = &remote {
        warn!(branch, error = %format!("{err:#}"), "could not delete remote branch");
    }
    if let Err(err) = &local {
        warn!(branch, error = %format!("{err:#}"), "could not delete local branch");
    }
    remote.is_ok() && local.is_ok()
}

/// Drops the local copy once its pull request is open; the remote stays.
pub fn cleanup_successful_pr_local_branch(git: &dyn GitPort, repo_root: &Utf8Path, branch: &str) -> bool {
    match git.delete_local_branch(repo_root, branch) {
        Ok(()) => true,
        Err(err) => {
            warn!(branch, error = %format!("{err:#}"), "could not delete local branch");
            false
        }
    }
}

/// Cleanup after a failure part-way through publishing.
///
/// The remote branch is only touched when this run pushed it.
pub fn cleanup_error_branches(
    git: &dyn GitPort,
    repo_root: &Utf8Path,
    branch: &str,
    remote_existed: bool,
) -> bool {
    let remote_ok = if remote_existed {
        git.delete_remote_branch(repo_root, branch)
            .inspect_err(|err| warn!(branch, error = %format!("{err:#}"), "could not delete remote branch"))
            .is_ok()
    } else {
        true
    };
    let local_ok = git
        .delete_local_branch(repo_root, branch)
        .inspect_err(|err| warn!(branch, error = %format!("{err:#}"), "could not delete local branch"))
        .is_ok();
    remote_ok && local_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(
            branch_name("vulnfix", ".", "lodash", "4.17.21"),
            "vulnfix/root/lodash-4.17.21"
        );
        assert_eq!(
            branch_name("vulnfix/", "packages/web", "@babel/core", "7.24.1"),
            "vulnfix/packages-web/babel-core-7.24.1"
        );
        assert_eq!(
            branch_name("bot", "", "Foo_Bar", "1.0.0-rc.1"),
            "bot/root/foo_bar-1.0.0-rc.1"
        );
    }
}
