use anyhow::bail;
use camino::{Utf8Path, Utf8PathBuf};
use proptest::prelude::*;
use std::sync::Mutex;
use vulnfix_core::branches::{
    branch_name, cleanup_error_branches, cleanup_failed_pr_branches, cleanup_stale_branch,
    cleanup_successful_pr_local_branch,
};
use vulnfix_core::ports::GitPort;

/// Records deletions; each side can be made to fail.
#[derive(Default)]
struct ScriptedGit {
    fail_remote: bool,
    fail_local: bool,
    deleted: Mutex<Vec<&'static str>>,
}

impl ScriptedGit {
    fn new(fail_remote: bool, fail_local: bool) -> Self {
        Self {
            fail_remote,
            fail_local,
            ..Self::default()
        }
    }

    fn deleted(&self) -> Vec<&'static str> {
        self.deleted.lock().unwrap().clone()
    }
}

impl GitPort for ScriptedGit {
    fn is_repo(&self, _: &Utf8Path) -> bool {
        true
    }
    fn current_branch(&self, _: &Utf8Path) -> anyhow::Result<String> {
        Ok("main".into())
    }
    fn changed_files(&self, _: &Utf8Path) -> anyhow::Result<Vec<Utf8PathBuf>> {
        Ok(vec![])
    }
    fn create_branch(&self, _: &Utf8Path, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
    fn commit(&self, _: &Utf8Path, _: &str, _: &[Utf8PathBuf]) -> anyhow::Result<()> {
        Ok(())
    }
    fn push(&self, _: &Utf8Path, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
    fn remote_branch_exists(&self, _: &Utf8Path, _: &str) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn delete_remote_branch(&self, _: &Utf8Path, _: &str) -> anyhow::Result<()> {
        if self.fail_remote {
            bail!("remote rejected");
        }
        self.deleted.lock().unwrap().push("remote");
        Ok(())
    }

    fn delete_local_branch(&self, _: &Utf8Path, _: &str) -> anyhow::Result<()> {
        if self.fail_local {
            bail!("branch not found");
        }
        self.deleted.lock().unwrap().push("local");
        Ok(())
    }

    fn reset_hard(&self, _: &Utf8Path, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
    fn clean(&self, _: &Utf8Path) -> anyhow::Result<()> {
        Ok(())
    }
    fn checkout(&self, _: &Utf8Path, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

const ROOT: &str = "/repo";
const BRANCH: &str = "vulnfix/root/lodash-4.17.21";

#[test]
fn stale_local_branch_survives_remote_failure() {
    let git = ScriptedGit::new(true, false);
    assert!(!cleanup_stale_branch(&git, Utf8Path::new(ROOT), BRANCH));
    assert!(git.deleted().is_empty());
}

#[test]
fn failed_pr_cleanup_tries_both_sides() {
    let git = ScriptedGit::new(true, false);
    assert!(!cleanup_failed_pr_branches(&git, Utf8Path::new(ROOT), BRANCH));
    assert_eq!(git.deleted(), vec!["local"]);
}

proptest! {
    #[test]
    fn cleanup_outcomes(fail_remote in any::<bool>(), fail_local in any::<bool>(), remote_existed in any::<bool>()) {
        let root = Utf8Path::new(ROOT);

        let git = ScriptedGit::new(fail_remote, fail_local);
        let ok = cleanup_stale_branch(&git, root, BRANCH);
        prop_assert_eq!(ok, !fail_remote && !fail_local);
        if fail_remote {
            prop_assert!(!git.deleted().contains(&"local"));
        }

        let git = ScriptedGit::new(fail_remote, fail_local);
        cleanup_successful_pr_local_branch(&git, root, BRANCH);
        prop_assert!(!git.deleted().contains(&"remote"));

        let git = ScriptedGit::new(fail_remote, fail_local);
        let ok = cleanup_error_branches(&git, root, BRANCH, remote_existed);
        if !remote_existed {
            prop_assert!(!git.deleted().contains(&"remote"));
            prop_assert_eq!(ok, !fail_local);
        } else {
            prop_assert_eq!(ok, !fail_remote && !fail_local);
        }
    }

    #[test]
    fn branch_names_are_ref_safe(
        workspace in "[a-zA-Z0-9/_.@-]{0,24}",
        package in "(@[a-z0-9-]{1,8}/)?[a-z0-9._-]{1,16}",
        version in "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
    ) {
        let name = branch_name("vulnfix", &workspace, &package, &version);
        prop_assert!(name.starts_with("vulnfix/"));
        prop_assert!(!name.contains("//"));
        prop_assert!(!name.contains('@'));
        prop_assert!(!name.contains(' '));
        prop_assert!(name.ends_with(&version));
    }
}
