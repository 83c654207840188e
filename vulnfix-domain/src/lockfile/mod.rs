//! Lockfile detection and loading into a [`DependencyTree`].

pub mod npm;
pub mod pnpm;

use crate::error::LockfileError;
use crate::ports::ProjectView;
use crate::tree::DependencyTree;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const NPM_LOCKFILE: &str = "package-lock.json";
pub const PNPM_LOCKFILE: &str = "pnpm-lock.yaml";

/// Package manager owning the checkout, as told by its lockfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockfileKind {
    Npm,
    Pnpm,
}

impl LockfileKind {
    pub fn file_name(self) -> &'static str {
        match self {
            LockfileKind::Npm => NPM_LOCKFILE,
            LockfileKind::Pnpm => PNPM_LOCKFILE,
        }
    }

    /// Executable name of the package manager.
    pub fn agent(self) -> &'static str {
        match self {
            LockfileKind::Npm => "npm",
            LockfileKind::Pnpm => "pnpm",
        }
    }
}

pub fn detect(view: &dyn ProjectView) -> Result<LockfileKind, LockfileError> {
    match view.first_present(&[PNPM_LOCKFILE, NPM_LOCKFILE]) {
        Some(path) if path.as_str() == PNPM_LOCKFILE => Ok(LockfileKind::Pnpm),
        Some(_) => Ok(LockfileKind::Npm),
        None => Err(LockfileError::Missing(format!("{PNPM_LOCKFILE}, {NPM_LOCKFILE}"))),
    }
}

/// A lockfile together with the tree parsed from it.
#[derive(Debug, Clone)]
pub struct LoadedLockfile {
    pub kind: LockfileKind,
    pub path: Utf8PathBuf,
    pub raw: String,
    pub tree: DependencyTree,
}

impl LoadedLockfile {
    /// Lockfile text reflecting the tree's mutated nodes, or `None` when the
    /// format is left for the package manager to reconcile.
    pub fn render(&self) -> Result<Option<String>, LockfileError> {
        match self.kind {
            LockfileKind::Npm => npm::render(&self.raw, &self.tree).map(Some),
            LockfileKind::Pnpm => Ok(None),
        }
    }
}

pub fn load(view: &dyn ProjectView) -> Result<LoadedLockfile, LockfileError> {
    let kind = detect(view)?;
    let path = Utf8PathBuf::from(kind.file_name());
    let raw = view.read_to_string(&path)?;
    let tree = match kind {
        LockfileKind::Npm => npm::parse(&raw)?,
        LockfileKind::Pnpm => pnpm::parse(&raw)?,
    };
    info!(
        lockfile = %path,
        nodes = tree.len(),
        workspaces = tree.workspaces().len(),
        "loaded dependency tree"
    );
    Ok(LoadedLockfile {
        kind,
        path,
        raw,
        tree,
    })
}
