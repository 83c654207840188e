//! Rewriting a workspace manifest's declared range for one dependency.

use crate::manifest::{DEPENDENCY_SECTIONS, EditableManifest};
use crate::range_style::{RangeStyle, apply_range};
use semver::Version;
use tracing::debug;
use vulnfix_domain::range::NpmRange;
use vulnfix_domain::tree::{DependencyTree, NodeId};

/// Updates `node`'s declared range in `manifest` to target `version`.
///
/// Only acts when `node` is the instance `workspace` itself resolves
/// (see [`DependencyTree::is_top_level`]); transitive copies of the same
/// package name are left alone. Non-semver specs (`workspace:`, git urls,
/// tags) are skipped. Returns whether any section changed.
pub fn rewrite(
    manifest: &mut EditableManifest,
    tree: &DependencyTree,
    workspace: NodeId,
    node: NodeId,
    version: &Version,
    style: RangeStyle,
) -> bool {
    if !tree.is_top_level(workspace, node) {
        return false;
    }
    let name = tree.node(node).name.clone();
    let version = version.to_string();
    let mut changed = false;

    for section in DEPENDENCY_SECTIONS {
        let Some(old) = manifest.dependency(section, &name).map(str::to_string) else {
            continue;
        };
        if NpmRange::parse(&old).is_err() {
            debug!(package = %name, section, spec = %old, "leaving non-semver spec alone");
            continue;
        }
        let new = apply_range(&old, &version, style);
        if new != old && manifest.set_dependency(section, &name, &new) {
            debug!(package = %name, section, from = %old, to = %new, "rewrote range");
            changed = true;
        }
    }
    changed
}
