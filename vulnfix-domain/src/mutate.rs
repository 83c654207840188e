//! In-place update of one resolved node to a new version.

use crate::error::TreeError;
use crate::packument::{VersionMetadata, tarball_url};
use crate::tree::{DependencyMaps, DependencyTree, EdgeKind, NodeId};
use semver::Version;
use std::collections::BTreeMap;
use tracing::debug;

/// Points `id` at `target`, taking resolution and dependency data from
/// `metadata`. Returns whether anything changed; a second identical call
/// returns `false`.
pub fn update_node(
    tree: &mut DependencyTree,
    id: NodeId,
    target: &Version,
    metadata: &VersionMetadata,
    registry: &str,
) -> Result<bool, TreeError> {
    let version = target.to_string();
    let name = tree.get(id)?.name.clone();
    let resolved = Some(tarball_url(registry, &name, &version));
    let integrity = metadata.dist.integrity.clone();
    let deprecated = metadata.deprecation();
    let declared = DependencyMaps {
        dependencies: metadata.dependencies.clone(),
        optional_dependencies: metadata.optional_dependencies.clone(),
        peer_dependencies: metadata.peer_dependencies.clone(),
        dev_dependencies: Default::default(),
    };

    let node = tree.node_mut(id)?;
    let mut changed = false;

    if node.version() != version {
        node.override_version(&version);
        changed = true;
    }
    if node.resolved != resolved {
        node.resolved = resolved;
        changed = true;
    }
    if node.integrity != integrity {
        node.integrity = integrity;
        changed = true;
    }
    if node.deprecated != deprecated {
        node.deprecated = deprecated;
        changed = true;
    }

    let before: BTreeMap<String, (String, EdgeKind)> = node
        .edges_out()
        .values()
        .map(|e| (e.name.clone(), (e.spec.clone(), e.kind)))
        .collect();
    if node.declared != declared {
        node.declared = declared;
        changed = true;
    }

    let wanted: Vec<(String, String)> = tree
        .node(id)
        .declared
        .edges()
        .into_iter()
        .map(|(n, (spec, _))| (n.to_string(), spec.to_string()))
        .collect();

    for dep in before.keys() {
        if !wanted.iter().any(|(n, _)| n == dep) {
            debug!(package = %name, dependency = %dep, "detaching dropped dependency");
            tree.detach(id, dep)?;
            changed = true;
        }
    }
    // Surviving edges keep their kind; introduced names start as prod.
    for (dep, spec) in &wanted {
        let kind = match before.get(dep) {
            Some((old_spec, kind)) => {
                if old_spec != spec {
                    changed = true;
                }
                *kind
            }
            None => {
                debug!(package = %name, dependency = %dep, "adding new dependency edge");
                changed = true;
                EdgeKind::Prod
            }
        };
        tree.connect(id, dep, spec, kind)?;
    }

    if changed {
        tree.mark_dirty(id);
    }
    Ok(changed)
}
