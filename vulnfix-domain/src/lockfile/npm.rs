//! `package-lock.json` v2/v3: the flat `packages` map keyed by install location.

use crate::error::LockfileError;
use crate::json_text::JsonLayout;
use crate::tree::{DependencyMaps, DependencyTree, NodeId};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

const NODE_MODULES: &str = "node_modules/";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLock {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    lockfile_version: Option<Value>,
    #[serde(default)]
    packages: Option<BTreeMap<String, RawEntry>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    resolved: Option<String>,
    #[serde(default)]
    integrity: Option<String>,
    #[serde(default)]
    deprecated: Option<String>,
    #[serde(default)]
    link: bool,
    #[serde(default)]
    dev: bool,
    #[serde(default)]
    optional: bool,
    #[serde(flatten)]
    declared: DependencyMaps,
}

/// Splits a location into (parent location, package name).
///
/// `node_modules/a/node_modules/@s/b` → (`node_modules/a`, `@s/b`);
/// `packages/web` → `None` (not an installed package).
fn split_location(location: &str) -> Option<(&str, &str)> {
    let idx = location.rfind(NODE_MODULES)?;
    let parent = location[..idx].trim_end_matches('/');
    Some((parent, &location[idx + NODE_MODULES.len()..]))
}

fn depth(location: &str) -> usize {
    location.matches(NODE_MODULES).count()
}

pub fn parse(text: &str) -> Result<DependencyTree, LockfileError> {
    let raw: RawLock = serde_json::from_str(text)?;
    let version = match &raw.lockfile_version {
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
        None => "1".to_string(),
    };
    if !matches!(version.as_str(), "2" | "3") {
        return Err(LockfileError::UnsupportedVersion(version));
    }
    let mut packages = raw
        .packages
        .ok_or_else(|| LockfileError::UnsupportedVersion(version.clone()))?;

    let root_entry = packages.remove("").unwrap_or_default();
    let root_name = root_entry.name.clone().or(raw.name).unwrap_or_default();
    let root_version = root_entry.version.clone().or(raw.version).unwrap_or_default();

    let mut tree = DependencyTree::new(&root_name, &root_version);
    let root = tree.root();
    apply_entry(&mut tree, root, root_entry)?;

    let mut ordered: Vec<(String, RawEntry)> = packages.into_iter().collect();
    ordered.sort_by(|(a, _), (b, _)| depth(a).cmp(&depth(b)).then_with(|| a.cmp(b)));

    let mut links: Vec<(String, String)> = Vec::new();
    for (location, entry) in ordered {
        if entry.link {
            if let Some(target) = entry.resolved.clone() {
                links.push((location, target));
            }
            continue;
        }

        let id = match split_location(&location) {
            Some((parent_loc, name)) => {
                let parent = tree.by_location(parent_loc).ok_or_else(|| LockfileError::InvalidEntry {
                    location: location.clone(),
                    reason: format!("parent `{parent_loc}` is not in the lockfile"),
                })?;
                let name = entry.name.clone().unwrap_or_else(|| name.to_string());
                tree.add_package(parent, &location, &name, entry.version.as_deref().unwrap_or_default())
            }
            None => {
                let name = entry
                    .name
                    .clone()
                    .unwrap_or_else(|| location.rsplit('/').next().unwrap_or(&location).to_string());
                tree.add_workspace(&location, &name, entry.version.as_deref().unwrap_or_default())
            }
        };
        apply_entry(&mut tree, id, entry)?;
    }

    for (location, target) in links {
        let (Some((parent_loc, name)), Some(target_id)) =
            (split_location(&location), tree.by_location(&target))
        else {
            debug!(%location, %target, "skipping link to unknown location");
            continue;
        };
        if let Some(parent) = tree.by_location(parent_loc) {
            tree.link_child(parent, name, target_id);
        }
    }

    tree.connect_all()?;
    Ok(tree)
}

fn apply_entry(tree: &mut DependencyTree, id: NodeId, entry: RawEntry) -> Result<(), LockfileError> {
    let node = tree.node_mut(id)?;
    node.resolved = entry.resolved;
    node.integrity = entry.integrity;
    node.deprecated = entry.deprecated;
    node.dev = entry.dev;
    node.optional = entry.optional;
    node.declared = entry.declared;
    Ok(())
}

fn set_or_remove(entry: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    match value {
        Some(v) => {
            entry.insert(key.to_string(), Value::String(v.to_string()));
        }
        None => {
            entry.remove(key);
        }
    }
}

fn set_map(entry: &mut Map<String, Value>, key: &str, map: &BTreeMap<String, String>) {
    if map.is_empty() {
        entry.remove(key);
        return;
    }
    let obj: Map<String, Value> = map
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    entry.insert(key.to_string(), Value::Object(obj));
}

/// Rewrites the `packages` entries of every dirty node, keeping the rest
/// of the document and its layout untouched.
pub fn render(text: &str, tree: &DependencyTree) -> Result<String, LockfileError> {
    let layout = JsonLayout::detect(text);
    let mut doc: Value = serde_json::from_str(text)?;
    let packages = doc
        .get_mut("packages")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| LockfileError::InvalidEntry {
            location: "packages".to_string(),
            reason: "missing packages map".to_string(),
        })?;

    for id in tree.dirty() {
        let node = tree.node(*id);
        let Some(entry) = packages.get_mut(&node.location).and_then(Value::as_object_mut) else {
            return Err(LockfileError::InvalidEntry {
                location: node.location.clone(),
                reason: "mutated node has no lockfile entry".to_string(),
            });
        };
        set_or_remove(entry, "version", Some(node.version()));
        set_or_remove(entry, "resolved", node.resolved.as_deref());
        set_or_remove(entry, "integrity", node.integrity.as_deref());
        set_or_remove(entry, "deprecated", node.deprecated.as_deref());
        set_map(entry, "dependencies", &node.declared.dependencies);
        set_map(entry, "optionalDependencies", &node.declared.optional_dependencies);
        set_map(entry, "peerDependencies", &node.declared.peer_dependencies);
    }

    Ok(layout.render(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_split() {
        assert_eq!(split_location("node_modules/a"), Some(("", "a")));
        assert_eq!(
            split_location("node_modules/a/node_modules/@s/b"),
            Some(("node_modules/a", "@s/b"))
        );
        assert_eq!(
            split_location("packages/web/node_modules/x"),
            Some(("packages/web", "x"))
        );
        assert_eq!(split_location("packages/web"), None);
    }

    #[test]
    fn v1_lockfiles_are_rejected() {
        let err = parse(r#"{"name":"a","lockfileVersion":1,"dependencies":{}}"#).unwrap_err();
        assert!(matches!(err, LockfileError::UnsupportedVersion(v) if v == "1"));
    }
}
