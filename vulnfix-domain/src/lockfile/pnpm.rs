//! `pnpm-lock.yaml` (v5 through v9), read-only.
//!
//! pnpm has no hoisted `node_modules` tree. Each distinct `name@version`
//! becomes a store node, and every importer or package links the exact
//! store nodes it depends on.

use crate::error::LockfileError;
use crate::tree::{DependencyMaps, DependencyTree, NodeId};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLock {
    #[serde(default)]
    lockfile_version: Option<serde_yaml::Value>,
    #[serde(default)]
    importers: BTreeMap<String, Importer>,
    /// Single-project lockfiles before v6 keep the root importer inline.
    #[serde(flatten)]
    inline_root: Importer,
    #[serde(default)]
    packages: BTreeMap<String, RawPackage>,
    #[serde(default)]
    snapshots: BTreeMap<String, Snapshot>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Importer {
    #[serde(default)]
    dependencies: BTreeMap<String, ImporterDep>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, ImporterDep>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, ImporterDep>,
    #[serde(default)]
    specifiers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ImporterDep {
    Detailed { specifier: String, version: String },
    Bare(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPackage {
    #[serde(default)]
    resolution: Option<Resolution>,
    #[serde(default)]
    deprecated: Option<String>,
    #[serde(default)]
    dev: Option<bool>,
    #[serde(default)]
    optional: Option<bool>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    peer_dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct Resolution {
    #[serde(default)]
    integrity: Option<String>,
    #[serde(default)]
    tarball: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, String>,
}

fn strip_peer_suffix(version: &str) -> &str {
    version.split_once('(').map_or(version, |(v, _)| v)
}

/// `lodash@4.17.20`, `/lodash@4.17.20(x@1)`, `/@s/a/1.0.0` → (name, version).
fn split_key(key: &str) -> Option<(String, String)> {
    let key = strip_peer_suffix(key.strip_prefix('/').unwrap_or(key));
    let plain_name = |name: &str| {
        let slashes = name.matches('/').count();
        slashes == 0 || (name.starts_with('@') && slashes == 1)
    };
    let at_split = key
        .rfind('@')
        .filter(|i| *i > 0)
        .map(|i| (&key[..i], &key[i + 1..]))
        .filter(|(name, _)| plain_name(name));
    // v5 keys are `name/version` with an optional `_peer@x` suffix
    let (name, version) = match at_split {
        Some(split) => split,
        None => key.rsplit_once('/')?,
    };
    let version = version.split_once('_').map_or(version, |(v, _)| v);
    (!name.is_empty() && !version.is_empty()).then(|| (name.to_string(), version.to_string()))
}

/// Store key a dependency value refers to. Aliases (`npm:x@1`) and links are
/// left unresolved.
fn dep_key(name: &str, value: &str) -> Option<String> {
    if value.starts_with("link:") || value.starts_with("file:") {
        return None;
    }
    let value = strip_peer_suffix(value);
    if value.starts_with('/') || value.contains('@') && !value.starts_with('@') {
        return split_key(value).map(|(n, v)| format!("{n}@{v}"));
    }
    Some(format!("{name}@{value}"))
}

impl ImporterDep {
    fn specifier<'a>(&'a self, name: &str, specifiers: &'a BTreeMap<String, String>) -> &'a str {
        match self {
            ImporterDep::Detailed { specifier, .. } => specifier,
            ImporterDep::Bare(version) => specifiers.get(name).map_or(version, String::as_str),
        }
    }

    fn version(&self) -> &str {
        match self {
            ImporterDep::Detailed { version, .. } | ImporterDep::Bare(version) => version,
        }
    }
}

pub fn parse(text: &str) -> Result<DependencyTree, LockfileError> {
    let mut raw: RawLock = serde_yaml::from_str(text)?;

    let version = match &raw.lockfile_version {
        Some(serde_yaml::Value::String(s)) => s.clone(),
        Some(serde_yaml::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    let major: u32 = version
        .split('.')
        .next()
        .and_then(|m| m.parse().ok())
        .unwrap_or(0);
    if major < 5 {
        return Err(LockfileError::UnsupportedVersion(version));
    }

    let mut importers = std::mem::take(&mut raw.importers);
    if !importers.contains_key(".") {
        importers.insert(".".to_string(), std::mem::take(&mut raw.inline_root));
    }

    let mut tree = DependencyTree::new("", "");
    let mut store: BTreeMap<String, NodeId> = BTreeMap::new();

    for (key, package) in &raw.packages {
        let Some((name, version)) = split_key(key) else {
            debug!(%key, "skipping unparseable pnpm package key");
            continue;
        };
        let store_key = format!("{name}@{version}");
        if store.contains_key(&store_key) {
            continue;
        }
        let id = tree.add_unlinked(&format!("node_modules/.pnpm/{store_key}"), &name, &version);
        let node = tree.node_mut(id)?;
        node.integrity = package.resolution.as_ref().and_then(|r| r.integrity.clone());
        node.resolved = package.resolution.as_ref().and_then(|r| r.tarball.clone());
        node.deprecated = package.deprecated.clone();
        node.dev = package.dev.unwrap_or(false);
        node.optional = package.optional.unwrap_or(false);
        store.insert(store_key, id);
    }

    // v9 keeps the dependency lists in `snapshots`; earlier versions inline them.
    let mut dep_lists: BTreeMap<String, (BTreeMap<String, String>, BTreeMap<String, String>, BTreeMap<String, String>)> =
        BTreeMap::new();
    for (key, package) in &raw.packages {
        if let Some((name, version)) = split_key(key) {
            dep_lists.entry(format!("{name}@{version}")).or_insert_with(|| {
                (
                    package.dependencies.clone(),
                    package.optional_dependencies.clone(),
                    package.peer_dependencies.clone(),
                )
            });
        }
    }
    for (key, snapshot) in &raw.snapshots {
        if let Some((name, version)) = split_key(key) {
            let entry = dep_lists.entry(format!("{name}@{version}")).or_default();
            entry.0.extend(snapshot.dependencies.clone());
            entry.1.extend(snapshot.optional_dependencies.clone());
        }
    }

    for (store_key, (deps, optional, peers)) in dep_lists {
        let Some(&id) = store.get(&store_key) else {
            continue;
        };
        for (dep, value) in deps.iter().chain(optional.iter()) {
            if let Some(target) = dep_key(dep, value).and_then(|k| store.get(&k).copied()) {
                tree.link_child(id, dep, target);
            }
        }
        let strip = |m: BTreeMap<String, String>| -> BTreeMap<String, String> {
            m.into_iter()
                .map(|(k, v)| (k, strip_peer_suffix(&v).to_string()))
                .collect()
        };
        tree.node_mut(id)?.declared = DependencyMaps {
            dependencies: strip(deps),
            optional_dependencies: strip(optional),
            peer_dependencies: peers,
            dev_dependencies: BTreeMap::new(),
        };
    }

    for (path, importer) in &importers {
        let id = if path == "." {
            tree.root()
        } else {
            let name = path.rsplit('/').next().unwrap_or(path);
            tree.add_workspace(path, name, "")
        };

        let mut declared = DependencyMaps::default();
        let sections = [
            (&importer.dependencies, &mut declared.dependencies),
            (&importer.dev_dependencies, &mut declared.dev_dependencies),
            (&importer.optional_dependencies, &mut declared.optional_dependencies),
        ];
        for (section, out) in sections {
            for (dep, entry) in section {
                out.insert(dep.clone(), entry.specifier(dep, &importer.specifiers).to_string());
                if let Some(target) = dep_key(dep, entry.version()).and_then(|k| store.get(&k).copied()) {
                    tree.link_child(id, dep, target);
                }
            }
        }
        tree.node_mut(id)?.declared = declared;
    }

    tree.connect_all()?;
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats() {
        assert_eq!(split_key("lodash@4.17.20"), Some(("lodash".into(), "4.17.20".into())));
        assert_eq!(split_key("/lodash@4.17.20"), Some(("lodash".into(), "4.17.20".into())));
        assert_eq!(
            split_key("@babel/core@7.24.0(supports-color@9.0.0)"),
            Some(("@babel/core".into(), "7.24.0".into()))
        );
        assert_eq!(split_key("/@s/a/1.0.0"), Some(("@s/a".into(), "1.0.0".into())));
        assert_eq!(split_key("/react-dom/18.2.0_react@18.2.0"), Some(("react-dom".into(), "18.2.0".into())));
    }

    #[test]
    fn dependency_values() {
        assert_eq!(dep_key("a", "1.0.0").as_deref(), Some("a@1.0.0"));
        assert_eq!(dep_key("a", "1.0.0(b@2.0.0)").as_deref(), Some("a@1.0.0"));
        assert_eq!(dep_key("a", "link:../a"), None);
    }
}
