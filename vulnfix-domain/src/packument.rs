//! Registry packument: the full metadata document for one package name.

use crate::range::parse_version;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Packument {
    pub name: String,

    #[serde(default, rename = "dist-tags")]
    pub dist_tags: BTreeMap<String, String>,

    #[serde(default)]
    pub versions: BTreeMap<String, VersionMetadata>,
}

impl Packument {
    /// Every published version that parses as semver.
    pub fn available_versions(&self) -> Vec<Version> {
        let mut out: Vec<Version> = self
            .versions
            .keys()
            .filter_map(|v| parse_version(v))
            .collect();
        out.sort();
        out
    }

    pub fn metadata(&self, version: &Version) -> Option<&VersionMetadata> {
        self.versions
            .get(&version.to_string())
            .or_else(|| self.versions.values().find(|m| parse_version(&m.version).as_ref() == Some(version)))
    }
}

/// Manifest of one published version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMetadata {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default)]
    pub optional_dependencies: BTreeMap<String, String>,

    #[serde(default)]
    pub peer_dependencies: BTreeMap<String, String>,

    #[serde(default)]
    pub dist: Dist,

    /// Registries send a message string; some mirrors send `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<serde_json::Value>,
}

impl VersionMetadata {
    pub fn deprecation(&self) -> Option<String> {
        match &self.deprecated {
            Some(serde_json::Value::String(msg)) if !msg.is_empty() => Some(msg.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dist {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
}

/// Tarball URL npm would record for `name@version` under `registry`.
pub fn tarball_url(registry: &str, name: &str, version: &str) -> String {
    let base = registry.trim_end_matches('/');
    let basename = name.rsplit('/').next().unwrap_or(name);
    format!("{base}/{name}/-/{basename}-{version}.tgz")
}
