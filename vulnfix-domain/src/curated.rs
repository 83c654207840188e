//! Curated replacement catalog: known-good substitutes for specific packages.

use anyhow::Context;
use camino::Utf8Path;
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuratedManifest {
    /// Package being replaced.
    pub package: String,

    /// Version of the curated replacement; its major anchors patch selection.
    pub version: String,

    /// Drop-in replacements are installed by a separate flow, so the fixer
    /// leaves these packages alone.
    #[serde(default)]
    pub drop_in: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CuratedCatalog {
    entries: BTreeMap<String, CuratedManifest>,
}

impl CuratedCatalog {
    pub fn new(entries: impl IntoIterator<Item = CuratedManifest>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|m| (m.package.clone(), m))
                .collect(),
        }
    }

    /// Loads a JSON array of manifests.
    pub fn load(path: &Utf8Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read {path}"))?;
        let entries: Vec<CuratedManifest> =
            serde_json::from_str(&raw).with_context(|| format!("parse curated catalog {path}"))?;
        Ok(Self::new(entries))
    }

    /// Exact-name lookup.
    pub fn get(&self, package: &str) -> Option<&CuratedManifest> {
        self.entries.get(package)
    }

    pub fn is_drop_in(&self, package: &str) -> bool {
        self.get(package).is_some_and(|m| m.drop_in)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
