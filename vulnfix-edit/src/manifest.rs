//! `package.json` that can be edited and written back in its own layout.

use crate::error::{EditError, EditResult};
use crate::snapshot::{FileSnapshot, file_diff};
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::debug;
use vulnfix_domain::json_text::JsonLayout;

pub const MANIFEST_FILE: &str = "package.json";

/// Sections a top-level dependency range may be declared in.
pub const DEPENDENCY_SECTIONS: [&str; 3] = ["dependencies", "optionalDependencies", "peerDependencies"];

#[derive(Debug, Clone)]
pub struct EditableManifest {
    path: Utf8PathBuf,
    /// Text as last read from or written to disk.
    on_disk: String,
    doc: Map<String, Value>,
    layout: JsonLayout,
    dirty: bool,
}

impl EditableManifest {
    pub fn load(path: &Utf8Path) -> EditResult<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("read {path}"))?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Utf8Path, text: &str) -> EditResult<Self> {
        let doc = match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => map,
            _ => {
                return Err(EditError::InvalidManifest {
                    path: path.to_string(),
                    message: "top level is not an object".to_string(),
                });
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            on_disk: text.to_string(),
            doc,
            layout: JsonLayout::detect(text),
            dirty: false,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.doc.get("name").and_then(Value::as_str)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn dependency(&self, section: &str, name: &str) -> Option<&str> {
        self.doc.get(section)?.get(name)?.as_str()
    }

    /// Sets `section.name = spec`; returns whether the value changed.
    pub fn set_dependency(&mut self, section: &str, name: &str, spec: &str) -> bool {
        if self.dependency(section, name) == Some(spec) {
            return false;
        }
        let table = self
            .doc
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(table) = table.as_object_mut() else {
            return false;
        };
        table.insert(name.to_string(), Value::String(spec.to_string()));
        self.dirty = true;
        true
    }

    /// Object at a dotted path (`pnpm.overrides`), created on demand.
    pub(crate) fn object_mut(&mut self, dotted: &str) -> Option<&mut Map<String, Value>> {
        let mut current = &mut self.doc;
        for key in dotted.split('.') {
            current = current
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()))
                .as_object_mut()?;
        }
        Some(current)
    }

    pub(crate) fn object(&self, dotted: &str) -> Option<&Map<String, Value>> {
        let mut current = &self.doc;
        for key in dotted.split('.') {
            current = current.get(key)?.as_object()?;
        }
        Some(current)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Package names pinned by `overrides`, `pnpm.overrides` or `resolutions`.
    pub fn override_names(&self) -> BTreeSet<String> {
        ["overrides", "pnpm.overrides", "resolutions"]
            .into_iter()
            .filter_map(|section| self.object(section))
            .flat_map(|map| map.keys())
            .map(|key| override_target(key).to_string())
            .collect()
    }

    pub fn render(&self) -> EditResult<String> {
        Ok(self.layout.render(&Value::Object(self.doc.clone()))?)
    }

    /// Diff between what is on disk and the pending edits.
    pub fn pending_diff(&self) -> EditResult<String> {
        Ok(file_diff(self.path.as_str(), &self.on_disk, &self.render()?))
    }

    /// Writes pending edits. Returns `false` without touching the file when
    /// the rendered text matches what is on disk.
    pub fn save(&mut self) -> EditResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let text = self.render()?;
        self.dirty = false;
        if text == self.on_disk {
            return Ok(false);
        }
        fs::write(&self.path, &text).with_context(|| format!("write {}", self.path))?;
        debug!(path = %self.path, "saved manifest");
        self.on_disk = text;
        Ok(true)
    }

    pub fn snapshot(&self) -> anyhow::Result<FileSnapshot> {
        FileSnapshot::capture(&self.path)
    }

    /// Restores the file and reloads in-memory state from it.
    pub fn restore(&mut self, snapshot: &FileSnapshot) -> EditResult<()> {
        snapshot.restore()?;
        *self = Self::load(&self.path)?;
        Ok(())
    }
}

/// `lodash@4.17.20` → `lodash`, `@s/a@^1` → `@s/a`, `express>qs` → `qs`.
pub(crate) fn override_target(key: &str) -> &str {
    let key = key.rsplit('>').next().unwrap_or(key);
    match key.rfind('@') {
        Some(i) if i > 0 => &key[..i],
        _ => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const TEXT: &str = "{\n    \"name\": \"app\",\n    \"dependencies\": {\n        \"lodash\": \"^4.17.20\"\n    },\n    \"overrides\": {\n        \"minimist@1.2.0\": \"1.2.6\"\n    }\n}\n";

    fn on_disk(text: &str) -> (TempDir, Utf8PathBuf) {
        let temp = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join(MANIFEST_FILE)).unwrap();
        fs::write(&path, text).unwrap();
        (temp, path)
    }

    #[test]
    fn keeps_layout_and_key_order() {
        let (_t, path) = on_disk(TEXT);
        let mut manifest = EditableManifest::load(&path).unwrap();
        assert!(manifest.set_dependency("dependencies", "lodash", "^4.17.21"));
        assert!(manifest.save().unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), TEXT.replace("^4.17.20", "^4.17.21"));
    }

    #[test]
    fn save_without_change_does_not_write() {
        let (_t, path) = on_disk(TEXT);
        let mut manifest = EditableManifest::load(&path).unwrap();
        assert!(!manifest.set_dependency("dependencies", "lodash", "^4.17.20"));
        assert!(!manifest.save().unwrap());
    }

    #[test]
    fn restore_reloads_state() {
        let (_t, path) = on_disk(TEXT);
        let mut manifest = EditableManifest::load(&path).unwrap();
        let snap = manifest.snapshot().unwrap();
        manifest.set_dependency("dependencies", "lodash", "^4.17.21");
        manifest.save().unwrap();
        manifest.restore(&snap).unwrap();
        assert_eq!(manifest.dependency("dependencies", "lodash"), Some("^4.17.20"));
        assert!(!manifest.is_dirty());
    }

    #[test]
    fn override_names_strip_selectors() {
        let (_t, path) = on_disk(TEXT);
        let manifest = EditableManifest::load(&path).unwrap();
        assert_eq!(manifest.override_names().into_iter().collect::<Vec<_>>(), vec!["minimist"]);
        assert_eq!(override_target("@s/a@^1.0.0"), "@s/a");
        assert_eq!(override_target("express>qs"), "qs");
    }

    #[test]
    fn non_object_is_rejected() {
        let err = EditableManifest::parse(Utf8Path::new("package.json"), "[]").unwrap_err();
        assert!(matches!(err, EditError::InvalidManifest { .. }));
    }
}
