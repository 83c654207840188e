//! Root-level override entries for vulnerable transitive dependencies.

use crate::manifest::{EditableManifest, override_target};
use serde_json::Value;
use tracing::debug;
use vulnfix_domain::lockfile::LockfileKind;

fn section(kind: LockfileKind) -> &'static str {
    match kind {
        LockfileKind::Npm => "overrides",
        LockfileKind::Pnpm => "pnpm.overrides",
    }
}

/// Adds `name@old: new` to the package manager's override table.
///
/// Existing entries for `name` belong to the user and are never replaced;
/// in that case nothing is written and `false` is returned.
pub fn set_override(
    manifest: &mut EditableManifest,
    kind: LockfileKind,
    name: &str,
    old_version: &str,
    new_version: &str,
) -> bool {
    let section = section(kind);
    let taken = manifest
        .object(section)
        .is_some_and(|table| table.keys().any(|k| override_target(k) == name));
    if taken {
        debug!(package = name, section, "override already present; leaving it");
        return false;
    }
    let Some(table) = manifest.object_mut(section) else {
        return false;
    };
    table.insert(
        format!("{name}@{old_version}"),
        Value::String(new_version.to_string()),
    );
    manifest.mark_dirty();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;

    fn manifest(text: &str) -> EditableManifest {
        EditableManifest::parse(Utf8Path::new("package.json"), text).unwrap()
    }

    #[test]
    fn npm_override_is_added() {
        let mut m = manifest("{\"name\":\"app\"}");
        assert!(set_override(&mut m, LockfileKind::Npm, "qs", "6.5.0", "6.5.3"));
        let text = m.render().unwrap();
        assert!(text.contains("\"qs@6.5.0\": \"6.5.3\""));
    }

    #[test]
    fn pnpm_override_goes_under_pnpm_key() {
        let mut m = manifest("{\"pnpm\":{\"neverBuiltDependencies\":[]}}");
        assert!(set_override(&mut m, LockfileKind::Pnpm, "@s/a", "1.0.0", "1.0.2"));
        let value: Value = serde_json::from_str(&m.render().unwrap()).unwrap();
        assert_eq!(value["pnpm"]["overrides"]["@s/a@1.0.0"], "1.0.2");
        assert!(value["pnpm"]["neverBuiltDependencies"].is_array());
    }

    #[test]
    fn user_entries_are_not_clobbered() {
        let mut m = manifest("{\"overrides\":{\"qs\":\"6.11.0\"}}");
        assert!(!set_override(&mut m, LockfileKind::Npm, "qs", "6.5.0", "6.5.3"));
        assert!(!m.is_dirty());
    }
}
