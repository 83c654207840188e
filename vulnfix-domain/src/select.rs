//! Patch version selection.

use crate::curated::CuratedCatalog;
use crate::range::NpmRange;
use semver::Version;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct SelectRequest<'a> {
    pub name: &'a str,
    pub current: &'a Version,
    pub available: &'a [Version],
    pub vulnerable: &'a NpmRange,
    /// Carried for logging; selection does not enforce it.
    pub first_patched: Option<&'a Version>,
}

/// Highest stable version on the anchor major that escapes the vulnerable
/// range.
///
/// The anchor major is the curated replacement's major when the catalog has
/// one for this exact name, else the current major. A curated replacement
/// also lifts the range exclusion.
pub fn select_patch_version(req: &SelectRequest<'_>, catalog: &CuratedCatalog) -> Option<Version> {
    let curated_major = catalog
        .get(req.name)
        .and_then(|m| crate::range::parse_version(&m.version))
        .map(|v| v.major);
    let anchor = curated_major.unwrap_or(req.current.major);

    let chosen = req
        .available
        .iter()
        .filter(|v| v.pre.is_empty())
        .filter(|v| v.major == anchor)
        .filter(|v| curated_major.is_some() || !req.vulnerable.satisfies(v))
        .max()
        .cloned();

    debug!(
        package = req.name,
        current = %req.current,
        anchor,
        curated = curated_major.is_some(),
        first_patched = ?req.first_patched.map(ToString::to_string),
        selected = ?chosen.as_ref().map(ToString::to_string),
        "patch version selection"
    );
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curated::CuratedManifest;

    fn versions(list: &[&str]) -> Vec<Version> {
        list.iter().map(|v| Version::parse(v).unwrap()).collect()
    }

    fn pick(current: &str, available: &[&str], range: &str, catalog: &CuratedCatalog) -> Option<String> {
        let current = Version::parse(current).unwrap();
        let available = versions(available);
        let vulnerable = NpmRange::parse(range).unwrap();
        select_patch_version(
            &SelectRequest {
                name: "lodash",
                current: &current,
                available: &available,
                vulnerable: &vulnerable,
                first_patched: None,
            },
            catalog,
        )
        .map(|v| v.to_string())
    }

    #[test]
    fn stays_on_current_major() {
        let got = pick(
            "4.17.20",
            &["4.17.19", "4.17.20", "4.17.21", "5.0.0"],
            "<4.17.21",
            &CuratedCatalog::default(),
        );
        assert_eq!(got.as_deref(), Some("4.17.21"));
    }

    #[test]
    fn none_when_major_has_no_safe_release() {
        let got = pick("3.10.0", &["3.10.0", "3.10.1", "4.17.21"], "<4.0.0", &CuratedCatalog::default());
        assert_eq!(got, None);
    }

    #[test]
    fn skips_prereleases() {
        let got = pick(
            "4.17.20",
            &["4.17.21", "4.17.22-beta.1"],
            "<4.17.21",
            &CuratedCatalog::default(),
        );
        assert_eq!(got.as_deref(), Some("4.17.21"));
    }

    #[test]
    fn curated_entry_moves_anchor_and_lifts_exclusion() {
        let catalog = CuratedCatalog::new([CuratedManifest {
            package: "lodash".into(),
            version: "5.0.0".into(),
            drop_in: false,
        }]);
        let got = pick("4.17.20", &["4.17.21", "5.0.0", "5.0.1"], "<6.0.0", &catalog);
        assert_eq!(got.as_deref(), Some("5.0.1"));
    }
}
