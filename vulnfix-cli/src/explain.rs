//! Range rewriting preview for the `vulnfix explain-range` command.

use anyhow::bail;
use vulnfix_domain::range::{NpmRange, parse_version};
use vulnfix_edit::{RangeStyle, apply_range};

/// What each style writes.
pub static STYLE_NOTES: &[(RangeStyle, &str)] = &[
    (RangeStyle::Caret, "compatible updates within the major"),
    (RangeStyle::Tilde, "patch updates within the minor"),
    (RangeStyle::Gt, "anything above the version"),
    (RangeStyle::Gte, "the version or anything above"),
    (RangeStyle::Lt, "anything below the version"),
    (RangeStyle::Lte, "the version or anything below"),
    (RangeStyle::Pin, "exactly the version"),
    (
        RangeStyle::Preserve,
        "the old operator when the range is a single comparator, else pinned",
    ),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainRow {
    pub style: RangeStyle,
    pub rewritten: String,
    pub note: &'static str,
}

pub fn style_note(style: RangeStyle) -> &'static str {
    STYLE_NOTES
        .iter()
        .find(|(s, _)| *s == style)
        .map_or("", |(_, note)| note)
}

/// Rewrites of `old` towards `version`, one row per style (or just `only`).
pub fn explain_range(old: &str, version: &str, only: Option<RangeStyle>) -> anyhow::Result<Vec<ExplainRow>> {
    let Some(parsed) = parse_version(version) else {
        bail!("`{version}` is not a semver version");
    };
    if NpmRange::parse(old).is_err() {
        bail!("`{old}` is not an npm range; the manifest rewriter leaves such specs alone");
    }
    let version = parsed.to_string();

    let styles: Vec<RangeStyle> = match only {
        Some(style) => vec![style],
        None => RangeStyle::ALL.to_vec(),
    };
    Ok(styles
        .into_iter()
        .map(|style| ExplainRow {
            style,
            rewritten: apply_range(old, &version, style),
            note: style_note(style),
        })
        .collect())
}
