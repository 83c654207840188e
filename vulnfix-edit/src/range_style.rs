use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vulnfix_domain::range::{NpmRange, Operator};

/// How a rewritten manifest range is spelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeStyle {
    Caret,
    Tilde,
    Gt,
    Gte,
    Lt,
    Lte,
    Pin,
    /// Reuse the old range's operator when it is a single comparator.
    #[default]
    Preserve,
}

impl RangeStyle {
    pub const ALL: [RangeStyle; 8] = [
        RangeStyle::Caret,
        RangeStyle::Tilde,
        RangeStyle::Gt,
        RangeStyle::Gte,
        RangeStyle::Lt,
        RangeStyle::Lte,
        RangeStyle::Pin,
        RangeStyle::Preserve,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RangeStyle::Caret => "caret",
            RangeStyle::Tilde => "tilde",
            RangeStyle::Gt => "gt",
            RangeStyle::Gte => "gte",
            RangeStyle::Lt => "lt",
            RangeStyle::Lte => "lte",
            RangeStyle::Pin => "pin",
            RangeStyle::Preserve => "preserve",
        }
    }
}

impl fmt::Display for RangeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RangeStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RangeStyle::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<&str> = RangeStyle::ALL.iter().map(|s| s.as_str()).collect();
                format!("unknown range style `{s}` (expected one of {})", known.join(", "))
            })
    }
}

/// New range for `version` written in `style`, given the range it replaces.
///
/// `preserve` keeps the operator of a single-comparator range (`^1.2.3`,
/// `>=1.0.0`); anything compound falls back to the bare version.
pub fn apply_range(old: &str, version: &str, style: RangeStyle) -> String {
    let op = match style {
        RangeStyle::Caret => "^",
        RangeStyle::Tilde => "~",
        RangeStyle::Gt => ">",
        RangeStyle::Gte => ">=",
        RangeStyle::Lt => "<",
        RangeStyle::Lte => "<=",
        RangeStyle::Pin => "",
        RangeStyle::Preserve => match NpmRange::parse(old).ok().and_then(|r| r.single_comparator()) {
            Some(Some(op)) => preserved(op),
            _ => "",
        },
    };
    format!("{op}{version}")
}

fn preserved(op: Operator) -> &'static str {
    match op {
        // a bare `=1.2.3` reads better as `1.2.3`
        Operator::Eq => "",
        other => other.as_str(),
    }
}
