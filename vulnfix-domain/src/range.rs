//! npm-flavoured version ranges on top of the `semver` crate.
//!
//! `semver::VersionReq` speaks Cargo's dialect (comma-separated, implicit
//! caret). Lockfiles, manifests and advisories use the npm dialect instead:
//! space-separated intersections, `||` unions, hyphen ranges and x-ranges.
//! Ranges keep their written clauses so callers can ask what operator a
//! range was declared with; matching desugars clauses to plain bounds.

use semver::{BuildMetadata, Prerelease, Version};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("invalid version range `{range}`: {reason}")]
    Invalid { range: String, reason: String },
}

/// Operator as written in a range clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Caret,
    Tilde,
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Caret => "^",
            Operator::Tilde => "~",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Eq => "=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A possibly partial version: `1`, `1.2`, `1.x`, `*`, `1.2.3-beta.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partial {
    pub major: Option<u64>,
    pub minor: Option<u64>,
    pub patch: Option<u64>,
    pub pre: Prerelease,
}

impl Partial {
    fn is_any(&self) -> bool {
        self.major.is_none()
    }

    fn floor(&self) -> Version {
        Version {
            major: self.major.unwrap_or(0),
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            pre: self.pre.clone(),
            build: BuildMetadata::EMPTY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Single { op: Option<Operator>, version: Partial },
    Hyphen { from: Partial, to: Partial },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    op: BoundOp,
    version: Version,
}

impl Bound {
    fn new(op: BoundOp, version: Version) -> Self {
        Self { op, version }
    }

    fn matches(&self, v: &Version) -> bool {
        match self.op {
            BoundOp::Gt => v > &self.version,
            BoundOp::Gte => v >= &self.version,
            BoundOp::Lt => v < &self.version,
            BoundOp::Lte => v <= &self.version,
            BoundOp::Eq => v == &self.version,
        }
    }
}

/// Parsed npm range: a union (`||`) of intersections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpmRange {
    raw: String,
    alternatives: Vec<Vec<Clause>>,
    /// Desugared form of each alternative, in the same order.
    bounds: Vec<Vec<Bound>>,
}

impl NpmRange {
    pub fn parse(raw: &str) -> Result<Self, RangeError> {
        let mut alternatives = Vec::new();
        let mut bounds = Vec::new();
        for alt in raw.split("||") {
            let clauses = parse_intersection(raw, alt)?;
            let mut desugared = Vec::new();
            for clause in &clauses {
                desugared.extend(desugar(raw, clause)?);
            }
            alternatives.push(clauses);
            bounds.push(desugared);
        }
        Ok(Self {
            raw: raw.trim().to_string(),
            alternatives,
            bounds,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// When the range is exactly one clause, returns its operator
    /// (`None` for a bare version). Compound, union and hyphen ranges
    /// return `None` from the outer option.
    pub fn single_comparator(&self) -> Option<Option<Operator>> {
        match self.alternatives.as_slice() {
            [only] => match only.as_slice() {
                [Clause::Single { op, version }] if !version.is_any() => Some(*op),
                _ => None,
            },
            _ => None,
        }
    }

    /// npm `satisfies` semantics with prereleases excluded unless a clause
    /// opts into the same `major.minor.patch` tuple.
    pub fn satisfies(&self, v: &Version) -> bool {
        self.bounds.iter().any(|bounds| {
            if !bounds.iter().all(|b| b.matches(v)) {
                return false;
            }
            if v.pre.is_empty() {
                return true;
            }
            bounds.iter().any(|b| {
                !b.version.pre.is_empty()
                    && b.version.major == v.major
                    && b.version.minor == v.minor
                    && b.version.patch == v.patch
            })
        })
    }
}

impl fmt::Display for NpmRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Lenient version parse for lockfile/registry strings (`v1.2.3`, `=1.2.3`).
pub fn parse_version(s: &str) -> Option<Version> {
    let s = s.trim();
    let s = s.strip_prefix('=').unwrap_or(s);
    let s = s.strip_prefix('v').unwrap_or(s);
    Version::parse(s).ok()
}

fn invalid(range: &str, reason: impl Into<String>) -> RangeError {
    RangeError::Invalid {
        range: range.to_string(),
        reason: reason.into(),
    }
}

const OPERATORS: [(&str, Operator); 8] = [
    (">=", Operator::Gte),
    ("<=", Operator::Lte),
    ("~>", Operator::Tilde),
    (">", Operator::Gt),
    ("<", Operator::Lt),
    ("=", Operator::Eq),
    ("^", Operator::Caret),
    ("~", Operator::Tilde),
];

fn split_operator(token: &str) -> (Option<Operator>, &str) {
    for (text, op) in OPERATORS {
        if let Some(rest) = token.strip_prefix(text) {
            return (Some(op), rest);
        }
    }
    (None, token)
}

fn parse_intersection(raw: &str, alt: &str) -> Result<Vec<Clause>, RangeError> {
    let tokens: Vec<&str> = alt.split_whitespace().collect();

    if tokens.len() == 3 && tokens[1] == "-" {
        return Ok(vec![Clause::Hyphen {
            from: parse_partial(raw, tokens[0])?,
            to: parse_partial(raw, tokens[2])?,
        }]);
    }

    // Re-attach operators written with a trailing space (`>= 1.2.3`).
    let mut merged: Vec<String> = Vec::new();
    let mut pending: Option<&str> = None;
    for token in tokens {
        let (op, rest) = split_operator(token);
        if op.is_some() && rest.is_empty() {
            if pending.is_some() {
                return Err(invalid(raw, format!("dangling operator before `{token}`")));
            }
            pending = Some(token);
            continue;
        }
        match pending.take() {
            Some(p) => merged.push(format!("{p}{token}")),
            None => merged.push(token.to_string()),
        }
    }
    if let Some(p) = pending {
        return Err(invalid(raw, format!("operator `{p}` without a version")));
    }

    if merged.is_empty() {
        return Ok(vec![Clause::Single {
            op: None,
            version: any_partial(),
        }]);
    }

    merged
        .iter()
        .map(|token| {
            let (op, rest) = split_operator(token);
            Ok(Clause::Single {
                op,
                version: parse_partial(raw, rest)?,
            })
        })
        .collect()
}

fn any_partial() -> Partial {
    Partial {
        major: None,
        minor: None,
        patch: None,
        pre: Prerelease::EMPTY,
    }
}

fn parse_partial(raw: &str, text: &str) -> Result<Partial, RangeError> {
    let text = text.trim();
    let text = text.strip_prefix('v').unwrap_or(text);
    if text.is_empty() {
        return Ok(any_partial());
    }

    let text = text.split_once('+').map_or(text, |(core, _build)| core);
    let (core, pre) = match text.split_once('-') {
        Some((core, pre)) => (core, pre),
        None => (text, ""),
    };

    let mut parts = [None, None, None];
    let mut wildcard_seen = false;
    let pieces: Vec<&str> = core.split('.').collect();
    if pieces.len() > 3 {
        return Err(invalid(raw, format!("too many version components in `{text}`")));
    }
    for (slot, piece) in parts.iter_mut().zip(pieces) {
        if wildcard_seen || matches!(piece, "x" | "X" | "*") {
            wildcard_seen = true;
            continue;
        }
        let n = piece
            .parse::<u64>()
            .map_err(|_| invalid(raw, format!("`{piece}` is not a version number")))?;
        *slot = Some(n);
    }

    let pre = if pre.is_empty() {
        Prerelease::EMPTY
    } else {
        Prerelease::new(pre).map_err(|e| invalid(raw, e.to_string()))?
    };

    Ok(Partial {
        major: parts[0],
        minor: parts[1],
        patch: parts[2],
        pre,
    })
}

fn ceiling(major: u64, minor: u64, patch: u64) -> Version {
    Version {
        major,
        minor,
        patch,
        pre: Prerelease::new("0").unwrap_or(Prerelease::EMPTY),
        build: BuildMetadata::EMPTY,
    }
}

fn release(major: u64, minor: u64, patch: u64) -> Version {
    Version::new(major, minor, patch)
}

/// `n + 1` for exclusive upper bounds.
fn next(raw: &str, n: u64) -> Result<u64, RangeError> {
    n.checked_add(1)
        .ok_or_else(|| invalid(raw, format!("version component {n} has no successor")))
}

fn desugar(raw: &str, clause: &Clause) -> Result<Vec<Bound>, RangeError> {
    match clause {
        Clause::Hyphen { from, to } => {
            let mut out = Vec::new();
            if !from.is_any() {
                out.push(Bound::new(BoundOp::Gte, from.floor()));
            }
            match (to.major, to.minor, to.patch) {
                (None, _, _) => {}
                (Some(ma), None, _) => out.push(Bound::new(BoundOp::Lt, ceiling(next(raw, ma)?, 0, 0))),
                (Some(ma), Some(mi), None) => {
                    out.push(Bound::new(BoundOp::Lt, ceiling(ma, next(raw, mi)?, 0)))
                }
                (Some(_), Some(_), Some(_)) => out.push(Bound::new(BoundOp::Lte, to.floor())),
            }
            Ok(out)
        }
        Clause::Single { op, version } => desugar_single(raw, *op, version),
    }
}

fn desugar_single(raw: &str, op: Option<Operator>, p: &Partial) -> Result<Vec<Bound>, RangeError> {
    let floor = p.floor();
    let bounds = match (op, p.major, p.minor, p.patch) {
        // `*`, `x`, `>=*` and friends.
        (None | Some(Operator::Eq | Operator::Gte | Operator::Lte | Operator::Caret | Operator::Tilde), None, _, _) => vec![],
        (Some(Operator::Gt | Operator::Lt), None, _, _) => {
            vec![Bound::new(BoundOp::Lt, ceiling(0, 0, 0))]
        }

        (None | Some(Operator::Eq), Some(ma), mi, pa) => match (mi, pa) {
            (None, _) => vec![
                Bound::new(BoundOp::Gte, floor),
                Bound::new(BoundOp::Lt, ceiling(next(raw, ma)?, 0, 0)),
            ],
            (Some(mi), None) => vec![
                Bound::new(BoundOp::Gte, floor),
                Bound::new(BoundOp::Lt, ceiling(ma, next(raw, mi)?, 0)),
            ],
            (Some(_), Some(_)) => vec![Bound::new(BoundOp::Eq, floor)],
        },

        (Some(Operator::Caret), Some(ma), mi, pa) => {
            let upper = match (ma, mi, pa) {
                (0, None, _) => ceiling(1, 0, 0),
                (0, Some(0), None) => ceiling(0, 1, 0),
                (0, Some(0), Some(pa)) => ceiling(0, 0, next(raw, pa)?),
                (0, Some(mi), _) => ceiling(0, next(raw, mi)?, 0),
                (ma, _, _) => ceiling(next(raw, ma)?, 0, 0),
            };
            vec![Bound::new(BoundOp::Gte, floor), Bound::new(BoundOp::Lt, upper)]
        }

        (Some(Operator::Tilde), Some(ma), mi, _) => {
            let upper = match mi {
                None => ceiling(next(raw, ma)?, 0, 0),
                Some(mi) => ceiling(ma, next(raw, mi)?, 0),
            };
            vec![Bound::new(BoundOp::Gte, floor), Bound::new(BoundOp::Lt, upper)]
        }

        (Some(Operator::Gt), Some(ma), mi, pa) => match (mi, pa) {
            (None, _) => vec![Bound::new(BoundOp::Gte, release(next(raw, ma)?, 0, 0))],
            (Some(mi), None) => vec![Bound::new(BoundOp::Gte, release(ma, next(raw, mi)?, 0))],
            (Some(_), Some(_)) => vec![Bound::new(BoundOp::Gt, floor)],
        },

        (Some(Operator::Gte), Some(_), _, _) => vec![Bound::new(BoundOp::Gte, floor)],

        (Some(Operator::Lt), Some(ma), mi, pa) => match (mi, pa) {
            (None, _) => vec![Bound::new(BoundOp::Lt, ceiling(ma, 0, 0))],
            (Some(mi), None) => vec![Bound::new(BoundOp::Lt, ceiling(ma, mi, 0))],
            (Some(_), Some(_)) => vec![Bound::new(BoundOp::Lt, floor)],
        },

        (Some(Operator::Lte), Some(ma), mi, pa) => match (mi, pa) {
            (None, _) => vec![Bound::new(BoundOp::Lt, ceiling(next(raw, ma)?, 0, 0))],
            (Some(mi), None) => vec![Bound::new(BoundOp::Lt, ceiling(ma, next(raw, mi)?, 0))],
            (Some(_), Some(_)) => vec![Bound::new(BoundOp::Lte, floor)],
        },
    };
    Ok(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn sat(range: &str, version: &str) -> bool {
        NpmRange::parse(range).unwrap().satisfies(&v(version))
    }

    #[test]
    fn caret_ranges() {
        assert!(sat("^4.17.20", "4.17.21"));
        assert!(!sat("^4.17.20", "5.0.0"));
        assert!(!sat("^4.17.20", "4.17.19"));
        assert!(sat("^0.2.3", "0.2.9"));
        assert!(!sat("^0.2.3", "0.3.0"));
        assert!(sat("^0.0.3", "0.0.3"));
        assert!(!sat("^0.0.3", "0.0.4"));
        assert!(sat("^1.x", "1.9.9"));
    }

    #[test]
    fn tilde_and_x_ranges() {
        assert!(sat("~1.2.3", "1.2.9"));
        assert!(!sat("~1.2.3", "1.3.0"));
        assert!(sat("~1", "1.9.0"));
        assert!(sat("1.x", "1.0.0"));
        assert!(!sat("1.x", "2.0.0"));
        assert!(sat("*", "9.9.9"));
        assert!(sat("", "0.0.1"));
    }

    #[test]
    fn comparators_and_intersections() {
        assert!(sat("<4.17.21", "4.17.20"));
        assert!(!sat("<4.17.21", "4.17.21"));
        assert!(sat(">=1.0.0 <2.0.0", "1.5.0"));
        assert!(!sat(">=1.0.0 <2.0.0", "2.0.0"));
        assert!(sat(">= 1.0.0 < 2.0.0", "1.0.0"));
        assert!(sat(">1.2", "1.3.0"));
        assert!(!sat(">1.2", "1.2.9"));
        assert!(sat("<=1.2", "1.2.9"));
        assert!(!sat("<=1.2", "1.3.0"));
    }

    #[test]
    fn unions_and_hyphens() {
        assert!(sat("<1.0.0 || >=2.0.0 <2.1.0", "2.0.5"));
        assert!(!sat("<1.0.0 || >=2.0.0 <2.1.0", "1.5.0"));
        assert!(sat("1.2.3 - 2.3.4", "2.3.4"));
        assert!(!sat("1.2.3 - 2.3.4", "2.3.5"));
        assert!(sat("1.2 - 2", "2.9.9"));
        assert!(!sat("1.2 - 2", "3.0.0"));
    }

    #[test]
    fn prereleases_need_matching_tuple() {
        assert!(!sat("<4.17.21", "4.17.21-beta.1"));
        assert!(!sat(">=1.0.0", "2.0.0-rc.1"));
        assert!(sat(">=2.0.0-rc.0", "2.0.0-rc.1"));
    }

    #[test]
    fn single_comparator_detection() {
        let single = |r: &str| NpmRange::parse(r).unwrap().single_comparator();
        assert_eq!(single("^1.2.3"), Some(Some(Operator::Caret)));
        assert_eq!(single(">= 1.2.3"), Some(Some(Operator::Gte)));
        assert_eq!(single("1.2.3"), Some(None));
        assert_eq!(single(">=1.0.0 <2.0.0"), None);
        assert_eq!(single("^1.0.0 || ^2.0.0"), None);
        assert_eq!(single("1.0.0 - 2.0.0"), None);
        assert_eq!(single("*"), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(NpmRange::parse("not-a-range").is_err());
        assert!(NpmRange::parse(">=").is_err());
        assert!(NpmRange::parse("1.2.3.4").is_err());
    }

    #[test]
    fn components_without_a_successor_are_rejected() {
        let max = u64::MAX;
        for range in [
            format!("^{max}.0.0"),
            format!("~1.{max}"),
            format!("0.0.{max} - {max}"),
            format!("^0.0.{max}"),
            format!("<={max}"),
            format!(">1.{max}"),
        ] {
            assert!(
                matches!(NpmRange::parse(&range), Err(RangeError::Invalid { .. })),
                "{range}"
            );
        }
        // exact and lower-bound forms need no successor
        assert!(sat(&format!(">={max}.0.0"), &format!("{max}.0.0")));
        assert!(sat(&format!("<{max}"), "1.0.0"));
    }

    #[test]
    fn lenient_version_parse() {
        assert_eq!(parse_version("v1.2.3"), Some(v("1.2.3")));
        assert_eq!(parse_version("=1.2.3"), Some(v("1.2.3")));
        assert_eq!(parse_version("latest"), None);
    }
}
