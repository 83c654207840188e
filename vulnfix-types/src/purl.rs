//! Minimal Package URL support for the ecosystems vulnfix scans.
//!
//! Only the `pkg:<type>/<namespace>/<name>@<version>` shape is modelled.
//! Qualifiers and subpaths are accepted on input and dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Purl {
    pub ecosystem: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PurlError {
    #[error("purl must start with `pkg:`: {0}")]
    MissingScheme(String),

    #[error("purl is missing a package type: {0}")]
    MissingType(String),

    #[error("purl is missing a package name: {0}")]
    MissingName(String),
}

impl Purl {
    /// Builds an npm purl from a package name that may carry an `@scope/` prefix.
    pub fn npm(package_name: &str, version: &str) -> Self {
        let (namespace, name) = match package_name.split_once('/') {
            Some((scope, name)) if scope.starts_with('@') => {
                (Some(scope.to_string()), name.to_string())
            }
            _ => (None, package_name.to_string()),
        };
        Self {
            ecosystem: "npm".to_string(),
            namespace,
            name,
            version: Some(version.to_string()),
        }
    }

    /// Registry-facing package name (`@scope/name` for scoped npm packages).
    pub fn package_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for Purl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkg:{}/", self.ecosystem)?;
        if let Some(ns) = &self.namespace {
            write!(f, "{}/", urlencoding::encode(ns))?;
        }
        write!(f, "{}", urlencoding::encode(&self.name))?;
        if let Some(v) = &self.version {
            write!(f, "@{}", urlencoding::encode(v))?;
        }
        Ok(())
    }
}

impl FromStr for Purl {
    type Err = PurlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("pkg:")
            .ok_or_else(|| PurlError::MissingScheme(s.to_string()))?;

        // Drop subpath, then qualifiers.
        let rest = rest.split_once('#').map_or(rest, |(head, _)| head);
        let rest = rest.split_once('?').map_or(rest, |(head, _)| head);

        let (ecosystem, path) = rest
            .split_once('/')
            .ok_or_else(|| PurlError::MissingType(s.to_string()))?;
        if ecosystem.is_empty() {
            return Err(PurlError::MissingType(s.to_string()));
        }

        let (path, version) = match path.rsplit_once('@') {
            Some((p, v)) if !p.is_empty() && !p.ends_with('/') => (p, Some(decode(v))),
            _ => (path, None),
        };

        let (namespace, name) = match path.rsplit_once('/') {
            Some((ns, name)) => (Some(decode(ns)), decode(name)),
            None => (None, decode(path)),
        };
        if name.is_empty() {
            return Err(PurlError::MissingName(s.to_string()));
        }

        Ok(Self {
            ecosystem: ecosystem.to_ascii_lowercase(),
            namespace,
            name,
            version,
        })
    }
}

fn decode(part: &str) -> String {
    urlencoding::decode(part)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| part.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scoped_npm_purl() {
        let purl: Purl = "pkg:npm/%40babel/core@7.24.0".parse().unwrap();
        assert_eq!(purl.ecosystem, "npm");
        assert_eq!(purl.namespace.as_deref(), Some("@babel"));
        assert_eq!(purl.name, "core");
        assert_eq!(purl.version.as_deref(), Some("7.24.0"));
        assert_eq!(purl.package_name(), "@babel/core");
    }

    #[test]
    fn parses_unscoped_and_drops_qualifiers() {
        let purl: Purl = "pkg:npm/lodash@4.17.20?arch=x64#lib".parse().unwrap();
        assert_eq!(purl.namespace, None);
        assert_eq!(purl.name, "lodash");
        assert_eq!(purl.version.as_deref(), Some("4.17.20"));
    }

    #[test]
    fn display_encodes_scope() {
        let purl = Purl::npm("@types/node", "20.1.0");
        assert_eq!(purl.to_string(), "pkg:npm/%40types/node@20.1.0");
        let back: Purl = purl.to_string().parse().unwrap();
        assert_eq!(back, purl);
    }

    #[test]
    fn rejects_missing_scheme_and_name() {
        assert!(matches!(
            "npm/lodash@1.0.0".parse::<Purl>(),
            Err(PurlError::MissingScheme(_))
        ));
        assert!(matches!(
            "pkg:npm".parse::<Purl>(),
            Err(PurlError::MissingType(_))
        ));
        assert!(matches!(
            "pkg:npm/".parse::<Purl>(),
            Err(PurlError::MissingName(_))
        ));
    }
}
