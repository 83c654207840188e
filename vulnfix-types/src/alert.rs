//! Compact artifact and alert records returned by the batch alert-scan API.
//!
//! The API is not under our control, so every field that is not needed to
//! identify an artifact is optional and unknown enum values degrade to
//! `Unknown`/`Other` instead of failing the whole record.

use crate::purl::Purl;
use serde::{Deserialize, Serialize};

/// One scanned artifact with its alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Package type, e.g. "npm".
    #[serde(rename = "type")]
    pub ecosystem: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub alerts: Vec<CompactAlert>,
}

impl ArtifactRecord {
    pub fn purl(&self) -> Purl {
        Purl {
            ecosystem: self.ecosystem.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            version: if self.version.is_empty() {
                None
            } else {
                Some(self.version.clone())
            },
        }
    }

    pub fn package_name(&self) -> String {
        self.purl().package_name()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactAlert {
    #[serde(default)]
    pub key: String,

    /// Alert type, e.g. "cve", "criticalCVE", "deprecated".
    #[serde(rename = "type")]
    pub alert_type: String,

    #[serde(default)]
    pub severity: Severity,

    /// Action the server already resolved for this alert, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<AlertAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<AlertFix>,

    #[serde(default)]
    pub props: AlertProps,
}

impl CompactAlert {
    /// Machine-actionable remediation carried by this alert, if any.
    ///
    /// A cve-patch descriptor needs both the first patched version and the
    /// vulnerable range; an upgrade descriptor needs a target version.
    pub fn fix_descriptor(&self) -> Option<FixDescriptor> {
        if let (Some(first_patched), Some(range)) = (
            non_empty(&self.props.first_patched_version_identifier),
            non_empty(&self.props.vulnerable_version_range),
        ) {
            return Some(FixDescriptor::CvePatch {
                first_patched_version: first_patched.to_string(),
                vulnerable_range: range.to_string(),
            });
        }

        let is_upgrade = self
            .fix
            .as_ref()
            .is_some_and(|f| f.kind == AlertFixType::Upgrade);
        if is_upgrade && let Some(target) = non_empty(&self.props.upgrade_version) {
            return Some(FixDescriptor::VersionUpgrade {
                target_version: target.to_string(),
            });
        }

        None
    }

    pub fn fix_kind(&self) -> FixKind {
        match self.fix_descriptor() {
            Some(FixDescriptor::CvePatch { .. }) => FixKind::CvePatch,
            Some(FixDescriptor::VersionUpgrade { .. }) => FixKind::VersionUpgrade,
            None => FixKind::None,
        }
    }
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    #[serde(alias = "moderate", alias = "medium")]
    Middle,
    High,
    Critical,
}

/// Policy action attached to an alert type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertAction {
    Error,
    Warn,
    Ignore,
    Monitor,
    Defer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertFix {
    #[serde(rename = "type")]
    pub kind: AlertFixType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertFixType {
    Cve,
    Upgrade,
    Remove,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ghsa_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cve_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_patched_version_identifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulnerable_version_range: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixDescriptor {
    CvePatch {
        first_patched_version: String,
        vulnerable_range: String,
    },
    VersionUpgrade {
        target_version: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixKind {
    CvePatch,
    VersionUpgrade,
    None,
}
