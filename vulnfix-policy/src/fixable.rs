//! Fixability filtering and per-package consolidation of alerts.

use crate::resolver::{AlertUx, PolicyResolver};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use vulnfix_types::alert::{ArtifactRecord, CompactAlert, FixDescriptor, Severity};

/// One alert reduced to what the fixer needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnInfo {
    pub alert_type: String,
    pub severity: Severity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ghsa_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cve_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<FixDescriptor>,

    pub ux: AlertUx,
}

impl VulnInfo {
    pub fn from_alert(alert: &CompactAlert, ux: AlertUx) -> Self {
        Self {
            alert_type: alert.alert_type.clone(),
            severity: alert.severity,
            ghsa_id: alert.props.ghsa_id.clone(),
            cve_id: alert.props.cve_id.clone(),
            fix: alert.fix_descriptor(),
            ux,
        }
    }

    /// Range of installed versions this alert applies to.
    ///
    /// An upgrade fix applies to everything below its target.
    pub fn vulnerable_range(&self) -> Option<String> {
        match &self.fix {
            Some(FixDescriptor::CvePatch {
                vulnerable_range, ..
            }) => Some(vulnerable_range.clone()),
            Some(FixDescriptor::VersionUpgrade { target_version }) => {
                Some(format!("<{target_version}"))
            }
            None => None,
        }
    }

    pub fn first_patched(&self) -> Option<&str> {
        match &self.fix {
            Some(FixDescriptor::CvePatch {
                first_patched_version,
                ..
            }) => Some(first_patched_version),
            Some(FixDescriptor::VersionUpgrade { target_version }) => Some(target_version),
            None => None,
        }
    }

    /// GHSA id, else CVE id, else the alert type.
    pub fn advisory_id(&self) -> &str {
        self.ghsa_id
            .as_deref()
            .or(self.cve_id.as_deref())
            .unwrap_or(&self.alert_type)
    }

    fn fix_version(&self) -> Option<Version> {
        self.first_patched()
            .and_then(|v| Version::parse(v.trim_start_matches('v')).ok())
    }
}

/// Fixable iff the alert carries a cve-patch or version-upgrade descriptor.
/// Upgrades are excluded for packages the manifest already overrides.
pub fn is_fixable(alert: &CompactAlert, package: &str, overridden: &BTreeSet<String>) -> bool {
    match alert.fix_descriptor() {
        Some(FixDescriptor::CvePatch { .. }) => true,
        Some(FixDescriptor::VersionUpgrade { .. }) => !overridden.contains(package),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Lane {
    Cve,
    Upgrade,
}

/// Keeps the highest cve fix and the highest upgrade per major line.
/// Alerts without a fix, and fixes whose version cannot be ranked, are all
/// kept after the ranked ones.
pub fn consolidate(infos: Vec<VulnInfo>) -> Vec<VulnInfo> {
    let mut best: BTreeMap<(Lane, u64), (Version, VulnInfo)> = BTreeMap::new();
    let mut unranked = Vec::new();

    for info in infos {
        let lane = match info.fix {
            Some(FixDescriptor::CvePatch { .. }) => Lane::Cve,
            Some(FixDescriptor::VersionUpgrade { .. }) => Lane::Upgrade,
            None => {
                unranked.push(info);
                continue;
            }
        };
        let Some(version) = info.fix_version() else {
            unranked.push(info);
            continue;
        };

        let key = (lane, version.major);
        match best.get(&key) {
            Some((kept, _)) if *kept >= version => {
                debug!(
                    dropped = info.advisory_id(),
                    "alert superseded by a higher fix on the same major"
                );
            }
            _ => {
                best.insert(key, (version, info));
            }
        }
    }

    best.into_values()
        .map(|(_, info)| info)
        .chain(unranked)
        .collect()
}

/// Consolidated alerts per package name, split by whether they can be fixed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertPlan {
    pub fixable: BTreeMap<String, Vec<VulnInfo>>,

    /// Alerts the policy surfaces that carry no usable fix. Their `fix` is
    /// cleared, including upgrades suppressed by a manual override.
    pub informational: BTreeMap<String, Vec<VulnInfo>>,
}

pub fn plan_alerts<'a>(
    records: impl IntoIterator<Item = &'a ArtifactRecord>,
    resolver: &PolicyResolver,
    overridden: &BTreeSet<String>,
) -> AlertPlan {
    let mut grouped: BTreeMap<String, Vec<VulnInfo>> = BTreeMap::new();

    for record in records {
        let package = record.package_name();
        for alert in &record.alerts {
            let ux = resolver.resolve_with_action(&alert.alert_type, alert.action);
            if !ux.is_relevant() {
                continue;
            }
            let mut info = VulnInfo::from_alert(alert, ux);
            if !is_fixable(alert, &package, overridden) {
                info.fix = None;
            }
            let bucket = grouped.entry(package.clone()).or_default();
            // the same advisory shows up once per installed version
            if !bucket.contains(&info) {
                bucket.push(info);
            }
        }
    }

    let mut plan = AlertPlan::default();
    for (name, infos) in grouped {
        let (fixable, informational): (Vec<VulnInfo>, Vec<VulnInfo>) =
            consolidate(infos).into_iter().partition(|i| i.fix.is_some());
        if !fixable.is_empty() {
            plan.fixable.insert(name.clone(), fixable);
        }
        if !informational.is_empty() {
            plan.informational.insert(name, informational);
        }
    }
    plan
}

/// Per package name, the consolidated fixable alerts the policy surfaces.
pub fn alerts_to_fix_map<'a>(
    records: impl IntoIterator<Item = &'a ArtifactRecord>,
    resolver: &PolicyResolver,
    overridden: &BTreeSet<String>,
) -> BTreeMap<String, Vec<VulnInfo>> {
    plan_alerts(records, resolver, overridden).fixable
}
