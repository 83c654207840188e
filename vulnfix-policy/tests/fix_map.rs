use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use vulnfix_policy::{
    PolicyResolver, PolicySettings, VulnInfo, alerts_to_fix_map, consolidate, plan_alerts,
};
use vulnfix_types::alert::{ArtifactRecord, FixDescriptor};

fn records() -> Vec<ArtifactRecord> {
    let raw = r#"[
      {"type":"npm","name":"lodash","version":"4.17.20","alerts":[
        {"type":"cve","severity":"high","props":{"ghsaId":"GHSA-1","firstPatchedVersionIdentifier":"4.17.19","vulnerableVersionRange":"<4.17.19"}},
        {"type":"cve","severity":"critical","props":{"ghsaId":"GHSA-2","firstPatchedVersionIdentifier":"4.17.21","vulnerableVersionRange":"<4.17.21"}},
        {"type":"deprecated","severity":"low"}
      ]},
      {"type":"npm","name":"left-pad","version":"1.0.0","alerts":[
        {"type":"upgrade","fix":{"type":"upgrade"},"props":{"upgradeVersion":"1.3.0"}}
      ]},
      {"type":"npm","name":"qs","version":"6.5.0","alerts":[
        {"type":"cve","action":"ignore","props":{"ghsaId":"GHSA-3","firstPatchedVersionIdentifier":"6.5.3","vulnerableVersionRange":"<6.5.3"}}
      ]}
    ]"#;
    serde_json::from_str(raw).unwrap()
}

#[test]
fn fix_map_consolidates_and_filters() {
    let resolver = PolicyResolver::new(PolicySettings::default());
    let map = alerts_to_fix_map(&records(), &resolver, &BTreeSet::new());

    assert_eq!(
        map.keys().cloned().collect::<Vec<_>>(),
        vec!["left-pad".to_string(), "lodash".to_string()]
    );
    let lodash = &map["lodash"];
    assert_eq!(lodash.len(), 1);
    assert_eq!(lodash[0].advisory_id(), "GHSA-2");
    assert_eq!(lodash[0].vulnerable_range().as_deref(), Some("<4.17.21"));
}

#[test]
fn manual_override_suppresses_upgrades_only() {
    let resolver = PolicyResolver::new(PolicySettings::default());
    let overridden: BTreeSet<String> = ["left-pad".to_string(), "lodash".to_string()].into();
    let map = alerts_to_fix_map(&records(), &resolver, &overridden);

    assert!(!map.contains_key("left-pad"));
    assert!(map.contains_key("lodash"));
}

#[test]
fn unfixable_alerts_are_reported_as_informational() {
    let resolver = PolicyResolver::new(PolicySettings::default());
    let overridden: BTreeSet<String> = ["left-pad".to_string()].into();
    let plan = plan_alerts(&records(), &resolver, &overridden);

    assert_eq!(
        plan.informational.keys().cloned().collect::<Vec<_>>(),
        vec!["left-pad".to_string(), "lodash".to_string()]
    );
    let lodash = &plan.informational["lodash"];
    assert_eq!(lodash.len(), 1);
    assert_eq!(lodash[0].alert_type, "deprecated");
    assert_eq!(plan.informational["left-pad"][0].fix, None);
    assert!(!plan.fixable.contains_key("left-pad"));
    // ignored by policy, so neither fixable nor informational
    assert!(!plan.informational.contains_key("qs"));
}

#[test]
fn policy_from_toml() {
    let settings: PolicySettings = toml::from_str(
        r#"
        [defaults]
        cve = "warn"
        deprecated = false

        [[entries]]
        start = "repo"

        [entries.scopes.repo]
        defer_to = "org"

        [entries.scopes.org.issue_rules]
        cve = { action = "ignore" }
        "#,
    )
    .unwrap();

    let resolver = PolicyResolver::new(settings);
    let ux = resolver.resolve("cve");
    assert!(!ux.block && !ux.display);
    assert!(resolver.resolve("malware").block);
}

fn arb_cve() -> impl Strategy<Value = VulnInfo> {
    (0u64..4, 0u64..20, 0u64..20).prop_map(|(major, minor, patch)| {
        let version = format!("{major}.{minor}.{patch}");
        VulnInfo {
            alert_type: "cve".to_string(),
            severity: Default::default(),
            ghsa_id: Some(format!("GHSA-{version}")),
            cve_id: None,
            fix: Some(FixDescriptor::CvePatch {
                first_patched_version: version.clone(),
                vulnerable_range: format!("<{version}"),
            }),
            ux: vulnfix_policy::AlertUx::ERROR,
        }
    })
}

proptest! {
    #[test]
    fn one_cve_fix_per_major_and_it_is_the_highest(infos in prop::collection::vec(arb_cve(), 0..30)) {
        let out = consolidate(infos.clone());

        let mut expected: BTreeMap<u64, semver::Version> = BTreeMap::new();
        for info in &infos {
            let v = semver::Version::parse(info.first_patched().unwrap()).unwrap();
            let slot = expected.entry(v.major).or_insert_with(|| v.clone());
            if v > *slot {
                *slot = v;
            }
        }

        prop_assert_eq!(out.len(), expected.len());
        for info in &out {
            let v = semver::Version::parse(info.first_patched().unwrap()).unwrap();
            prop_assert_eq!(expected.get(&v.major), Some(&v));
        }
    }
}
