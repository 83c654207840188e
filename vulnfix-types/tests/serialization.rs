use pretty_assertions::assert_eq;
use vulnfix_types::alert::{
    AlertAction, AlertFixType, ArtifactRecord, FixDescriptor, FixKind, Severity,
};
use vulnfix_types::attempt::{BranchRecord, BranchState, FixAttempt, FixStage, FixStatus, SkipReason};
use vulnfix_types::report::{RunReport, ToolInfo};

fn tool() -> ToolInfo {
    ToolInfo {
        name: "vulnfix".to_string(),
        version: Some("0.0.0".to_string()),
        repo: None,
        commit: None,
    }
}

#[test]
fn compact_record_with_cve_patch_parses() {
    let line = r#"{
        "type": "npm",
        "name": "lodash",
        "version": "4.17.20",
        "alerts": [{
            "key": "QmX",
            "type": "cve",
            "severity": "high",
            "action": "error",
            "fix": { "type": "cve", "description": "bump" },
            "props": {
                "ghsaId": "GHSA-35jh-r3h4-6jhm",
                "firstPatchedVersionIdentifier": "4.17.21",
                "vulnerableVersionRange": "<4.17.21"
            }
        }]
    }"#;

    let record: ArtifactRecord = serde_json::from_str(line).expect("parse record");
    assert_eq!(record.package_name(), "lodash");
    assert_eq!(record.purl().to_string(), "pkg:npm/lodash@4.17.20");

    let alert = &record.alerts[0];
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.action, Some(AlertAction::Error));
    assert_eq!(alert.fix_kind(), FixKind::CvePatch);
    assert_eq!(
        alert.fix_descriptor(),
        Some(FixDescriptor::CvePatch {
            first_patched_version: "4.17.21".to_string(),
            vulnerable_range: "<4.17.21".to_string(),
        })
    );
}

#[test]
fn unknown_fix_type_and_missing_props_are_tolerated() {
    let line = r#"{
        "type": "npm",
        "namespace": "@acme",
        "name": "widget",
        "version": "1.0.0",
        "alerts": [{ "type": "deprecated", "fix": { "type": "somethingNew" } }]
    }"#;

    let record: ArtifactRecord = serde_json::from_str(line).expect("parse record");
    assert_eq!(record.package_name(), "@acme/widget");
    let alert = &record.alerts[0];
    assert_eq!(alert.fix.as_ref().map(|f| f.kind), Some(AlertFixType::Unknown));
    assert_eq!(alert.severity, Severity::Low);
    assert_eq!(alert.fix_kind(), FixKind::None);
}

#[test]
fn upgrade_fix_needs_target_version() {
    let with_target = r#"{
        "type": "upgrade-available",
        "fix": { "type": "upgrade" },
        "props": { "upgradeVersion": "2.3.4" }
    }"#;
    let without_target = r#"{ "type": "upgrade-available", "fix": { "type": "upgrade" } }"#;

    let a: vulnfix_types::alert::CompactAlert = serde_json::from_str(with_target).unwrap();
    let b: vulnfix_types::alert::CompactAlert = serde_json::from_str(without_target).unwrap();
    assert_eq!(a.fix_kind(), FixKind::VersionUpgrade);
    assert_eq!(b.fix_kind(), FixKind::None);
}

#[test]
fn severity_accepts_moderate_alias() {
    let sev: Severity = serde_json::from_str("\"moderate\"").unwrap();
    assert_eq!(sev, Severity::Middle);
    assert!(Severity::Critical > Severity::High);
}

#[test]
fn attempt_and_branch_states_serialize_stably() {
    assert_eq!(
        serde_json::to_value(FixStatus::Fixed).unwrap(),
        serde_json::json!("fixed")
    );
    assert_eq!(
        serde_json::to_value(BranchState::PrOpen).unwrap(),
        serde_json::json!("pr-open")
    );
    assert_eq!(
        serde_json::to_value(FixStage::PatchSelected).unwrap(),
        serde_json::json!("patch_selected")
    );
    assert_eq!(
        serde_json::to_value(SkipReason::ManifestUnchanged).unwrap(),
        serde_json::json!("manifest_unchanged")
    );
}

#[test]
fn attempt_omits_empty_optionals() {
    let attempt = FixAttempt::discovered("lodash", ".", "4.17.20");
    let value = serde_json::to_value(&attempt).expect("serialize");
    assert!(value.get("cause").is_none());
    assert!(value.get("branch").is_none());
    assert!(value.get("advisories").is_none());
    assert_eq!(value["stages"], serde_json::json!(["discovered"]));
}

#[test]
fn report_push_updates_summary() {
    let mut report = RunReport::new(tool());

    let mut fixed = FixAttempt::discovered("lodash", ".", "4.17.20");
    fixed.fixed();
    let mut failed = FixAttempt::discovered("minimist", ".", "1.2.0");
    failed.failed("install failed");
    let mut skipped = FixAttempt::discovered("qs", ".", "6.0.0");
    skipped.skipped(SkipReason::AlreadyApplied);

    report.push(fixed);
    report.push(failed);
    report.push(skipped);

    assert_eq!(report.summary.fixed, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.skipped, 1);
    assert!(report.has_failures());
    assert_eq!(report.schema, "vulnfix.report.v1");

    let json = serde_json::to_string(&report).expect("serialize");
    let back: RunReport = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back.attempts.len(), 3);
    assert_eq!(back.attempts[1].cause.as_deref(), Some("install failed"));
}

#[test]
fn branch_record_starts_created() {
    let record = BranchRecord::new("vulnfix/root/lodash-4.17.21");
    assert_eq!(record.state, BranchState::Created);
    assert!(record.pr_number.is_none());
}
