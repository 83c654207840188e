use serde::{Deserialize, Serialize};

/// Terminal status of one fix attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Fixed,
    Failed,
    Skipped,
}

/// Stages a candidate passes through; recorded in order on the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStage {
    Discovered,
    PatchSelected,
    Installing,
    Tested,
    Fixed,
    Failed,
    Published,
    Reverted,
}

/// Why a candidate was skipped without being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CuratedReplacement,
    AlreadyApplied,
    ManifestUnchanged,
    LimitReached,
}

/// One (package, workspace) transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub package: String,

    /// Workspace path relative to the repo root; "." for the root workspace.
    pub workspace: String,

    pub old_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_spec: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_spec: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advisories: Vec<String>,

    #[serde(default)]
    pub stages: Vec<FixStage>,

    pub status: FixStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_diff: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchRecord>,
}

impl FixAttempt {
    pub fn discovered(package: &str, workspace: &str, old_version: &str) -> Self {
        Self {
            package: package.to_string(),
            workspace: workspace.to_string(),
            old_version: old_version.to_string(),
            target_version: None,
            old_spec: None,
            new_spec: None,
            advisories: vec![],
            stages: vec![FixStage::Discovered],
            status: FixStatus::Skipped,
            skip_reason: None,
            cause: None,
            manifest_diff: None,
            branch: None,
        }
    }

    pub fn enter(&mut self, stage: FixStage) {
        self.stages.push(stage);
    }

    pub fn fixed(&mut self) {
        self.enter(FixStage::Fixed);
        self.status = FixStatus::Fixed;
    }

    pub fn failed(&mut self, cause: impl Into<String>) {
        self.enter(FixStage::Failed);
        self.status = FixStatus::Failed;
        self.cause = Some(cause.into());
    }

    pub fn skipped(&mut self, reason: SkipReason) {
        self.status = FixStatus::Skipped;
        self.skip_reason = Some(reason);
    }

    pub fn reached(&self, stage: FixStage) -> bool {
        self.stages.contains(&stage)
    }
}

/// Lifecycle state of a fix branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BranchState {
    Created,
    Pushed,
    PrOpen,
    PrMerged,
    Stale,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub name: String,
    pub state: BranchState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

impl BranchRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: BranchState::Created,
            pr_number: None,
            pr_url: None,
        }
    }
}
