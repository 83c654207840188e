use crate::attempt::{BranchRecord, FixAttempt, FixStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub scanned: u64,
    pub fixable_packages: u64,

    /// Surfaced alerts with no usable fix.
    #[serde(default)]
    pub informational: u64,

    pub fixed: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Serialisable outcome of one `vulnfix fix` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub schema: String,
    pub tool: ToolInfo,

    #[serde(default)]
    pub run: RunInfo,

    #[serde(default)]
    pub ci: bool,

    pub summary: RunSummary,

    #[serde(default)]
    pub attempts: Vec<FixAttempt>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pruned_branches: Vec<BranchRecord>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn new(tool: ToolInfo) -> Self {
        Self {
            schema: crate::schema::VULNFIX_REPORT_V1.to_string(),
            tool,
            run: RunInfo::default(),
            ci: false,
            summary: RunSummary::default(),
            attempts: vec![],
            pruned_branches: vec![],
            errors: vec![],
        }
    }

    /// Records an attempt and keeps the summary counters in step.
    pub fn push(&mut self, attempt: FixAttempt) {
        match attempt.status {
            FixStatus::Fixed => self.summary.fixed += 1,
            FixStatus::Failed => self.summary.failed += 1,
            FixStatus::Skipped => self.summary.skipped += 1,
        }
        self.attempts.push(attempt);
    }

    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }
}
