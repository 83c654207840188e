use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vulnfix_types::alert::AlertAction;

/// Ordered policy entries plus org-wide defaults per alert type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySettings {
    #[serde(default)]
    pub entries: Vec<PolicyEntry>,

    #[serde(default)]
    pub defaults: BTreeMap<String, IssueRule>,
}

/// One policy source: a starting scope and the scopes it may defer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub start: String,

    #[serde(default)]
    pub scopes: BTreeMap<String, PolicyScope>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_to: Option<String>,

    #[serde(default)]
    pub issue_rules: BTreeMap<String, IssueRule>,
}

/// A rule is either a bare toggle, an action name or `{ action = ".." }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IssueRule {
    Enabled(bool),
    Named(AlertAction),
    Action { action: AlertAction },
}

impl IssueRule {
    pub fn action(self) -> AlertAction {
        match self {
            IssueRule::Enabled(true) => AlertAction::Error,
            IssueRule::Enabled(false) => AlertAction::Ignore,
            IssueRule::Named(action) | IssueRule::Action { action } => action,
        }
    }
}
