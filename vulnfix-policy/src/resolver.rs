use crate::settings::{IssueRule, PolicyEntry, PolicySettings};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};
use vulnfix_types::alert::AlertAction;

/// How an alert type is surfaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertUx {
    pub block: bool,
    pub display: bool,
}

impl AlertUx {
    pub const ERROR: AlertUx = AlertUx {
        block: true,
        display: true,
    };

    /// `None` for `defer`, which means "no rule here".
    pub fn for_action(action: AlertAction) -> Option<AlertUx> {
        match action {
            AlertAction::Error => Some(AlertUx::ERROR),
            AlertAction::Warn => Some(AlertUx {
                block: false,
                display: true,
            }),
            AlertAction::Ignore | AlertAction::Monitor => Some(AlertUx::default()),
            AlertAction::Defer => None,
        }
    }

    pub fn merge(self, other: AlertUx) -> AlertUx {
        AlertUx {
            block: self.block || other.block,
            display: self.display || other.display,
        }
    }

    pub fn is_relevant(self) -> bool {
        self.block || self.display
    }
}

/// Resolves alert types against policy entries, memoizing per type.
#[derive(Debug)]
pub struct PolicyResolver {
    settings: PolicySettings,
    memo: Mutex<HashMap<String, AlertUx>>,
}

impl PolicyResolver {
    pub fn new(settings: PolicySettings) -> Self {
        Self {
            settings,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, alert_type: &str) -> AlertUx {
        if let Some(ux) = self
            .memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(alert_type)
        {
            return *ux;
        }

        let ux = self.compute(alert_type);
        debug!(alert_type, block = ux.block, display = ux.display, "resolved alert policy");
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(alert_type.to_string(), ux);
        ux
    }

    /// Treatment for an alert whose action may already be decided upstream.
    pub fn resolve_with_action(&self, alert_type: &str, action: Option<AlertAction>) -> AlertUx {
        action
            .and_then(AlertUx::for_action)
            .unwrap_or_else(|| self.resolve(alert_type))
    }

    fn default_ux(&self, alert_type: &str) -> AlertUx {
        self.settings
            .defaults
            .get(alert_type)
            .map(|rule| rule.action())
            .and_then(AlertUx::for_action)
            .unwrap_or(AlertUx::ERROR)
    }

    fn compute(&self, alert_type: &str) -> AlertUx {
        if self.settings.entries.is_empty() {
            return self.default_ux(alert_type);
        }
        self.settings
            .entries
            .iter()
            .map(|entry| {
                walk_chain(entry, alert_type).unwrap_or_else(|| self.default_ux(alert_type))
            })
            .fold(AlertUx::default(), AlertUx::merge)
    }
}

fn walk_chain(entry: &PolicyEntry, alert_type: &str) -> Option<AlertUx> {
    let mut visited = BTreeSet::new();
    let mut current = Some(entry.start.as_str());

    while let Some(scope_id) = current {
        if !visited.insert(scope_id) {
            warn!(scope = scope_id, alert_type, "policy deferral cycle; using default");
            return None;
        }
        let scope = entry.scopes.get(scope_id)?;
        if let Some(ux) = scope
            .issue_rules
            .get(alert_type)
            .copied()
            .map(IssueRule::action)
            .and_then(AlertUx::for_action)
        {
            return Some(ux);
        }
        current = scope.defer_to.as_deref();
    }
    None
}
