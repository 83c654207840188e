//! Decides which alerts matter and which of them can be fixed.
//!
//! - [`PolicyResolver`] maps an alert type to its block/display treatment.
//! - [`fixable`] filters and consolidates alerts into per-package fix work.

pub mod fixable;
pub mod resolver;
pub mod settings;

pub use fixable::{AlertPlan, VulnInfo, alerts_to_fix_map, consolidate, is_fixable, plan_alerts};
pub use resolver::{AlertUx, PolicyResolver};
pub use settings::{IssueRule, PolicyEntry, PolicyScope, PolicySettings};
