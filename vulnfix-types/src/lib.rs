//! Shared DTOs (schemas-as-code) for the vulnfix workspace.
//!
//! # Design constraints
//! - Alert records are read from a remote API; be tolerant of missing or extra fields.
//! - Attempt and report types are written to disk.
//! - Prefer adding optional fields over changing semantics.

pub mod alert;
pub mod attempt;
pub mod purl;
pub mod report;

/// Schema identifiers.
pub mod schema {
    pub const VULNFIX_REPORT_V1: &str = "vulnfix.report.v1";
}
