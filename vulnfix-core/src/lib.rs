//! Embeddable core library for vulnfix.
//!
//! Clap-free entry points for scanning a checkout and fixing the vulnerable
//! dependencies found in it.
//!
//! # Port traits
//!
//! All I/O is abstracted behind port traits in [`ports`]:
//! - [`RegistryPort`](ports::RegistryPort): package metadata
//! - [`PackageManagerPort`](ports::PackageManagerPort): install and test
//! - [`GitPort`](ports::GitPort): branches, commits, reset/clean
//! - [`PullRequestPort`](ports::PullRequestPort): pull requests and auto-merge
//! - [`ArtifactSink`](ports::ArtifactSink): run report output
//!
//! The [`adapters`] module provides the default HTTP and shell-backed
//! implementations. Alert scanning uses [`vulnfix_scan::AlertSource`].
//!
//! # Entry points
//!
//! - [`run_scan`](pipeline::run_scan): lockfile → alerts → fix map
//! - [`run_fix`](pipeline::run_fix): the full fix run, producing a report

pub mod adapters;
pub mod branches;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod ports;
pub mod settings;

pub use error::FixError;
pub use orchestrator::{Orchestrator, Ports};
pub use pipeline::{FixOutcome, ScanOutcome, ToolError, run_fix, run_scan, write_fix_artifacts};
pub use settings::{CiSettings, FixSettings, ScanSettings};

// Re-exported so embedders don't need the lower crates directly.
pub use vulnfix_domain::CuratedCatalog;
pub use vulnfix_policy::{PolicyResolver, PolicySettings};
pub use vulnfix_scan::{AlertSource, HttpAlertSource};
