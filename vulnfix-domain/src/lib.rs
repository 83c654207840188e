//! Dependency graph model and the pure decisions made on it.
//!
//! Everything here is synchronous and side-effect free apart from reading
//! files through [`ports::ProjectView`]: loading lockfiles into a
//! [`tree::DependencyTree`], npm range matching, picking a patch version and
//! updating a node in place.

pub mod curated;
pub mod error;
pub mod json_text;
pub mod lockfile;
pub mod mutate;
pub mod packument;
pub mod ports;
pub mod range;
pub mod select;
pub mod tree;

pub use curated::{CuratedCatalog, CuratedManifest};
pub use error::{LockfileError, TreeError};
pub use mutate::update_node;
pub use packument::{Packument, VersionMetadata};
pub use range::{NpmRange, Operator, RangeError};
pub use select::{SelectRequest, select_patch_version};
pub use tree::{DependencyTree, EdgeKind, NodeId};
