//! Edits to `package.json` and rollback of the files a fix touches.
//!
//! - [`EditableManifest`] keeps key order and indentation and only writes on
//!   real change.
//! - [`rewrite`](rewrite::rewrite) moves a top-level dependency's range to a
//!   patched version; [`set_override`](overrides::set_override) pins a
//!   transitive one.
//! - [`FileSnapshot`] captures raw bytes so a failed attempt can be undone.

pub mod error;
pub mod manifest;
pub mod overrides;
pub mod range_style;
pub mod rewrite;
pub mod snapshot;

pub use error::{EditError, EditResult};
pub use manifest::{DEPENDENCY_SECTIONS, EditableManifest, MANIFEST_FILE};
pub use overrides::set_override;
pub use range_style::{RangeStyle, apply_range};
pub use rewrite::rewrite;
pub use snapshot::{FileSnapshot, file_diff, sha256_hex};
