//! Batch vulnerability scanning against the alert API.

pub mod error;
pub mod http;
pub mod scanner;
pub mod source;

pub use error::ScanError;
pub use scanner::{BATCH_SIZE, DEFAULT_CONCURRENCY, ScanErrorMode, ScanOptions, collect_alerts, scan};
pub use source::{AlertSource, ChunkStream, HttpAlertSource};
