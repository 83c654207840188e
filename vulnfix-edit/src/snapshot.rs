//! Whole-file snapshots used to roll back a failed fix.

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use diffy::PatchFormatter;
use fs_err as fs;
use sha2::{Digest, Sha256};
use tracing::debug;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Raw contents of a file at capture time; `None` when it did not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub path: Utf8PathBuf,
    pub contents: Option<String>,
    pub sha256: Option<String>,
}

impl FileSnapshot {
    pub fn capture(path: &Utf8Path) -> anyhow::Result<Self> {
        let contents = if path.exists() {
            Some(fs::read_to_string(path).with_context(|| format!("snapshot {path}"))?)
        } else {
            None
        };
        Ok(Self {
            path: path.to_path_buf(),
            sha256: contents.as_deref().map(|c| sha256_hex(c.as_bytes())),
            contents,
        })
    }

    /// Puts the file back as captured. Returns whether anything was written.
    pub fn restore(&self) -> anyhow::Result<bool> {
        let current = if self.path.exists() {
            Some(fs::read(&self.path).with_context(|| format!("read {}", self.path))?)
        } else {
            None
        };
        let current_sha = current.as_deref().map(sha256_hex);
        if current_sha == self.sha256 {
            return Ok(false);
        }

        match &self.contents {
            Some(text) => fs::write(&self.path, text).with_context(|| format!("restore {}", self.path))?,
            None => fs::remove_file(&self.path).with_context(|| format!("remove {}", self.path))?,
        }
        debug!(path = %self.path, "restored snapshot");
        Ok(true)
    }
}

/// Unified diff of one file, git-style headers, empty when unchanged.
pub fn file_diff(path: &str, before: &str, after: &str) -> String {
    if before == after {
        return String::new();
    }
    let mut out = String::new();
    out.push_str(&format!("diff --git a/{path} b/{path}\n"));
    out.push_str(&format!("--- a/{path}\n+++ b/{path}\n"));
    let patch = diffy::create_patch(before, after);
    out.push_str(&PatchFormatter::new().fmt_patch(&patch).to_string());
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}
