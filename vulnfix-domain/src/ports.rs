use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;

/// Read access to a project checkout (the directory holding the root
/// `package.json` and its lockfile).
pub trait ProjectView {
    fn root(&self) -> &Utf8Path;

    fn read_to_string(&self, rel: &Utf8Path) -> anyhow::Result<String>;

    fn exists(&self, rel: &Utf8Path) -> bool;

    /// First of `names` present at the project root.
    fn first_present(&self, names: &[&str]) -> Option<Utf8PathBuf> {
        names
            .iter()
            .map(Utf8PathBuf::from)
            .find(|rel| self.exists(rel))
    }
}

/// Project checkout on disk.
#[derive(Debug, Clone)]
pub struct ProjectDir {
    root: Utf8PathBuf,
}

impl ProjectDir {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, rel: &Utf8Path) -> Utf8PathBuf {
        if rel.is_absolute() {
            rel.to_path_buf()
        } else {
            self.root.join(rel)
        }
    }
}

impl ProjectView for ProjectDir {
    fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn read_to_string(&self, rel: &Utf8Path) -> anyhow::Result<String> {
        let path = self.path(rel);
        fs::read_to_string(&path).with_context(|| format!("read {path}"))
    }

    fn exists(&self, rel: &Utf8Path) -> bool {
        self.path(rel).is_file()
    }
}
