//! Clap-free settings for the scan and fix pipelines.

use anyhow::bail;
use camino::Utf8PathBuf;
use vulnfix_edit::RangeStyle;
use vulnfix_scan::{DEFAULT_CONCURRENCY, ScanErrorMode, ScanOptions};

pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";
pub const DEFAULT_API_URL: &str = "https://api.socket.dev/v0";
pub const DEFAULT_BRANCH_PREFIX: &str = "vulnfix";

/// Settings for the alert scan.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub api_url: String,
    pub api_token: Option<String>,
    pub concurrency: usize,
    pub error_mode: ScanErrorMode,

    /// Scan exactly these purls instead of everything in the lockfile.
    pub purls: Vec<String>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            concurrency: DEFAULT_CONCURRENCY,
            error_mode: ScanErrorMode::default(),
            purls: Vec::new(),
        }
    }
}

impl ScanSettings {
    pub fn options(&self) -> ScanOptions {
        ScanOptions {
            concurrency: self.concurrency,
            error_mode: self.error_mode,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency == 0 {
            bail!("scan concurrency must be at least 1");
        }
        if self.api_url.trim().is_empty() {
            bail!("scan api url must not be empty");
        }
        Ok(())
    }
}

/// Present when running as a CI bot that publishes pull requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiSettings {
    /// `owner/name` on the code host.
    pub repository: String,
    pub base_branch: String,
    pub auto_merge: bool,
    pub prune_stale_branches: bool,
}

/// Settings for the fix pipeline.
#[derive(Debug, Clone)]
pub struct FixSettings {
    pub repo_root: Utf8PathBuf,
    pub out_dir: Utf8PathBuf,
    pub registry_url: String,

    // Edits
    pub range_style: RangeStyle,
    pub write_overrides: bool,

    // Verification
    pub run_tests: bool,
    pub test_script: String,

    // Budget
    pub limit: Option<usize>,

    // Publishing
    pub branch_prefix: String,
    pub ci: Option<CiSettings>,

    /// Curated replacements catalog (JSON array).
    pub curated_catalog: Option<Utf8PathBuf>,

    pub scan: ScanSettings,
}

impl Default for FixSettings {
    fn default() -> Self {
        Self {
            repo_root: Utf8PathBuf::from("."),
            out_dir: Utf8PathBuf::from("artifacts/vulnfix"),
            registry_url: DEFAULT_REGISTRY.to_string(),
            range_style: RangeStyle::default(),
            write_overrides: true,
            run_tests: false,
            test_script: "test".to_string(),
            limit: None,
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            ci: None,
            curated_catalog: None,
            scan: ScanSettings::default(),
        }
    }
}

impl FixSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.scan.validate()?;
        if self.limit == Some(0) {
            bail!("limit must be at least 1 when set");
        }
        if self.branch_prefix.trim_matches('/').is_empty() {
            bail!("branch prefix must not be empty");
        }
        if self.run_tests && self.test_script.trim().is_empty() {
            bail!("test script must not be empty when tests are enabled");
        }
        if let Some(ci) = &self.ci {
            if !ci.repository.contains('/') {
                bail!("CI repository must be `owner/name`, got `{}`", ci.repository);
            }
            if ci.base_branch.is_empty() {
                bail!("CI base branch must not be empty");
            }
        }
        Ok(())
    }

    pub fn branch_prefix(&self) -> &str {
        self.branch_prefix.trim_matches('/')
    }
}
