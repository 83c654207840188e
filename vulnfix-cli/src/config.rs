//! Configuration file loading for vulnfix.
//!
//! Discovers and loads `vulnfix.toml` from the repository root, reads the CI
//! environment, and merges both with CLI arguments (CLI takes precedence).

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use serde::Deserialize;
use tracing::debug;
use vulnfix_core::adapters::GitAuthor;
use vulnfix_core::settings::DEFAULT_API_URL;
use vulnfix_core::{CiSettings, FixSettings, PolicySettings, ScanSettings};
use vulnfix_edit::RangeStyle;
use vulnfix_scan::ScanErrorMode;

/// The config file name to search for.
pub const CONFIG_FILE_NAME: &str = "vulnfix.toml";

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Top-level configuration from vulnfix.toml.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VulnfixConfig {
    pub fix: FixConfig,
    pub scan: ScanConfig,
    pub git: GitConfig,

    /// Alert policy entries and org defaults.
    pub policy: PolicySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FixConfig {
    pub range_style: Option<RangeStyle>,

    /// Pin vulnerable transitive dependencies through root overrides.
    pub write_overrides: Option<bool>,

    pub run_tests: bool,
    pub test_script: Option<String>,
    pub limit: Option<usize>,
    pub registry: Option<String>,

    /// Relative to the repo root.
    pub curated_catalog: Option<Utf8PathBuf>,
    pub out_dir: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub api_url: Option<String>,
    pub concurrency: Option<usize>,
    pub error_mode: Option<ScanErrorMode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub branch_prefix: Option<String>,

    /// Used when the environment names no base branch.
    pub base_branch: Option<String>,

    pub auto_merge: bool,
    pub prune_stale_branches: bool,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            branch_prefix: None,
            base_branch: None,
            auto_merge: true,
            prune_stale_branches: true,
            author_name: None,
            author_email: None,
        }
    }
}

impl GitConfig {
    pub fn author(&self) -> Option<GitAuthor> {
        Some(GitAuthor {
            name: self.author_name.clone()?,
            email: self.author_email.clone()?,
        })
    }
}

/// Discover the vulnfix.toml config file in the repository root.
pub fn discover_config(repo_root: &Utf8Path) -> Option<Utf8PathBuf> {
    let config_path = repo_root.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        debug!(path = %config_path, "found config file");
        Some(config_path)
    } else {
        debug!(path = %config_path, "no config file");
        None
    }
}

pub fn load_config(path: &Utf8Path) -> anyhow::Result<VulnfixConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read config file {path}"))?;
    parse_config(&contents).with_context(|| format!("parse config file {path}"))
}

pub fn parse_config(contents: &str) -> anyhow::Result<VulnfixConfig> {
    let config: VulnfixConfig = toml::from_str(contents).context("invalid TOML")?;
    Ok(config)
}

/// Load config from repo root, or return default if not found.
pub fn load_or_default(repo_root: &Utf8Path) -> anyhow::Result<VulnfixConfig> {
    match discover_config(repo_root) {
        Some(path) => load_config(&path),
        None => Ok(VulnfixConfig::default()),
    }
}

/// What the CI environment says about where we run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvContext {
    pub ci: bool,
    pub github_token: Option<String>,
    pub repository: Option<String>,
    pub base_ref: Option<String>,
    pub github_api_url: Option<String>,
}

impl EnvContext {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let ci = get("CI").is_some_and(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false"));
        Self {
            ci,
            github_token: get("GITHUB_TOKEN"),
            repository: get("GITHUB_REPOSITORY"),
            // pull_request events set the base ref; pushes only the ref name
            base_ref: get("GITHUB_BASE_REF").or_else(|| get("GITHUB_REF_NAME")),
            github_api_url: get("GITHUB_API_URL"),
        }
    }

    /// Token and repository for publishing, when running as a CI bot.
    pub fn publishing(&self) -> Option<(&str, &str)> {
        if !self.ci {
            return None;
        }
        Some((self.github_token.as_deref()?, self.repository.as_deref()?))
    }

    pub fn github_api_url(&self) -> &str {
        self.github_api_url.as_deref().unwrap_or(DEFAULT_GITHUB_API_URL)
    }
}

/// Scan flags as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ScanOverrides {
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub concurrency: Option<usize>,
    pub skip_failed_chunks: bool,
    pub purls: Vec<String>,
}

/// Fix flags as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct FixOverrides {
    pub repo_root: Utf8PathBuf,
    pub out_dir: Option<Utf8PathBuf>,
    pub range_style: Option<RangeStyle>,
    pub no_overrides: bool,
    pub run_tests: bool,
    pub test_script: Option<String>,
    pub limit: Option<usize>,
    pub registry: Option<String>,
    pub branch_prefix: Option<String>,
    pub curated_catalog: Option<Utf8PathBuf>,
    pub no_auto_merge: bool,
    pub no_prune: bool,
    pub no_ci: bool,
}

/// Builder for merging config file with CLI arguments.
pub struct ConfigMerger {
    config: VulnfixConfig,
}

impl ConfigMerger {
    pub fn new(config: VulnfixConfig) -> Self {
        Self { config }
    }

    pub fn policy(&self) -> PolicySettings {
        self.config.policy.clone()
    }

    pub fn git_author(&self) -> Option<GitAuthor> {
        self.config.git.author()
    }

    pub fn merge_scan_args(&self, cli: &ScanOverrides) -> ScanSettings {
        let file = &self.config.scan;
        let defaults = ScanSettings::default();
        let error_mode = if cli.skip_failed_chunks {
            ScanErrorMode::SkipAndContinue
        } else {
            file.error_mode.unwrap_or(defaults.error_mode)
        };
        ScanSettings {
            api_url: cli
                .api_url
                .clone()
                .or_else(|| file.api_url.clone())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_token: cli.api_token.clone(),
            concurrency: cli.concurrency.or(file.concurrency).unwrap_or(defaults.concurrency),
            error_mode,
            purls: cli.purls.clone(),
        }
    }

    /// CLI booleans only ever switch behavior on (or, for the `no_*`
    /// flags, off) relative to the config file.
    pub fn merge_fix_args(&self, cli: &FixOverrides, scan: &ScanOverrides, env: &EnvContext) -> FixSettings {
        let fix = &self.config.fix;
        let git = &self.config.git;
        let defaults = FixSettings::default();

        let ci = match env.publishing() {
            Some((_, repository)) if !cli.no_ci => Some(CiSettings {
                repository: repository.to_string(),
                base_branch: env
                    .base_ref
                    .clone()
                    .or_else(|| git.base_branch.clone())
                    .unwrap_or_else(|| "main".to_string()),
                auto_merge: git.auto_merge && !cli.no_auto_merge,
                prune_stale_branches: git.prune_stale_branches && !cli.no_prune,
            }),
            _ => None,
        };

        FixSettings {
            repo_root: cli.repo_root.clone(),
            out_dir: cli
                .out_dir
                .clone()
                .or_else(|| fix.out_dir.clone())
                .unwrap_or(defaults.out_dir),
            registry_url: cli
                .registry
                .clone()
                .or_else(|| fix.registry.clone())
                .unwrap_or(defaults.registry_url),
            range_style: cli.range_style.or(fix.range_style).unwrap_or(defaults.range_style),
            write_overrides: !cli.no_overrides && fix.write_overrides.unwrap_or(defaults.write_overrides),
            run_tests: cli.run_tests || fix.run_tests,
            test_script: cli
                .test_script
                .clone()
                .or_else(|| fix.test_script.clone())
                .unwrap_or(defaults.test_script),
            limit: cli.limit.or(fix.limit),
            branch_prefix: cli
                .branch_prefix
                .clone()
                .or_else(|| git.branch_prefix.clone())
                .unwrap_or(defaults.branch_prefix),
            ci,
            curated_catalog: cli.curated_catalog.clone().or_else(|| fix.curated_catalog.clone()),
            scan: self.merge_scan_args(scan),
        }
    }
}
