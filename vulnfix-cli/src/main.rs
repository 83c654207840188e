mod config;
mod explain;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use config::{ConfigMerger, EnvContext, FixOverrides, ScanOverrides};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use vulnfix_core::adapters::{
    DirArtifactSink, GitHubPullRequests, HttpRegistry, ShellGitPort, ShellPackageManager,
};
use vulnfix_core::ports::PullRequestPort;
use vulnfix_core::{
    CuratedCatalog, HttpAlertSource, PolicyResolver, Ports, ToolError, run_fix, run_scan,
    write_fix_artifacts,
};
use vulnfix_domain::lockfile;
use vulnfix_domain::ports::ProjectDir;
use vulnfix_edit::RangeStyle;
use vulnfix_types::report::ToolInfo;

#[derive(Debug, Parser)]
#[command(
    name = "vulnfix",
    version,
    about = "Alert-driven remediation for vulnerable npm and pnpm dependencies."
)]
struct Cli {
    /// Log decisions as well as milestones (RUST_LOG takes precedence).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan the lockfile and fix every fixable vulnerable dependency.
    Fix(FixArgs),
    /// Scan the lockfile and list fixable alerts without changing anything.
    Scan(ScanArgs),
    /// Show how a manifest range would be rewritten for a target version.
    ExplainRange(ExplainRangeArgs),
}

#[derive(Debug, clap::Args)]
struct ScanFlags {
    /// Repository root (default: current directory).
    #[arg(long, default_value = ".")]
    repo_root: Utf8PathBuf,

    /// Base URL of the alert API.
    #[arg(long, env = "VULNFIX_API_URL")]
    api_url: Option<String>,

    /// Alert API token.
    #[arg(long, env = "VULNFIX_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Maximum number of alert requests in flight.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Keep scanning when a batch request fails.
    #[arg(long, default_value_t = false)]
    skip_failed_chunks: bool,

    /// Scan these purls instead of every package in the lockfile.
    #[arg(long = "purl")]
    purls: Vec<String>,
}

impl ScanFlags {
    fn overrides(&self) -> ScanOverrides {
        ScanOverrides {
            api_url: self.api_url.clone(),
            api_token: self.api_token.clone(),
            concurrency: self.concurrency,
            skip_failed_chunks: self.skip_failed_chunks,
            purls: self.purls.clone(),
        }
    }
}

#[derive(Debug, Parser)]
struct ScanArgs {
    #[command(flatten)]
    scan: ScanFlags,

    /// Output format (text, json).
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Parser)]
struct FixArgs {
    #[command(flatten)]
    scan: ScanFlags,

    /// Output directory for run artifacts (default: <repo_root>/artifacts/vulnfix).
    #[arg(long)]
    out_dir: Option<Utf8PathBuf>,

    /// How rewritten ranges are spelled (caret, tilde, gt, gte, lt, lte, pin, preserve).
    #[arg(long)]
    range_style: Option<RangeStyle>,

    /// Never pin transitive dependencies through root overrides.
    #[arg(long, default_value_t = false)]
    no_overrides: bool,

    /// Run the test script after each install.
    #[arg(long, default_value_t = false)]
    run_tests: bool,

    /// Package script used with --run-tests.
    #[arg(long)]
    test_script: Option<String>,

    /// Stop after this many successful fixes.
    #[arg(long)]
    limit: Option<usize>,

    /// Package registry for metadata and tarball URLs.
    #[arg(long)]
    registry: Option<String>,

    /// Prefix for published fix branches.
    #[arg(long)]
    branch_prefix: Option<String>,

    /// JSON catalog of curated replacement packages.
    #[arg(long)]
    curated_catalog: Option<Utf8PathBuf>,

    /// Fix locally even when the CI environment is detected.
    #[arg(long, default_value_t = false)]
    no_ci: bool,

    /// Do not enable auto-merge on opened pull requests.
    #[arg(long, default_value_t = false)]
    no_auto_merge: bool,

    /// Do not delete branches of closed pull requests.
    #[arg(long, default_value_t = false)]
    no_prune: bool,

    /// Exit with code 2 when any candidate could not be fixed.
    #[arg(long, default_value_t = false)]
    fail_on_unfixed: bool,
}

#[derive(Debug, Parser)]
struct ExplainRangeArgs {
    /// Range currently in the manifest (e.g. "^1.2.3").
    old: String,

    /// Version the range should move to.
    version: String,

    /// Show one style only.
    #[arg(long)]
    style: Option<RangeStyle>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match real_main(cli) {
        Ok(()) => ExitCode::from(0),
        Err(ToolError::PolicyBlock) => ExitCode::from(2),
        Err(ToolError::Internal(e)) => {
            error!("{:?}", e);
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn real_main(cli: Cli) -> Result<(), ToolError> {
    match cli.cmd {
        Command::ExplainRange(args) => cmd_explain_range(args).map_err(ToolError::from),
        Command::Scan(args) => block_on(cmd_scan(args)),
        Command::Fix(args) => block_on(cmd_fix(args)),
    }
}

fn block_on<F>(fut: F) -> Result<(), ToolError>
where
    F: Future<Output = Result<(), ToolError>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(fut)
}

/// Cancels the scan on Ctrl-C; the fix loop itself is not interruptible.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling scan");
            child.cancel();
        }
    });
    token
}

fn tool_info() -> ToolInfo {
    ToolInfo {
        name: "vulnfix".to_string(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
        repo: None,
        commit: None,
    }
}

async fn cmd_scan(args: ScanArgs) -> Result<(), ToolError> {
    let repo_root = args.scan.repo_root.clone();
    let file_config = config::load_or_default(&repo_root).context("load vulnfix.toml config")?;
    let merger = ConfigMerger::new(file_config);
    let settings = merger.merge_scan_args(&args.scan.overrides());
    debug!(api_url = %settings.api_url, concurrency = settings.concurrency, "merged scan config");

    let source = HttpAlertSource::new(settings.api_url.clone(), settings.api_token.clone())
        .context("build alert client")?;
    let policy = PolicyResolver::new(merger.policy());
    let outcome = run_scan(
        &repo_root,
        &settings,
        Arc::new(source),
        &policy,
        &cancel_on_ctrl_c(),
    )
    .await?;

    match args.format {
        OutputFormat::Text => {
            let informational = outcome.informational_count();
            if outcome.fix_map.is_empty() {
                println!("No fixable alerts in {} packages.", outcome.records.len());
                if informational > 0 {
                    println!("{informational} alerts have no fix.");
                }
                return Ok(());
            }
            println!("  {:<32} {:<22} {:<9} FIX", "PACKAGE", "ADVISORY", "SEVERITY");
            println!("  {:<32} {:<22} {:<9} ---", "-------", "--------", "--------");
            for (package, infos) in &outcome.fix_map {
                for info in infos {
                    println!(
                        "  {:<32} {:<22} {:<9} {} -> {}",
                        package,
                        info.advisory_id(),
                        format!("{:?}", info.severity).to_lowercase(),
                        info.vulnerable_range().unwrap_or_default(),
                        info.first_patched().unwrap_or("-"),
                    );
                }
            }
            if informational > 0 {
                println!();
                println!("{informational} more alerts have no fix:");
                for (package, infos) in &outcome.informational {
                    for info in infos {
                        println!("  {:<32} {}", package, info.advisory_id());
                    }
                }
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&serde_json::json!({
                "fixable": outcome.fix_map,
                "informational": outcome.informational,
            }))
            .context("serialize scan result")?;
            println!("{json}");
        }
    }
    Ok(())
}

async fn cmd_fix(args: FixArgs) -> Result<(), ToolError> {
    let repo_root = args.scan.repo_root.clone();
    let file_config = config::load_or_default(&repo_root).context("load vulnfix.toml config")?;
    let merger = ConfigMerger::new(file_config);
    let env = EnvContext::from_env();

    let cli = FixOverrides {
        repo_root: repo_root.clone(),
        out_dir: args.out_dir,
        range_style: args.range_style,
        no_overrides: args.no_overrides,
        run_tests: args.run_tests,
        test_script: args.test_script,
        limit: args.limit,
        registry: args.registry,
        branch_prefix: args.branch_prefix,
        curated_catalog: args.curated_catalog,
        no_auto_merge: args.no_auto_merge,
        no_prune: args.no_prune,
        no_ci: args.no_ci,
    };
    let settings = merger.merge_fix_args(&cli, &args.scan.overrides(), &env);
    settings.validate()?;
    debug!(
        range_style = %settings.range_style,
        write_overrides = settings.write_overrides,
        run_tests = settings.run_tests,
        limit = ?settings.limit,
        ci = settings.ci.is_some(),
        "merged fix config"
    );

    let catalog = match &settings.curated_catalog {
        Some(path) => CuratedCatalog::load(&repo_root.join(path)).context("load curated catalog")?,
        None => CuratedCatalog::default(),
    };
    let kind = lockfile::detect(&ProjectDir::new(repo_root.clone())).context("detect package manager")?;
    info!(agent = kind.agent(), "detected package manager");

    let source = HttpAlertSource::new(settings.scan.api_url.clone(), settings.scan.api_token.clone())
        .context("build alert client")?;
    let registry = HttpRegistry::new(settings.registry_url.clone()).context("build registry client")?;
    let package_manager = ShellPackageManager::new(kind);
    let git = ShellGitPort {
        author: merger.git_author(),
        ..ShellGitPort::default()
    };
    let pull_requests = match (&settings.ci, env.publishing()) {
        (Some(ci), Some((token, _))) => Some(
            GitHubPullRequests::new(env.github_api_url(), ci.repository.clone(), token)
                .context("build pull request client")?,
        ),
        _ => None,
    };
    let ports = Ports {
        registry: &registry,
        package_manager: &package_manager,
        git: &git,
        pull_requests: pull_requests.as_ref().map(|p| p as &dyn PullRequestPort),
    };

    let policy = PolicyResolver::new(merger.policy());
    let outcome = run_fix(
        &settings,
        Arc::new(source),
        &policy,
        ports,
        &catalog,
        tool_info(),
        &cancel_on_ctrl_c(),
    )
    .await?;

    let out_dir = repo_root.join(&settings.out_dir);
    write_fix_artifacts(&outcome, &DirArtifactSink::new(out_dir.clone()))
        .context("write run artifacts")?;
    info!("wrote run report to {}", out_dir);

    if args.fail_on_unfixed && outcome.has_unfixed {
        return Err(ToolError::PolicyBlock);
    }
    Ok(())
}

fn cmd_explain_range(args: ExplainRangeArgs) -> anyhow::Result<()> {
    let rows = explain::explain_range(&args.old, &args.version, args.style)?;
    println!("Range:   {}", args.old);
    println!("Target:  {}", args.version);
    println!();
    for row in rows {
        println!("  {:<10} {:<20} {}", row.style.as_str(), row.rewritten, row.note);
    }
    Ok(())
}
