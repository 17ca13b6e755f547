//! modfleet - dependency-ordered release tool for Go module repositories
//!
//! Discovers every repository under the target directories, sorts them so
//! dependencies come first, and runs one action across the chain.
//!
//! ## Actions
//!
//! - `list`: print the sorted chain
//! - `sync`: branch, regenerate mod files, commit, open PRs, tag
//! - `pull`: checkout the branch and pull
//! - `replace`: point dependencies at local checkouts
//! - `reset`: restore mod files from a branch
//! - `test`: pin, build, and run tests without committing
//! - `secret`: upload a file as a repository secret

mod prompt;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use modfleet_core::telemetry::init_tracing;
use modfleet_core::{
    ActionKind, ActionOptions, CredentialPrompt, CredentialStore, DependencyFilter, GoToolchain,
    HostingClient, ImportMode, Orchestrator, ReqwestTransport, Verbosity, API_URL_ENV,
};

use crate::prompt::{TerminalApproval, TerminalPrompt};
use crate::report::{format_chain, format_report, names_only};

#[derive(Parser, Debug)]
#[command(name = "modfleet")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Release a fleet of Go module repositories in dependency order", long_about = None)]
struct Cli {
    /// Action to run: list, sync, pull, replace, reset, test, secret
    action: ActionKind,

    /// Branch to checkout (created by sync when missing)
    #[arg(short, long, env = "MODFLEET_BRANCH")]
    branch: Option<String>,

    /// Commit message (also the pull request title)
    #[arg(short, long, env = "MODFLEET_MESSAGE")]
    message: Option<String>,

    /// Deploy local changes in a separate commit
    #[arg(short, long, env = "MODFLEET_COMMIT")]
    commit: bool,

    /// Tag repositories whose tag is behind HEAD
    #[arg(short, long, env = "MODFLEET_TAG")]
    tag: bool,

    /// Open a pull request for each updated repository
    #[arg(long, env = "MODFLEET_PR")]
    pr: bool,

    /// Only select repositories that import a filtered module directly
    #[arg(long, env = "MODFLEET_DIRECT")]
    direct: bool,

    /// Tag every tagged repository with this exact version
    #[arg(long = "set-version", env = "MODFLEET_SET_VERSION")]
    set_version: Option<String>,

    /// Secret payload file for the secret action
    #[arg(short, long, env = "MODFLEET_SOURCE")]
    source: Option<PathBuf>,

    /// Directory to search for repositories (repeatable; default: .)
    #[arg(short, long = "dir", env = "MODFLEET_DIRS", value_delimiter = ',')]
    dirs: Vec<PathBuf>,

    /// Dependency filter, `module` or `module@version` (repeatable)
    #[arg(short, long = "filter", env = "MODFLEET_FILTERS", value_delimiter = ',')]
    filters: Vec<DependencyFilter>,

    /// Verbosity: names-only, silent, error, normal, debug
    #[arg(short, long = "log-level", default_value = "normal", env = "MODFLEET_LOG_LEVEL")]
    log_level: Verbosity,

    /// Base branch for pull requests and branch pruning
    #[arg(long, default_value = "master", env = "MODFLEET_TRUNK")]
    trunk: String,

    /// Per-command timeout in seconds
    #[arg(long, env = "MODFLEET_TIMEOUT")]
    timeout: Option<u64>,

    /// Hosting API root (GitHub Enterprise)
    #[arg(long = "api-url", env = API_URL_ENV)]
    api_url: Option<String>,

    /// Skip the confirmation before sync
    #[arg(short, long)]
    yes: bool,

    /// Emit JSON log lines and a JSON report
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn options(&self) -> ActionOptions {
        ActionOptions {
            action: self.action,
            branch: self.branch.clone().filter(|b| !b.is_empty()),
            commit_message: self.message.clone(),
            commit: self.commit,
            tag: self.tag,
            pull_request: self.pr,
            import_mode: if self.direct {
                ImportMode::Direct
            } else {
                ImportMode::Recursive
            },
            set_version: self.set_version.clone(),
            source_path: self.source.clone(),
            target_directories: self.dirs.clone(),
            filters: self.filters.clone(),
            verbosity: self.log_level,
            trunk: self.trunk.clone(),
            command_timeout: self.timeout.map(Duration::from_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json, cli.log_level);

    let options = cli.options();
    debug!(?options, "Parsed options");
    let interactive = options.verbosity.allows_prompt();

    let prompt: Option<Arc<dyn CredentialPrompt>> = if interactive {
        Some(Arc::new(TerminalPrompt::default()))
    } else {
        None
    };
    let credentials = Arc::new(
        CredentialStore::at_default_location(prompt).context("Failed to locate credential file")?,
    );
    let transport =
        Arc::new(ReqwestTransport::new().context("Failed to build HTTP client")?);
    let mut client = HostingClient::new(transport, Arc::clone(&credentials));
    if let Some(url) = &cli.api_url {
        client = client.with_api_base(url.as_str());
    }

    let mut orchestrator = Orchestrator::new(
        options.clone(),
        Arc::new(GoToolchain::default()),
        Arc::new(client),
    )
    .with_credentials(credentials);
    if interactive && !cli.yes {
        orchestrator = orchestrator.with_approval(Arc::new(TerminalApproval::default()));
    }

    let report = orchestrator
        .run_until(interrupted())
        .await
        .with_context(|| format!("{} failed", options.action))?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        match options.verbosity {
            Verbosity::NamesOnly => {
                for identity in names_only(&options, &report) {
                    println!("{identity}");
                }
            }
            Verbosity::Silent => {}
            _ if options.action == ActionKind::List && !report.declined() => {
                print!("{}", format_chain(&report.chain));
            }
            _ => print!("{}", format_report(&options, &report)),
        }
    }

    let failed = report
        .pipeline
        .as_ref()
        .is_some_and(|p| !p.stats.failures.is_empty());
    if report.interrupted || failed {
        info!(interrupted = report.interrupted, failed, "Finished with problems");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Resolves on the first Ctrl-C. Never resolves if the handler cannot be
/// installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
