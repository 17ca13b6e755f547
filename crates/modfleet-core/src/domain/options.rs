//! Per-run configuration.
//!
//! [`ActionOptions`] is built once (by the CLI or a test) and never mutated
//! while a run is in progress.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::domain::error::FleetError;

/// Branch names that are never deleted by the pipeline.
pub const PROTECTED_BRANCHES: &[&str] = &["master", "main", "develop", "staging", "beta", "prod"];

/// Commit/PR title used when no message is supplied.
pub const DEFAULT_COMMIT_TITLE: &str = "Update Mod Files";

/// Prefix applied to every commit and PR title.
pub const TITLE_PREFIX: &str = "modfleet: ";

/// The workflow a run executes over the sorted chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Print the sorted chain.
    List,
    /// Branch, regenerate manifests, commit, PR, tag.
    Sync,
    /// Checkout the branch (no creation) and pull.
    Pull,
    /// Append local filesystem replace directives.
    Replace,
    /// Restore manifest files from a reference branch.
    Reset,
    /// Pin, build, and run tests without committing.
    Test,
    /// Upload an encrypted secret to every repository.
    Secret,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Sync => "sync",
            Self::Pull => "pull",
            Self::Replace => "replace",
            Self::Reset => "reset",
            Self::Test => "test",
            Self::Secret => "secret",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list" => Ok(Self::List),
            "sync" => Ok(Self::Sync),
            "pull" => Ok(Self::Pull),
            "replace" | "replace-local" => Ok(Self::Replace),
            "reset" => Ok(Self::Reset),
            "test" => Ok(Self::Test),
            "secret" => Ok(Self::Secret),
            other => Err(FleetError::invalid("action", other)),
        }
    }
}

/// How a repository qualifies as a dependent of a filtered module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// The manifest (`go.mod`) names the module.
    Direct,
    /// The lock file (`go.sum`) resolves the module, directly or transitively.
    #[default]
    Recursive,
}

/// Output verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// Narrative suppressed; only identities of touched repositories are printed.
    NamesOnly,
    /// No output at all.
    Silent,
    Error,
    #[default]
    Normal,
    Debug,
}

impl Verbosity {
    /// Default tracing level, or `None` when logging is switched off.
    pub fn tracing_level(&self) -> Option<Level> {
        match self {
            Self::NamesOnly | Self::Silent => None,
            Self::Error => Some(Level::ERROR),
            Self::Normal => Some(Level::INFO),
            Self::Debug => Some(Level::DEBUG),
        }
    }

    /// Interactive prompts would block a run nobody is watching.
    pub fn allows_prompt(&self) -> bool {
        !matches!(self, Self::NamesOnly | Self::Silent)
    }

    pub fn is_names_only(&self) -> bool {
        matches!(self, Self::NamesOnly)
    }
}

impl FromStr for Verbosity {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NAME_ONLY" | "name-only" | "names-only" | "o" | "-1" => Ok(Self::NamesOnly),
            "SILENT" | "silent" | "s" | "0" => Ok(Self::Silent),
            "ERROR" | "error" | "e" | "1" => Ok(Self::Error),
            "NORMAL" | "normal" | "n" | "2" => Ok(Self::Normal),
            "DEBUG" | "debug" | "d" | "3" => Ok(Self::Debug),
            other => Err(FleetError::invalid("log level", other)),
        }
    }
}

/// A dependency filter entry: `module` or `module@version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyFilter {
    pub module: String,
    /// Expected version; used when the filter matches a repository directly.
    pub version: Option<String>,
}

impl DependencyFilter {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            version: None,
        }
    }

    /// Suffix match against a canonical identity.
    pub fn matches(&self, identity: &str) -> bool {
        !self.module.is_empty() && identity.ends_with(&self.module)
    }
}

impl FromStr for DependencyFilter {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (module, version) = match s.split_once('@') {
            Some((module, version)) => (module, Some(version)),
            None => (s, None),
        };
        if module.is_empty() || version.is_some_and(str::is_empty) {
            return Err(FleetError::invalid("dependency filter", s));
        }
        Ok(Self {
            module: module.to_string(),
            version: version.map(str::to_string),
        })
    }
}

impl fmt::Display for DependencyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{}", self.module, v),
            None => f.write_str(&self.module),
        }
    }
}

/// Immutable configuration for a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOptions {
    pub action: ActionKind,
    /// Branch to checkout (or create); `None` stays on the current branch.
    pub branch: Option<String>,
    pub commit_message: Option<String>,
    /// Deploy hidden local changes in a separate commit.
    pub commit: bool,
    pub tag: bool,
    pub pull_request: bool,
    pub import_mode: ImportMode,
    /// Explicit tag applied to every tagged repository.
    pub set_version: Option<String>,
    /// Secret payload file for the `secret` action.
    pub source_path: Option<PathBuf>,
    pub target_directories: Vec<PathBuf>,
    pub filters: Vec<DependencyFilter>,
    pub verbosity: Verbosity,
    /// Base branch for pull requests and branch pruning.
    pub trunk: String,
    /// Per-subprocess timeout; `None` waits indefinitely.
    pub command_timeout: Option<Duration>,
}

impl Default for ActionOptions {
    fn default() -> Self {
        Self {
            action: ActionKind::Sync,
            branch: None,
            commit_message: None,
            commit: false,
            tag: false,
            pull_request: false,
            import_mode: ImportMode::Recursive,
            set_version: None,
            source_path: None,
            target_directories: Vec::new(),
            filters: Vec::new(),
            verbosity: Verbosity::Normal,
            trunk: "master".to_string(),
            command_timeout: None,
        }
    }
}

impl ActionOptions {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            ..Self::default()
        }
    }

    /// Whether deleting `branch` is forbidden.
    pub fn is_protected(&self, branch: &str) -> bool {
        branch.is_empty() || branch == self.trunk || PROTECTED_BRANCHES.contains(&branch)
    }

    /// Title used for manifest commits and pull requests.
    pub fn commit_title(&self) -> String {
        let message = self
            .commit_message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(DEFAULT_COMMIT_TITLE);
        format!("{TITLE_PREFIX}{message}")
    }

    /// Whether this run needs hosting credentials up front.
    pub fn needs_credentials(&self) -> bool {
        (self.action == ActionKind::Sync && self.pull_request) || self.action == ActionKind::Secret
    }

    /// Human-readable summary of what a `sync` run will do, shown before
    /// asking for confirmation.
    pub fn describe(&self) -> String {
        let mut steps = vec![format!("{} action will:", self.action)];
        if let Some(branch) = &self.branch {
            steps.push(format!("- checkout (or create) branch {branch}"));
        }
        steps.push("- update mod files".to_string());
        if self.commit {
            steps.push("- commit local changes (if any)".to_string());
        }
        if self.pull_request {
            steps.push("- open pull request for changes (if any)".to_string());
        }
        if self.tag {
            match &self.set_version {
                Some(version) => steps.push(format!("- tag all dependencies {version}")),
                None => steps.push("- increment tag version (if updated)".to_string()),
            }
        }

        let filters = if self.filters.is_empty() {
            "all".to_string()
        } else {
            self.filters
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let dirs = if self.target_directories.is_empty() {
            ".".to_string()
        } else {
            self.target_directories
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "{}\n\nOn repositories: {filters}\nIn directories: {dirs}",
            steps.join("\n  ")
        )
    }
}
