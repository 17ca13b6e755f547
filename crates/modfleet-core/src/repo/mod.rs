//! A single repository on disk.
//!
//! [`RepoHandle`] is immutable once created and is shared (via `Arc`) between
//! the pipeline worker and the cleanup tasks. Mutable per-run status lives in
//! the [`crate::graph::RepoRegistry`] that owns the pipeline's view.

mod command;
pub mod discovery;
mod git;
pub mod manifest;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use tracing::warn;

pub use command::CommandOutput;
pub use git::{next_patch_version, BranchSwitch, StashPopOutcome, STASH_MARKER};

/// Path segment that separates the workspace root from module identities.
pub const WORKSPACE_ROOT_MARKER: &str = "go/src";

/// A repository path plus its lazily derived module identity.
#[derive(Debug)]
pub struct RepoHandle {
    path: PathBuf,
    identity: OnceLock<String>,
    timeout: Option<Duration>,
}

impl RepoHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            identity: OnceLock::new(),
            timeout: None,
        }
    }

    /// Bound every subprocess this handle spawns.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Canonical module identity, e.g. `github.com/acme/core`.
    ///
    /// Falls back to the raw path (with a warning) when the absolute path
    /// does not contain the workspace root marker exactly once.
    pub fn identity(&self) -> &str {
        self.identity.get_or_init(|| match canonical_identity(&self.path) {
            Some(identity) => identity,
            None => {
                let raw = self.path.display().to_string();
                warn!(path = %raw, marker = WORKSPACE_ROOT_MARKER, "Could not derive module identity; using raw path");
                raw
            }
        })
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Plugin repositories are never tagged.
    pub fn is_plugin(&self) -> bool {
        self.name().ends_with("-plugin")
    }

    /// Whether the path holds a git metadata directory.
    pub fn is_repository(&self) -> bool {
        discovery::is_repository(&self.path)
    }
}

/// Derive `host/org/name` from an absolute path below the workspace root.
pub fn canonical_identity(path: &Path) -> Option<String> {
    let absolute = std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .ok()?;
    let absolute = absolute.to_string_lossy();
    let parts: Vec<&str> = absolute.split(WORKSPACE_ROOT_MARKER).collect();
    if parts.len() != 2 {
        return None;
    }
    let identity = parts[1].trim_matches('/');
    if identity.is_empty() {
        None
    } else {
        Some(identity.to_string())
    }
}
