//! Path-keyed registry of discovered repositories.
//!
//! The registry owns one record per path and hands out [`RepoId`] handles.
//! The sorted chain and each repository's private dependency set are plain
//! sequences of those handles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::repo::RepoHandle;

/// Stable handle into a [`RepoRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoId(usize);

impl RepoId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Write-once status flags for the current run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepoStatus {
    pub updated: bool,
    pub tagged: bool,
    pub committed: bool,
    pub pr_opened: bool,
    pub branch_created: bool,
    pub test_failed: bool,
}

impl RepoStatus {
    /// Something dependents should pick up changed this run.
    pub fn has_update(&self) -> bool {
        self.updated || self.tagged || self.committed
    }

    /// Reported in names-only output.
    pub fn touched(&self) -> bool {
        self.has_update() || self.pr_opened
    }
}

/// A repository plus its mutable per-run state.
#[derive(Debug)]
pub struct RepoRecord {
    pub handle: Arc<RepoHandle>,
    pub status: RepoStatus,
    /// Version dependents pin to; set by a filter pin, a tag, or the latest tag.
    pub version: Option<String>,
    /// Earlier repositories this one pins, in chain order.
    pub dependencies: Vec<RepoId>,
}

/// Owner of every discovered repository, keyed by path.
#[derive(Debug, Default)]
pub struct RepoRegistry {
    records: Vec<RepoRecord>,
    by_path: HashMap<PathBuf, RepoId>,
    timeout: Option<Duration>,
}

impl RepoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subprocess timeout applied to handles registered afterwards.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register `path`, returning the existing handle when already present.
    pub fn register(&mut self, path: impl AsRef<Path>) -> RepoId {
        let key = normalize(path.as_ref());
        if let Some(id) = self.by_path.get(&key) {
            return *id;
        }
        let id = RepoId(self.records.len());
        let handle = RepoHandle::new(path.as_ref()).with_timeout(self.timeout);
        self.records.push(RepoRecord {
            handle: Arc::new(handle),
            status: RepoStatus::default(),
            version: None,
            dependencies: Vec::new(),
        });
        self.by_path.insert(key, id);
        id
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<RepoId> {
        self.by_path.get(&normalize(path.as_ref())).copied()
    }

    pub fn record(&self, id: RepoId) -> &RepoRecord {
        &self.records[id.0]
    }

    pub fn record_mut(&mut self, id: RepoId) -> &mut RepoRecord {
        &mut self.records[id.0]
    }

    pub fn handle(&self, id: RepoId) -> &Arc<RepoHandle> {
        &self.records[id.0].handle
    }

    pub fn identity(&self, id: RepoId) -> &str {
        self.records[id.0].handle.identity()
    }

    /// Shared handles for every registered repository, in registration order.
    pub fn handles(&self) -> Vec<Arc<RepoHandle>> {
        self.records.iter().map(|r| Arc::clone(&r.handle)).collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = RepoId> {
        (0..self.records.len()).map(RepoId)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("core");
        std::fs::create_dir(&repo).unwrap();

        let mut registry = RepoRegistry::new();
        let first = registry.register(&repo);
        let second = registry.register(dir.path().join("./core"));
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&repo), Some(first));
    }

    #[test]
    fn test_distinct_paths_get_distinct_ids() {
        let mut registry = RepoRegistry::new();
        let a = registry.register("/nonexistent/a");
        let b = registry.register("/nonexistent/b");
        assert_ne!(a, b);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(registry.handles().len(), 2);
    }

    #[test]
    fn test_status_helpers() {
        let mut status = RepoStatus::default();
        assert!(!status.touched());
        status.pr_opened = true;
        assert!(status.touched());
        assert!(!status.has_update());
        status.tagged = true;
        assert!(status.has_update());
    }
}
