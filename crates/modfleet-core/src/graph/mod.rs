//! Dependency-ordered chain of repositories.
//!
//! The chain is built by repeated insertion: a repository goes immediately
//! before the first repository whose lock file resolves it, or at the tail.
//! Because lock files carry the transitive closure of a module's
//! requirements, this keeps every repository ahead of all its dependents.
//! Each insertion is a linear scan, so building the chain is quadratic in
//! the number of repositories.

mod registry;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::domain::options::{DependencyFilter, ImportMode};
use crate::repo::discovery::is_repository;

pub use registry::{RepoId, RepoRecord, RepoRegistry, RepoStatus};

/// Repositories in dependency order: dependencies first.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<RepoId>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id` before the first repository that depends on it.
    ///
    /// Returns `false` when `id` is already in the chain.
    pub fn insert(&mut self, registry: &RepoRegistry, id: RepoId) -> bool {
        if self.order.contains(&id) {
            return false;
        }
        let module = registry.identity(id);
        let position = self
            .order
            .iter()
            .position(|existing| registry.handle(*existing).resolves(module));
        match position {
            Some(index) => self.order.insert(index, id),
            None => self.order.push(id),
        }
        true
    }

    /// Register every candidate repository and chain the selected ones.
    ///
    /// Non-repositories are skipped. With filters, a repository is selected
    /// when its identity matches a filter by suffix (taking the filter's
    /// pinned version) or when it depends on a filtered module according to
    /// `mode`. Every repository is registered whether or not it is selected.
    pub fn build(
        registry: &mut RepoRegistry,
        candidates: &[PathBuf],
        filters: &[DependencyFilter],
        mode: ImportMode,
    ) -> Self {
        let mut graph = Self::new();
        for path in candidates {
            if !is_repository(path) {
                debug!(path = %path.display(), "Not a repository; skipping");
                continue;
            }
            let id = registry.register(path);
            if select(registry, id, filters, mode) {
                graph.insert(registry, id);
            } else {
                debug!(repo = %registry.identity(id), "Filtered out");
            }
        }
        graph
    }

    pub fn order(&self) -> &[RepoId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = RepoId> + '_ {
        self.order.iter().copied()
    }

    pub fn position(&self, id: RepoId) -> Option<usize> {
        self.order.iter().position(|existing| *existing == id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Canonical identities in chain order.
    pub fn identities(&self, registry: &RepoRegistry) -> Vec<String> {
        self.order
            .iter()
            .map(|id| registry.identity(*id).to_string())
            .collect()
    }
}

fn select(
    registry: &mut RepoRegistry,
    id: RepoId,
    filters: &[DependencyFilter],
    mode: ImportMode,
) -> bool {
    if filters.is_empty() {
        return true;
    }
    let handle = Arc::clone(registry.handle(id));
    if let Some(filter) = filters.iter().find(|f| f.matches(handle.identity())) {
        if let Some(version) = &filter.version {
            registry.record_mut(id).version = Some(version.clone());
        }
        return true;
    }
    filters.iter().any(|f| handle.depends_on(&f.module, mode))
}
