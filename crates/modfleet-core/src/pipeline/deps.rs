//! Dependency collection, version pins, and manifest regeneration.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::ActionPipeline;
use crate::domain::error::{FleetError, Result};
use crate::graph::RepoId;
use crate::repo::manifest::{LOCK_FILE, MANIFEST_FILE};
use crate::repo::RepoHandle;
use crate::toolchain::ModuleTool;

/// Which earlier repositories count as dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyScope {
    /// Directly imported and carrying a version (or changed) this run.
    Pinned,
    /// Resolved directly or transitively, regardless of changes.
    Reachable,
}

/// A dependency requirement at an exact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pin {
    pub module: String,
    pub version: String,
    /// The dependency was updated or tagged during this run.
    pub fresh: bool,
}

impl Pin {
    /// Commit body line describing the pin.
    pub fn describe(&self) -> String {
        let verb = if self.fresh { "Updated" } else { "Set" };
        format!("{verb} {}@{}", self.module, self.version)
    }
}

/// Title plus one line per pin.
pub fn commit_message(title: &str, pins: &[Pin]) -> String {
    let body = commit_body(pins);
    if body.is_empty() {
        title.to_string()
    } else {
        format!("{title}\n\n{body}")
    }
}

pub fn commit_body(pins: &[Pin]) -> String {
    pins.iter()
        .map(Pin::describe)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rebuild the manifest and lock file from scratch.
///
/// Clears both files, re-initialises the module, pins every dependency, and
/// re-resolves the lock file. Individual pin failures are returned rather
/// than aborting; failing to initialise or tidy is an error.
pub async fn regenerate_manifest(
    repo: &RepoHandle,
    tool: &dyn ModuleTool,
    pins: &[Pin],
) -> Result<Vec<(String, FleetError)>> {
    repo.clear_manifest_files()?;
    tool.init(repo).await?;

    let mut failed = Vec::new();
    for pin in pins {
        debug!(repo = %repo.identity(), module = %pin.module, version = %pin.version, "Pinning");
        if let Err(e) = tool.pin(repo, &pin.module, &pin.version).await {
            failed.push((pin.module.clone(), e));
        }
    }

    tool.tidy(repo).await?;
    Ok(failed)
}

impl ActionPipeline {
    /// Earlier repositories in the chain that `id` depends on under `scope`.
    pub(crate) fn collect_dependencies(&self, id: RepoId, scope: DependencyScope) -> Vec<RepoId> {
        let repo = self.registry.handle(id);
        let Some(position) = self.chain.position(id) else {
            return Vec::new();
        };

        self.chain.order()[..position]
            .iter()
            .copied()
            .filter(|dep| {
                let record = self.registry.record(*dep);
                let module = record.handle.identity();
                let changed = record.status.has_update();
                match scope {
                    DependencyScope::Pinned => {
                        (changed || record.version.is_some()) && repo.imports_directly(module)
                    }
                    DependencyScope::Reachable => {
                        repo.resolves(module) || (changed && repo.imports_directly(module))
                    }
                }
            })
            .collect()
    }

    /// Versions to pin `deps` at: their resolved version, else their latest tag.
    ///
    /// Dependencies with neither are recorded as failures against `id`.
    pub(crate) async fn resolve_pins(&mut self, id: RepoId, deps: &[RepoId]) -> Vec<Pin> {
        let mut pins = Vec::with_capacity(deps.len());
        for dep in deps {
            let record = self.registry.record(*dep);
            let handle = Arc::clone(&record.handle);
            let fresh = record.status.updated || record.status.tagged;
            let version = match record.version.clone() {
                Some(version) => Some(version),
                None => handle.latest_tag().await.ok().flatten(),
            };
            let module = handle.identity().to_string();
            match version {
                Some(version) => pins.push(Pin {
                    module,
                    version,
                    fresh,
                }),
                None => self.fail(id, "pin", &FleetError::MissingVersion { module }),
            }
        }
        pins
    }

    /// Regenerate `id`'s manifest with `pins`. Returns `false` when the
    /// manifest could not be rebuilt; the committed files are restored then.
    pub(crate) async fn regenerate(&mut self, id: RepoId, repo: &RepoHandle, pins: &[Pin]) -> bool {
        info!(repo = %repo.identity(), pins = pins.len(), "Regenerating mod files");
        match regenerate_manifest(repo, self.tools.as_ref(), pins).await {
            Ok(failed) => {
                for (module, err) in failed {
                    self.fail(id, &format!("pin {module}"), &err);
                }
                true
            }
            Err(err) => {
                self.fail(id, "regenerate", &err);
                for file in [MANIFEST_FILE, LOCK_FILE] {
                    if let Err(e) = repo.restore_paths(Some("HEAD"), &[file]).await {
                        debug!(repo = %repo.identity(), file, error = %e, "Nothing to restore");
                    }
                }
                false
            }
        }
    }
}
