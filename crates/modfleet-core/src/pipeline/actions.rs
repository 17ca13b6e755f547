//! The `pull`, `replace`, `reset`, `test`, and `secret` actions.

use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::deps::DependencyScope;
use super::{proceed, ActionPipeline};
use crate::cancel::CancelToken;
use crate::domain::error::{FleetError, Result};
use crate::graph::RepoId;
use crate::hosting::secret_name;
use crate::repo::manifest::{LOCK_FILE, MANIFEST_FILE};
use crate::toolchain::{BuildMode, TestRun};

impl ActionPipeline {
    /// Checkout the target branch (never created here) and pull.
    pub(super) async fn pull(&mut self, id: RepoId, cancel: &CancelToken) -> ControlFlow<()> {
        if self.skip_if_pinned(id) {
            return ControlFlow::Continue(());
        }
        let repo = Arc::clone(self.registry.handle(id));

        if let Err(e) = repo.stash().await {
            self.fail(id, "stash", &e);
            return ControlFlow::Continue(());
        }
        proceed(cancel)?;

        if let Some(branch) = self.options.branch.clone() {
            if let Err(e) = repo.checkout(&branch).await {
                self.fail(id, "checkout", &e);
                return ControlFlow::Continue(());
            }
        }
        proceed(cancel)?;

        match repo.pull().await {
            Ok(()) => {
                info!(repo = %repo.identity(), "Pulled latest changes");
                let identity = self.identity(id);
                self.stats.record_updated(&identity);
                self.status_mut(id).updated = true;
            }
            Err(e) => self.fail(id, "pull", &e),
        }
        ControlFlow::Continue(())
    }

    /// Point every reachable earlier repository at its local checkout.
    pub(super) async fn replace(&mut self, id: RepoId, cancel: &CancelToken) -> ControlFlow<()> {
        let repo = Arc::clone(self.registry.handle(id));

        if let Err(e) = repo.stash().await {
            self.fail(id, "stash", &e);
            return ControlFlow::Continue(());
        }
        proceed(cancel)?;

        if !repo.has_manifest() {
            info!(repo = %repo.identity(), "Not a tracked module; skipping");
            return ControlFlow::Continue(());
        }

        let deps = self.collect_dependencies(id, DependencyScope::Reachable);
        if deps.is_empty() {
            info!(repo = %repo.identity(), "No deps in chain to replace");
            return ControlFlow::Continue(());
        }
        self.registry.record_mut(id).dependencies = deps.clone();

        let replacements: Vec<_> = deps
            .iter()
            .map(|dep| {
                let handle = self.registry.handle(*dep);
                let path = std::fs::canonicalize(handle.path())
                    .unwrap_or_else(|_| handle.path().to_path_buf());
                (handle.identity().to_string(), path)
            })
            .collect();
        proceed(cancel)?;

        let replaced: Result<()> = async {
            repo.append_replace_directives(&replacements)?;
            repo.remove_lock_file()?;
            self.tools.tidy(&repo).await
        }
        .await;

        match replaced {
            Ok(()) => {
                info!(repo = %repo.identity(), count = replacements.len(), "Replaced local deps");
                let identity = self.identity(id);
                self.stats.record_updated(&identity);
                self.status_mut(id).updated = true;
            }
            Err(e) => self.fail(id, "replace", &e),
        }
        ControlFlow::Continue(())
    }

    /// Discard mod file edits back to the target branch (or HEAD).
    pub(super) async fn reset(&mut self, id: RepoId) -> ControlFlow<()> {
        let repo = Arc::clone(self.registry.handle(id));

        if let Err(e) = repo.stash_pop().await {
            self.fail(id, "stash-pop", &e);
        }

        let reference = self.options.branch.as_deref().unwrap_or("HEAD");
        for file in [MANIFEST_FILE, LOCK_FILE] {
            if let Err(e) = repo.restore_paths(Some(reference), &[file]).await {
                debug!(repo = %repo.identity(), file, error = %e, "Could not restore file");
            }
        }

        match repo.has_changes().await {
            Ok(true) => {
                warn!(repo = %repo.identity(), "Has local changes");
                let identity = self.identity(id);
                self.stats.record_dirty(&identity);
            }
            Ok(false) => info!(repo = %repo.identity(), "Reset mod files"),
            Err(e) => self.fail(id, "status", &e),
        }
        ControlFlow::Continue(())
    }

    /// Apply pins without committing, compile, and run the test suite.
    pub(super) async fn test(&mut self, id: RepoId, cancel: &CancelToken) -> ControlFlow<()> {
        let repo = Arc::clone(self.registry.handle(id));

        if let Err(e) = repo.stash_pop().await {
            self.fail(id, "stash-pop", &e);
        }

        let deps = self.collect_dependencies(id, DependencyScope::Pinned);
        self.registry.record_mut(id).dependencies = deps.clone();
        let pins = self.resolve_pins(id, &deps).await;
        for pin in &pins {
            if let Err(e) = self.tools.pin(&repo, &pin.module, &pin.version).await {
                self.fail(id, &format!("pin {}", pin.module), &e);
            }
        }
        proceed(cancel)?;

        info!(repo = %repo.identity(), "Building");
        if let Err(standard) = self.tools.build(&repo, BuildMode::Standard).await {
            debug!(repo = %repo.identity(), error = %standard, "Standard build failed; trying plugin mode");
            if let Err(e) = self.tools.build(&repo, BuildMode::Plugin).await {
                self.record_test_failure(id, "build", &e);
                return ControlFlow::Continue(());
            }
        }
        proceed(cancel)?;

        info!(repo = %repo.identity(), "Running tests");
        match self.tools.test(&repo).await {
            Ok(TestRun::Passed) => info!(repo = %repo.identity(), "Tests passed"),
            Ok(TestRun::NoTests) => info!(repo = %repo.identity(), "No tests to run"),
            Ok(TestRun::Failed(output)) => {
                debug!(repo = %repo.identity(), output = %output, "Test output");
                let err = FleetError::CommandFailed {
                    repo: repo.identity().to_string(),
                    command: "test".to_string(),
                    status: None,
                    stderr: last_line(&output),
                };
                self.record_test_failure(id, "test", &err);
            }
            Err(e) => self.record_test_failure(id, "test", &e),
        }
        ControlFlow::Continue(())
    }

    fn record_test_failure(&mut self, id: RepoId, step: &str, err: &FleetError) {
        self.fail(id, step, err);
        let identity = self.identity(id);
        self.stats.record_test_failure(&identity);
        self.status_mut(id).test_failed = true;
    }

    /// Upload the configured secret file.
    pub(super) async fn secret(&mut self, id: RepoId) -> ControlFlow<()> {
        let identity = self.identity(id);
        let Some(path) = self.options.source_path.clone() else {
            self.fail(id, "secret", &FleetError::invalid("secret file", "<none>"));
            return ControlFlow::Continue(());
        };

        let uploaded: Result<String> = async {
            let name = secret_name(&path)?;
            let value = tokio::fs::read(&path).await?;
            self.hosting.upload_secret(&identity, &name, &value).await?;
            Ok(name)
        }
        .await;

        match uploaded {
            Ok(name) => info!(repo = %identity, secret = %name, "Secret updated"),
            Err(e) => self.fail(id, "secret", &e),
        }
        ControlFlow::Continue(())
    }
}

fn last_line(output: &str) -> String {
    output
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("tests failed")
        .trim()
        .to_string()
}
