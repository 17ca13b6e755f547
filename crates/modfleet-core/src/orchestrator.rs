//! Run orchestration and crash-safe cleanup.
//!
//! The orchestrator discovers and orders repositories, runs the pipeline as
//! a background task, and waits until the task finishes or an interrupt
//! arrives. It then always restores hidden local changes in every
//! discovered repository, processed or not, with bounded parallelism.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::cancel::CancelToken;
use crate::domain::error::{FleetError, Result};
use crate::domain::options::{ActionKind, ActionOptions};
use crate::graph::{DependencyGraph, RepoRegistry};
use crate::hosting::{CredentialStore, HostingApi};
use crate::pipeline::{ActionPipeline, PipelineReport};
use crate::repo::discovery::discover_candidates;
use crate::repo::RepoHandle;
use crate::toolchain::ModuleTool;

/// Asked to confirm the sorted chain before a `sync` run touches anything.
pub trait PlanApproval: Send + Sync {
    fn approve(&self, summary: &str, chain: &[String]) -> bool;
}

/// Outcome of the cleanup phase.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// Repositories a restore was attempted on.
    pub attempted: usize,
    /// Repositories where a hidden stash was applied.
    pub restored: Vec<String>,
    /// Repositories left with uncommitted changes.
    pub dirty: Vec<String>,
    /// Repositories whose restore failed, with the error.
    pub failed: Vec<(String, String)>,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// `None` when the plan was declined before the pipeline started.
    pub pipeline: Option<PipelineReport>,
    /// Chain identities in processing order.
    pub chain: Vec<String>,
    /// The run stopped early because of an interrupt.
    pub interrupted: bool,
    pub cleanup: CleanupReport,
}

impl RunReport {
    pub fn declined(&self) -> bool {
        self.pipeline.is_none()
    }
}

/// Discovers, orders, runs, and cleans up.
pub struct Orchestrator {
    options: ActionOptions,
    tools: Arc<dyn ModuleTool>,
    hosting: Arc<dyn HostingApi>,
    credentials: Option<Arc<CredentialStore>>,
    approval: Option<Arc<dyn PlanApproval>>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(
        options: ActionOptions,
        tools: Arc<dyn ModuleTool>,
        hosting: Arc<dyn HostingApi>,
    ) -> Self {
        Self {
            options,
            tools,
            hosting,
            credentials: None,
            approval: None,
            cancel: CancelToken::new(),
        }
    }

    /// Credentials checked before the run when the action needs them.
    pub fn with_credentials(mut self, credentials: Arc<CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_approval(mut self, approval: Arc<dyn PlanApproval>) -> Self {
        self.approval = Some(approval);
        self
    }

    /// Token shared with the pipeline worker.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run to completion with no external interrupt.
    pub async fn run(&self) -> Result<RunReport> {
        self.run_until(std::future::pending()).await
    }

    /// Run until the pipeline finishes or `interrupt` resolves.
    #[instrument(skip(self, interrupt), fields(action = %self.options.action))]
    pub async fn run_until<F>(&self, interrupt: F) -> Result<RunReport>
    where
        F: Future<Output = ()> + Send,
    {
        self.preflight().await?;

        let candidates = discover_candidates(&self.options.target_directories)?;
        let mut registry = RepoRegistry::new().with_timeout(self.options.command_timeout);
        let chain = DependencyGraph::build(
            &mut registry,
            &candidates,
            &self.options.filters,
            self.options.import_mode,
        );
        let identities = chain.identities(&registry);
        let handles = registry.handles();
        info!(
            discovered = handles.len(),
            chained = identities.len(),
            "Sorted repositories"
        );

        if !self.approved(&identities).await {
            info!("Run declined");
            self.cancel.cancel();
            let cleanup = cleanup(&handles).await;
            return Ok(RunReport {
                pipeline: None,
                chain: identities,
                interrupted: false,
                cleanup,
            });
        }

        let pipeline = ActionPipeline::new(
            self.options.clone(),
            registry,
            chain,
            Arc::clone(&self.tools),
            Arc::clone(&self.hosting),
        );
        let worker_token = self.cancel.clone();
        let mut worker = tokio::spawn(async move { pipeline.run(&worker_token).await });

        tokio::pin!(interrupt);
        let mut interrupted = false;
        let joined = tokio::select! {
            joined = &mut worker => joined,
            _ = &mut interrupt => {
                interrupted = true;
                warn!("Interrupted; stopping after the current step");
                self.cancel.cancel();
                (&mut worker).await
            }
        };

        self.cancel.cancel();
        let cleanup = cleanup(&handles).await;

        match joined {
            Ok(report) => Ok(RunReport {
                interrupted: interrupted || report.cancelled,
                pipeline: Some(report),
                chain: identities,
                cleanup,
            }),
            Err(e) => {
                warn!(error = %e, "Pipeline task did not finish");
                Err(FleetError::ShutdownIncomplete { repos: identities })
            }
        }
    }

    async fn preflight(&self) -> Result<()> {
        if self.options.action == ActionKind::Secret {
            match &self.options.source_path {
                Some(path) if path.is_file() => {}
                Some(path) => {
                    return Err(FleetError::invalid(
                        "secret file",
                        path.display().to_string(),
                    ))
                }
                None => return Err(FleetError::invalid("secret file", "<none>")),
            }
        }
        if self.options.needs_credentials() {
            let Some(store) = &self.credentials else {
                return Err(FleetError::CredentialsUnavailable(
                    "no credential store configured".to_string(),
                ));
            };
            store.obtain().await?;
        }
        Ok(())
    }

    /// Asks on the blocking pool; a prompt that dies counts as a refusal.
    async fn approved(&self, chain: &[String]) -> bool {
        if self.options.action != ActionKind::Sync {
            return true;
        }
        let Some(approval) = self.approval.clone() else {
            return true;
        };
        let summary = self.options.describe();
        let chain = chain.to_vec();
        tokio::task::spawn_blocking(move || approval.approve(&summary, &chain))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Approval prompt aborted");
                false
            })
    }
}

/// Restore hidden local changes in every repository, bounded by host
/// parallelism. Failures and leftover changes are reported, never fatal.
pub async fn cleanup(handles: &[Arc<RepoHandle>]) -> CleanupReport {
    let limit = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut tasks = JoinSet::new();

    for handle in handles {
        let handle = Arc::clone(handle);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let outcome = handle.stash_pop().await;
            (handle.identity().to_string(), outcome)
        });
    }

    let mut report = CleanupReport {
        attempted: handles.len(),
        ..CleanupReport::default()
    };
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((identity, Ok(outcome))) => {
                if outcome.popped {
                    report.restored.push(identity.clone());
                }
                if outcome.dirty {
                    warn!(repo = %identity, "Has local changes");
                    report.dirty.push(identity);
                }
            }
            Ok((identity, Err(e))) => {
                warn!(repo = %identity, error = %e, "Could not restore stashed changes");
                report.failed.push((identity, e.to_string()));
            }
            Err(e) => warn!(error = %e, "Cleanup task panicked"),
        }
    }

    report.restored.sort();
    report.dirty.sort();
    report.failed.sort();
    report
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::process::Command as StdCommand;

    use async_trait::async_trait;

    use super::*;
    use crate::hosting::{PullRequest, PullRequestOutcome};
    use crate::toolchain::{BuildMode, TestRun};

    struct NoTools;

    #[async_trait]
    impl ModuleTool for NoTools {
        async fn init(&self, _repo: &RepoHandle) -> Result<()> {
            Ok(())
        }
        async fn pin(&self, _repo: &RepoHandle, _module: &str, _version: &str) -> Result<()> {
            Ok(())
        }
        async fn tidy(&self, _repo: &RepoHandle) -> Result<()> {
            Ok(())
        }
        async fn build(&self, _repo: &RepoHandle, _mode: BuildMode) -> Result<()> {
            Ok(())
        }
        async fn test(&self, _repo: &RepoHandle) -> Result<TestRun> {
            Ok(TestRun::NoTests)
        }
    }

    struct NoHosting;

    #[async_trait]
    impl HostingApi for NoHosting {
        async fn open_pull_request(
            &self,
            _identity: &str,
            _request: &PullRequest,
        ) -> Result<PullRequestOutcome> {
            Ok(PullRequestOutcome::NoChanges)
        }
        async fn upload_secret(&self, _identity: &str, _name: &str, _value: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    struct Decline;

    impl PlanApproval for Decline {
        fn approve(&self, _summary: &str, _chain: &[String]) -> bool {
            false
        }
    }

    fn run_git(dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {args:?} failed");
    }

    fn dirty_repo(root: &Path, name: &str) -> std::path::PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        run_git(&dir, &["init", "-b", "master"]);
        run_git(&dir, &["config", "user.email", "test@test.com"]);
        run_git(&dir, &["config", "user.name", "Test"]);
        std::fs::write(dir.join("README"), "one\n").unwrap();
        run_git(&dir, &["add", "."]);
        run_git(&dir, &["commit", "-m", "init"]);
        std::fs::write(dir.join("README"), "two\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_cleanup_restores_stashed_and_flags_dirty() {
        let root = tempfile::tempdir().unwrap();
        let stashed = Arc::new(RepoHandle::new(dirty_repo(root.path(), "a")));
        let untouched = Arc::new(RepoHandle::new(dirty_repo(root.path(), "b")));
        assert!(stashed.stash().await.unwrap());

        let report = cleanup(&[stashed.clone(), untouched.clone()]).await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.restored, vec![stashed.identity().to_string()]);
        assert_eq!(report.dirty.len(), 2);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_reports_failures() {
        let root = tempfile::tempdir().unwrap();
        let not_a_repo = Arc::new(RepoHandle::new(root.path()));

        let report = cleanup(&[not_a_repo]).await;
        assert_eq!(report.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_declined_plan_skips_pipeline_but_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        dirty_repo(root.path(), "a");
        let mut options = ActionOptions::new(ActionKind::Sync);
        options.target_directories = vec![root.path().to_path_buf()];

        let orchestrator = Orchestrator::new(options, Arc::new(NoTools), Arc::new(NoHosting))
            .with_approval(Arc::new(Decline));
        let report = orchestrator.run().await.unwrap();

        assert!(report.declined());
        assert_eq!(report.chain.len(), 1);
        assert_eq!(report.cleanup.attempted, 1);
        assert!(orchestrator.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_pull_request_without_credentials_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let mut options = ActionOptions::new(ActionKind::Sync);
        options.pull_request = true;
        options.target_directories = vec![root.path().to_path_buf()];
        let store = Arc::new(CredentialStore::new(root.path().join("creds"), None));

        let orchestrator = Orchestrator::new(options, Arc::new(NoTools), Arc::new(NoHosting))
            .with_credentials(store);
        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, FleetError::CredentialsUnavailable(_)));
    }

    #[tokio::test]
    async fn test_secret_requires_source_file() {
        let root = tempfile::tempdir().unwrap();
        let mut options = ActionOptions::new(ActionKind::Secret);
        options.source_path = Some(root.path().join("missing"));

        let orchestrator = Orchestrator::new(options, Arc::new(NoTools), Arc::new(NoHosting));
        assert!(matches!(
            orchestrator.run().await,
            Err(FleetError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_touches_every_chained_repo() {
        let root = tempfile::tempdir().unwrap();
        dirty_repo(root.path(), "a");
        dirty_repo(root.path(), "b");
        let mut options = ActionOptions::new(ActionKind::List);
        options.target_directories = vec![root.path().to_path_buf()];

        let orchestrator = Orchestrator::new(options, Arc::new(NoTools), Arc::new(NoHosting));
        let report = orchestrator.run().await.unwrap();
        let pipeline = report.pipeline.unwrap();

        assert_eq!(pipeline.touched.len(), 2);
        assert_eq!(pipeline.completed.len(), 2);
        assert!(!report.interrupted);
        assert_eq!(report.cleanup.dirty.len(), 2);
    }
}
