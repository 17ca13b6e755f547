//! Per-repository action state machine.
//!
//! [`ActionPipeline`] walks the sorted chain strictly in order on a single
//! worker. Each repository either completes its action or records failures
//! against itself; one repository failing never stops the others. The
//! cancellation token is checked between repositories and between steps.

mod actions;
pub mod deps;
mod sync;

use std::ops::ControlFlow;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::domain::error::FleetError;
use crate::domain::options::{ActionKind, ActionOptions};
use crate::domain::stats::ActionStats;
use crate::graph::{DependencyGraph, RepoId, RepoRegistry, RepoStatus};
use crate::hosting::HostingApi;
use crate::toolchain::ModuleTool;

pub use deps::{commit_message, regenerate_manifest, DependencyScope, Pin};

/// Final state of one chained repository.
#[derive(Debug, Clone, Serialize)]
pub struct RepoSummary {
    pub identity: String,
    pub version: Option<String>,
    pub status: RepoStatus,
}

/// What a pipeline run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub stats: ActionStats,
    /// Repositories whose action ran to the end, in chain order.
    pub completed: Vec<String>,
    /// Repositories to list in names-only output.
    pub touched: Vec<String>,
    /// Every chained repository, in chain order.
    pub repos: Vec<RepoSummary>,
    pub cancelled: bool,
}

/// Drives one action over the sorted chain.
pub struct ActionPipeline {
    options: ActionOptions,
    registry: RepoRegistry,
    chain: DependencyGraph,
    tools: Arc<dyn ModuleTool>,
    hosting: Arc<dyn HostingApi>,
    stats: ActionStats,
}

/// Stop when the token has been tripped.
fn proceed(cancel: &CancelToken) -> ControlFlow<()> {
    if cancel.is_cancelled() {
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}

impl ActionPipeline {
    pub fn new(
        options: ActionOptions,
        registry: RepoRegistry,
        chain: DependencyGraph,
        tools: Arc<dyn ModuleTool>,
        hosting: Arc<dyn HostingApi>,
    ) -> Self {
        let stats = ActionStats::new(chain.len());
        Self {
            options,
            registry,
            chain,
            tools,
            hosting,
            stats,
        }
    }

    /// Run the configured action over every chained repository.
    pub async fn run(mut self, cancel: &CancelToken) -> PipelineReport {
        let order = self.chain.order().to_vec();
        let total = order.len();
        let mut completed = Vec::with_capacity(total);
        let mut cancelled = false;

        for (index, id) in order.iter().copied().enumerate() {
            if proceed(cancel).is_break() {
                cancelled = true;
                break;
            }
            let identity = self.registry.identity(id).to_string();
            info!(repo = %identity, "({}/{}) {}", index + 1, total, self.options.action);

            let flow = match self.options.action {
                ActionKind::List => ControlFlow::Continue(()),
                ActionKind::Sync => self.sync(id, cancel).await,
                ActionKind::Pull => self.pull(id, cancel).await,
                ActionKind::Replace => self.replace(id, cancel).await,
                ActionKind::Reset => self.reset(id).await,
                ActionKind::Test => self.test(id, cancel).await,
                ActionKind::Secret => self.secret(id).await,
            };
            if flow.is_break() {
                cancelled = true;
                break;
            }
            completed.push(identity);
        }

        if cancelled {
            warn!(
                completed = completed.len(),
                total, "Run interrupted; remaining repositories were not processed"
            );
        }
        self.stats.finish();
        self.into_report(completed, cancelled)
    }

    fn into_report(self, completed: Vec<String>, cancelled: bool) -> PipelineReport {
        let repos: Vec<RepoSummary> = self
            .chain
            .iter()
            .map(|id| {
                let record = self.registry.record(id);
                RepoSummary {
                    identity: record.handle.identity().to_string(),
                    version: record.version.clone(),
                    status: record.status,
                }
            })
            .collect();
        let touched = repos
            .iter()
            .filter(|r| self.options.action == ActionKind::List || r.status.touched())
            .map(|r| r.identity.clone())
            .collect();

        PipelineReport {
            stats: self.stats,
            completed,
            touched,
            repos,
            cancelled,
        }
    }

    /// Record a recoverable failure against `id`.
    fn fail(&mut self, id: RepoId, step: &str, err: &FleetError) {
        let identity = self.registry.identity(id).to_string();
        warn!(repo = %identity, step, error = %err, "Step failed");
        self.stats.record_failure(&identity, step, err);
    }

    fn identity(&self, id: RepoId) -> String {
        self.registry.identity(id).to_string()
    }

    fn status_mut(&mut self, id: RepoId) -> &mut RepoStatus {
        &mut self.registry.record_mut(id).status
    }

    /// Skip repositories whose version was pinned by a filter.
    fn skip_if_pinned(&mut self, id: RepoId) -> bool {
        let Some(version) = self.registry.record(id).version.clone() else {
            return false;
        };
        let identity = self.identity(id);
        info!(repo = %identity, version = %version, "Already has version set; skipping");
        self.stats.record_skipped(&identity);
        true
    }
}
