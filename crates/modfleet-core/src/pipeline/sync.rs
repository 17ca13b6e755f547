//! The `sync` action: branch, regenerate manifests, commit, PR, tag.

use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::deps::{commit_body, commit_message, DependencyScope, Pin};
use super::{proceed, ActionPipeline};
use crate::cancel::CancelToken;
use crate::domain::error::Result;
use crate::domain::options::TITLE_PREFIX;
use crate::graph::RepoId;
use crate::hosting::{PullRequest, PullRequestOutcome};
use crate::repo::manifest::{LOCK_FILE, MANIFEST_FILE};
use crate::repo::{next_patch_version, BranchSwitch, RepoHandle};

impl ActionPipeline {
    /// Steps run in order: stash, refresh refs, branch, pull, collect deps,
    /// regenerate manifest, commit and push, deploy local changes, pull
    /// request, prune branch, resolve version.
    pub(super) async fn sync(&mut self, id: RepoId, cancel: &CancelToken) -> ControlFlow<()> {
        if self.skip_if_pinned(id) {
            return ControlFlow::Continue(());
        }
        let repo = Arc::clone(self.registry.handle(id));

        if let Err(e) = repo.stash().await {
            self.fail(id, "stash", &e);
            return ControlFlow::Continue(());
        }
        proceed(cancel)?;

        self.refresh_refs(id, &repo).await;
        proceed(cancel)?;

        if !self.prepare_branch(id, &repo).await {
            return ControlFlow::Continue(());
        }
        proceed(cancel)?;

        info!(repo = %repo.identity(), "Pulling latest changes");
        if let Err(e) = repo.pull().await {
            self.fail(id, "pull", &e);
        }
        proceed(cancel)?;

        let deps = self.collect_dependencies(id, DependencyScope::Pinned);
        self.registry.record_mut(id).dependencies = deps.clone();
        let pins = self.resolve_pins(id, &deps).await;
        proceed(cancel)?;

        if repo.has_manifest() {
            if self.regenerate(id, &repo, &pins).await {
                proceed(cancel)?;
                self.commit_manifest(id, &repo, &pins).await;
            }
        } else {
            info!(repo = %repo.identity(), "Not a tracked module; skipping mod file update");
        }
        proceed(cancel)?;

        if self.options.commit {
            self.deploy_local_changes(id, &repo).await;
            proceed(cancel)?;
        }

        if self.options.pull_request {
            self.open_pull_request(id, &repo, &pins).await;
            proceed(cancel)?;
        }

        self.prune_branch(id, &repo).await;
        proceed(cancel)?;

        self.resolve_version(id, &repo).await;
        ControlFlow::Continue(())
    }

    /// Fetch, adopting a tag that appeared on the remote when tagging is off.
    async fn refresh_refs(&mut self, id: RepoId, repo: &RepoHandle) {
        let watch_tags = !self.options.tag;
        let before = if watch_tags {
            repo.latest_tag().await.ok().flatten()
        } else {
            None
        };

        if let Err(e) = repo.fetch().await {
            self.fail(id, "fetch", &e);
            return;
        }
        if !watch_tags {
            return;
        }

        let after = repo.latest_tag().await.ok().flatten();
        if let (Some(old), Some(new)) = (&before, &after) {
            if old != new {
                info!(repo = %repo.identity(), old = %old, new = %new, "Tag moved on the remote; adopting it");
                let identity = self.identity(id);
                self.stats.record_tagged(&identity, new);
                let record = self.registry.record_mut(id);
                record.version = Some(new.clone());
                record.status.tagged = true;
            }
        }
    }

    /// Checkout or create the target branch. Returns `false` when the
    /// repository cannot be put on it.
    async fn prepare_branch(&mut self, id: RepoId, repo: &RepoHandle) -> bool {
        let Some(branch) = self.options.branch.clone() else {
            return true;
        };
        match repo.checkout_or_create(&branch).await {
            Ok(BranchSwitch::Created) => {
                info!(repo = %repo.identity(), branch = %branch, "Created branch");
                self.status_mut(id).branch_created = true;
                if let Err(e) = repo.push().await {
                    self.fail(id, "push", &e);
                }
                true
            }
            Ok(BranchSwitch::Switched) => {
                info!(repo = %repo.identity(), branch = %branch, "Checked out branch");
                true
            }
            Ok(BranchSwitch::Unchanged) => {
                debug!(repo = %repo.identity(), branch = %branch, "Already on branch");
                true
            }
            Err(e) => {
                self.fail(id, "checkout", &e);
                false
            }
        }
    }

    /// Commit the regenerated files and push the branch.
    async fn commit_manifest(&mut self, id: RepoId, repo: &RepoHandle, pins: &[Pin]) {
        let message = commit_message(&self.options.commit_title(), pins);
        let committed: Result<bool> = async {
            repo.stage(&[MANIFEST_FILE, LOCK_FILE]).await?;
            repo.commit(&message).await
        }
        .await;

        let committed = match committed {
            Ok(committed) => committed,
            Err(e) => {
                self.fail(id, "commit", &e);
                return;
            }
        };
        if !committed {
            info!(repo = %repo.identity(), "Deps up to date");
        }

        match repo.push().await {
            Ok(()) if committed => {
                info!(repo = %repo.identity(), "Updated mod files");
                let identity = self.identity(id);
                self.stats.record_updated(&identity);
                self.status_mut(id).updated = true;
            }
            Ok(()) => {}
            Err(e) => self.fail(id, "push", &e),
        }
    }

    /// Commit the changes hidden at the start of the run, minus mod files.
    async fn deploy_local_changes(&mut self, id: RepoId, repo: &RepoHandle) {
        let restored = match repo.stash_pop().await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail(id, "deploy", &e);
                return;
            }
        };
        if !restored.dirty {
            debug!(repo = %repo.identity(), "No local changes to deploy");
            return;
        }

        let message = match &self.options.commit_message {
            Some(message) if !message.trim().is_empty() => format!("{TITLE_PREFIX}{message}"),
            _ => match self.deploy_base_version(id, repo).await {
                Some(version) => format!(
                    "{TITLE_PREFIX}Deploy local changes before incrementing version from {version}"
                ),
                None => format!("{TITLE_PREFIX}Deploy local changes"),
            },
        };

        let deployed: Result<bool> = async {
            repo.git(&["add", "-A", "--", "."]).await?;
            repo.unstage(&[MANIFEST_FILE, LOCK_FILE]).await?;
            if !repo.commit(&message).await? {
                return Ok(false);
            }
            repo.push().await?;
            Ok(true)
        }
        .await;

        match deployed {
            Ok(true) => {
                info!(repo = %repo.identity(), "Deployed local changes");
                let identity = self.identity(id);
                self.stats.record_committed(&identity);
                self.status_mut(id).committed = true;
            }
            Ok(false) => debug!(repo = %repo.identity(), "Only mod file changes; nothing to deploy"),
            Err(e) => self.fail(id, "deploy", &e),
        }

        if let Err(e) = repo.stash().await {
            warn!(repo = %repo.identity(), error = %e, "Could not re-hide leftover changes");
        }
    }

    async fn deploy_base_version(&self, id: RepoId, repo: &RepoHandle) -> Option<String> {
        if repo.is_plugin() {
            return None;
        }
        if let Some(version) = &self.registry.record(id).version {
            return Some(version.clone());
        }
        repo.latest_tag().await.ok().flatten()
    }

    async fn open_pull_request(&mut self, id: RepoId, repo: &RepoHandle, pins: &[Pin]) {
        let head = match &self.options.branch {
            Some(branch) => branch.clone(),
            None => match repo.current_branch().await {
                Ok(branch) => branch,
                Err(e) => {
                    self.fail(id, "pull-request", &e);
                    return;
                }
            },
        };
        if head == self.options.trunk {
            info!(repo = %repo.identity(), branch = %head, "On the trunk; no pull request to open");
            return;
        }

        let request = PullRequest {
            title: self.options.commit_title(),
            body: commit_body(pins),
            head,
            base: self.options.trunk.clone(),
        };
        let identity = self.identity(id);
        match self.hosting.open_pull_request(&identity, &request).await {
            Ok(PullRequestOutcome::Opened { url }) => {
                self.stats.record_pull_request(&url);
                self.status_mut(id).pr_opened = true;
            }
            Ok(PullRequestOutcome::NoChanges) => {
                info!(repo = %identity, "No commits to open a pull request for");
            }
            Ok(PullRequestOutcome::AlreadyExists) => {
                info!(repo = %identity, "Pull request already open");
            }
            Err(e) => self.fail(id, "pull-request", &e),
        }
    }

    /// Delete a branch this run created when nothing came of it.
    async fn prune_branch(&mut self, id: RepoId, repo: &RepoHandle) {
        let status = self.registry.record(id).status;
        if !status.branch_created {
            return;
        }
        let Some(branch) = self.options.branch.clone() else {
            return;
        };
        if status.updated || status.committed || status.pr_opened {
            let identity = self.identity(id);
            self.stats.record_branch_created(&identity, &branch);
            return;
        }
        if self.options.is_protected(&branch) {
            debug!(repo = %repo.identity(), branch = %branch, "Protected branch; keeping it");
            return;
        }

        info!(repo = %repo.identity(), branch = %branch, "Nothing changed; removing new branch");
        let trunk = self.options.trunk.clone();
        let removed: Result<()> = async {
            repo.checkout(&trunk).await?;
            repo.delete_branch(&branch).await
        }
        .await;
        if let Err(e) = removed {
            self.fail(id, "prune-branch", &e);
        }
    }

    /// Decide the version dependents will pin this repository at.
    async fn resolve_version(&mut self, id: RepoId, repo: &RepoHandle) {
        if self.registry.record(id).version.is_some() {
            return;
        }

        if self.options.tag && !repo.is_plugin() {
            let forced = self.options.set_version.clone();
            let should_tag = match &forced {
                Some(_) => true,
                None => match repo.tag_is_stale().await {
                    Ok(stale) => stale,
                    Err(e) => {
                        self.fail(id, "tag", &e);
                        false
                    }
                },
            };

            if should_tag {
                let tagged: Result<String> = async {
                    let tag = match forced {
                        Some(tag) => tag,
                        None => next_patch_version(repo.latest_tag().await?.as_deref())?,
                    };
                    repo.create_tag(&tag).await?;
                    Ok(tag)
                }
                .await;
                match tagged {
                    Ok(tag) => {
                        info!(repo = %repo.identity(), tag = %tag, "Tagged");
                        let identity = self.identity(id);
                        self.stats.record_tagged(&identity, &tag);
                        let record = self.registry.record_mut(id);
                        record.version = Some(tag);
                        record.status.tagged = true;
                        return;
                    }
                    Err(e) => self.fail(id, "tag", &e),
                }
            } else {
                debug!(repo = %repo.identity(), "Tag is current");
            }
        }

        match repo.latest_tag().await {
            Ok(Some(tag)) => {
                debug!(repo = %repo.identity(), tag = %tag, "Using latest tag");
                self.registry.record_mut(id).version = Some(tag);
            }
            Ok(None) => debug!(repo = %repo.identity(), "No tags"),
            Err(e) => self.fail(id, "latest-tag", &e),
        }
    }
}
