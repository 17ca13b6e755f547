//! Version-control operations on a [`RepoHandle`].

use std::path::PathBuf;

use semver::{BuildMetadata, Prerelease, Version};
use tracing::{debug, info, warn};

use super::manifest::{LOCK_FILE, MANIFEST_FILE};
use super::RepoHandle;
use crate::domain::error::{FleetError, Result};

/// Stash message used to recognise entries this tool created.
pub const STASH_MARKER: &str = "modfleet-autostash";

/// Suffix for manifest files moved aside while a stash is popped.
const HIDDEN_SUFFIX: &str = ".bak";

/// What checkout-or-create did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchSwitch {
    /// Already on the branch.
    Unchanged,
    Switched,
    /// The branch did not exist and was created from the current HEAD.
    Created,
}

/// Result of restoring hidden local changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StashPopOutcome {
    /// A stash entry created by this tool was applied.
    pub popped: bool,
    /// Uncommitted changes remain afterwards.
    pub dirty: bool,
}

impl RepoHandle {
    pub async fn git(&self, args: &[&str]) -> Result<()> {
        self.git_capture(args).await.map(drop)
    }

    pub async fn git_capture(&self, args: &[&str]) -> Result<String> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("git");
        full.extend_from_slice(args);
        self.capture(&full).await
    }

    pub async fn current_branch(&self) -> Result<String> {
        self.git_capture(&["branch", "--show-current"]).await
    }

    pub async fn checkout(&self, branch: &str) -> Result<()> {
        self.git(&["checkout", branch]).await
    }

    /// Checkout `branch`, creating it from HEAD when it does not exist yet.
    pub async fn checkout_or_create(&self, branch: &str) -> Result<BranchSwitch> {
        if self.current_branch().await? == branch {
            return Ok(BranchSwitch::Unchanged);
        }
        match self.checkout(branch).await {
            Ok(()) => Ok(BranchSwitch::Switched),
            Err(err) => {
                debug!(repo = %self.identity(), branch, error = %err, "Checkout failed; creating branch");
                self.git(&["checkout", "-b", branch]).await?;
                Ok(BranchSwitch::Created)
            }
        }
    }

    /// Fetch branches and tags, pruning tags deleted on the remote.
    pub async fn fetch(&self) -> Result<()> {
        self.git(&["fetch"]).await?;
        self.git(&["fetch", "origin", "--prune", "--prune-tags", "--tags"])
            .await
    }

    pub async fn merge(&self, reference: &str) -> Result<()> {
        self.git(&["merge", reference]).await
    }

    pub async fn pull(&self) -> Result<()> {
        self.git(&["pull"]).await
    }

    /// Push the current branch, setting its upstream.
    pub async fn push(&self) -> Result<()> {
        self.git(&["push", "-u", "origin", "HEAD"]).await
    }

    /// Delete `branch` locally and on `origin`.
    pub async fn delete_branch(&self, branch: &str) -> Result<()> {
        self.git(&["branch", "-D", branch]).await?;
        self.git(&["push", "origin", "--delete", branch]).await
    }

    pub async fn add(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.git(&args).await
    }

    pub async fn is_tracked(&self, path: &str) -> Result<bool> {
        let output = self
            .probe(&["git", "ls-files", "--error-unmatch", "--", path])
            .await?;
        Ok(output.success())
    }

    /// The subset of `paths` that exist on disk or are tracked (deleted).
    async fn known_paths<'a>(&self, paths: &[&'a str]) -> Result<Vec<&'a str>> {
        let mut known = Vec::with_capacity(paths.len());
        for path in paths {
            if self.path.join(path).exists() || self.is_tracked(path).await? {
                known.push(*path);
            }
        }
        Ok(known)
    }

    /// Stage `paths`, deletions included. Paths git has never seen are ignored.
    pub async fn stage(&self, paths: &[&str]) -> Result<()> {
        let known = self.known_paths(paths).await?;
        if known.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "-A", "--"];
        args.extend(known);
        self.git(&args).await
    }

    /// Remove `paths` from the index, keeping working-tree contents.
    pub async fn unstage(&self, paths: &[&str]) -> Result<()> {
        let known = self.known_paths(paths).await?;
        if known.is_empty() {
            return Ok(());
        }
        let mut args = vec!["-q", "--"];
        args.extend(known);
        self.reset(&args).await
    }

    /// Commit staged changes. Returns `false` when nothing was staged.
    pub async fn commit(&self, message: &str) -> Result<bool> {
        let staged = self
            .probe(&["git", "diff", "--cached", "--quiet"])
            .await?;
        if staged.success() {
            return Ok(false);
        }
        self.git(&["commit", "-m", message]).await?;
        Ok(true)
    }

    pub async fn reset(&self, args: &[&str]) -> Result<()> {
        let mut full = vec!["reset"];
        full.extend_from_slice(args);
        self.git(&full).await
    }

    /// Restore `paths` from `reference` (or the index when `None`).
    pub async fn restore_paths(&self, reference: Option<&str>, paths: &[&str]) -> Result<()> {
        let mut args = vec!["checkout"];
        if let Some(reference) = reference {
            args.push(reference);
        }
        args.push("--");
        args.extend_from_slice(paths);
        self.git(&args).await
    }

    /// Whether the working tree has uncommitted changes, untracked files
    /// included.
    pub async fn has_changes(&self) -> Result<bool> {
        let status = self.git_capture(&["status", "--porcelain"]).await?;
        Ok(!status.is_empty())
    }

    async fn has_tracked_changes(&self) -> Result<bool> {
        let status = self
            .git_capture(&["status", "--porcelain", "--untracked-files=no"])
            .await?;
        Ok(!status.is_empty())
    }

    /// Hide tracked local changes. Returns `false` when there was nothing to
    /// hide and no stash entry was created.
    pub async fn stash(&self) -> Result<bool> {
        if !self.has_tracked_changes().await? {
            return Ok(false);
        }
        self.git(&["stash", "push", "-m", STASH_MARKER]).await?;
        info!(repo = %self.identity(), "Stashed local changes");
        Ok(true)
    }

    /// Restore the most recent stash entry created by [`Self::stash`].
    ///
    /// The manifest and lock files are moved aside while the entry is
    /// applied so regenerated manifests never conflict with stashed edits.
    /// With no matching entry this only reports the dirty state.
    pub async fn stash_pop(&self) -> Result<StashPopOutcome> {
        let Some(entry) = self.own_stash_entry().await? else {
            debug!(repo = %self.identity(), "No stash to restore");
            return Ok(StashPopOutcome {
                popped: false,
                dirty: self.has_changes().await?,
            });
        };

        let overwritten = self.stashed_manifest_files(&entry).await?;
        if !overwritten.is_empty() {
            warn!(
                repo = %self.identity(),
                files = ?overwritten,
                "Stashed edits to mod files are replaced by the regenerated ones"
            );
        }

        let hidden = self.hide_manifest_files()?;
        let popped = self.git(&["stash", "pop", &entry]).await;
        let unhidden = self.unhide_manifest_files(&hidden);
        popped?;
        unhidden?;

        Ok(StashPopOutcome {
            popped: true,
            dirty: self.has_changes().await?,
        })
    }

    async fn own_stash_entry(&self) -> Result<Option<String>> {
        let list = self
            .git_capture(&["stash", "list", "--format=%gd %gs"])
            .await?;
        Ok(list
            .lines()
            .find(|line| line.contains(STASH_MARKER))
            .and_then(|line| line.split_whitespace().next())
            .map(str::to_string))
    }

    /// Mod files the stash entry `entry` has edits for.
    async fn stashed_manifest_files(&self, entry: &str) -> Result<Vec<String>> {
        let names = self
            .git_capture(&["stash", "show", "--name-only", entry])
            .await?;
        Ok(names
            .lines()
            .map(str::trim)
            .filter(|name| *name == MANIFEST_FILE || *name == LOCK_FILE)
            .map(str::to_string)
            .collect())
    }

    /// Move the mod files aside. On failure the ones already moved are put
    /// back before the error is returned.
    fn hide_manifest_files(&self) -> Result<Vec<(PathBuf, PathBuf)>> {
        let mut hidden = Vec::new();
        for file in [MANIFEST_FILE, LOCK_FILE] {
            let original = self.path.join(file);
            if !original.exists() {
                continue;
            }
            let aside = self.path.join(format!("{file}{HIDDEN_SUFFIX}"));
            if let Err(e) = std::fs::rename(&original, &aside) {
                if let Err(undo) = self.unhide_manifest_files(&hidden) {
                    warn!(repo = %self.identity(), error = %undo, "Could not restore mod files");
                }
                return Err(e.into());
            }
            hidden.push((original, aside));
        }
        Ok(hidden)
    }

    /// Move every hidden file back, returning the first failure.
    fn unhide_manifest_files(&self, hidden: &[(PathBuf, PathBuf)]) -> Result<()> {
        let mut first_error = None;
        for (original, aside) in hidden {
            if let Err(e) = std::fs::rename(aside, original) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub async fn head_commit(&self) -> Result<String> {
        self.git_capture(&["rev-parse", "HEAD"]).await
    }

    /// Highest version tag, if any.
    pub async fn latest_tag(&self) -> Result<Option<String>> {
        let tags = self
            .git_capture(&["tag", "--list", "--sort=-version:refname"])
            .await?;
        Ok(tags
            .lines()
            .map(str::trim)
            .find(|t| !t.is_empty())
            .map(str::to_string))
    }

    /// Commit a tag points at.
    pub async fn tag_commit(&self, tag: &str) -> Result<String> {
        self.git_capture(&["rev-list", "-n", "1", tag]).await
    }

    /// Whether HEAD has moved past the latest tag. No tag means not stale.
    pub async fn tag_is_stale(&self) -> Result<bool> {
        let Some(tag) = self.latest_tag().await? else {
            return Ok(false);
        };
        Ok(self.tag_commit(&tag).await? != self.head_commit().await?)
    }

    /// Create `tag` at HEAD and push it.
    pub async fn create_tag(&self, tag: &str) -> Result<()> {
        self.git(&["tag", tag]).await?;
        self.git(&["push", "origin", tag]).await
    }
}

/// Next patch release after `latest`, keeping a `v` prefix if present.
///
/// The first tag of a repository is `v0.1.0`.
pub fn next_patch_version(latest: Option<&str>) -> Result<String> {
    let Some(latest) = latest else {
        return Ok("v0.1.0".to_string());
    };
    let (prefix, raw) = match latest.strip_prefix('v') {
        Some(rest) => ("v", rest),
        None => ("", latest),
    };
    let mut version = Version::parse(raw).map_err(|_| FleetError::invalid("tag", latest))?;
    version.patch += 1;
    version.pre = Prerelease::EMPTY;
    version.build = BuildMetadata::EMPTY;
    Ok(format!("{prefix}{version}"))
}
