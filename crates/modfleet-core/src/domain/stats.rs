//! Append-only run statistics.
//!
//! Written only by the pipeline; read by whatever formats the final report.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A per-repository failure that did not abort the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoFailure {
    pub repo: String,
    pub step: String,
    pub error: String,
}

/// A tag cut (or adopted from the remote) during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagEntry {
    pub repo: String,
    pub version: String,
}

/// Counters and per-action output lines for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionStats {
    /// Number of repositories in the sorted chain.
    pub dep_count: usize,
    pub updated: Vec<String>,
    pub tagged: Vec<TagEntry>,
    pub committed: Vec<String>,
    /// URLs of opened pull requests.
    pub pull_requests: Vec<String>,
    /// `repo#branch` for created branches that were kept.
    pub branches_created: Vec<String>,
    pub test_failures: Vec<String>,
    /// Repositories left with uncommitted changes after the action.
    pub dirty: Vec<String>,
    pub skipped: Vec<String>,
    pub failures: Vec<RepoFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ActionStats {
    pub fn new(dep_count: usize) -> Self {
        Self {
            dep_count,
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn record_updated(&mut self, repo: &str) {
        self.updated.push(repo.to_string());
    }

    pub fn record_tagged(&mut self, repo: &str, version: &str) {
        self.tagged.push(TagEntry {
            repo: repo.to_string(),
            version: version.to_string(),
        });
    }

    pub fn record_committed(&mut self, repo: &str) {
        self.committed.push(repo.to_string());
    }

    pub fn record_pull_request(&mut self, url: &str) {
        self.pull_requests.push(url.to_string());
    }

    pub fn record_branch_created(&mut self, repo: &str, branch: &str) {
        self.branches_created.push(format!("{repo}#{branch}"));
    }

    pub fn record_test_failure(&mut self, repo: &str) {
        self.test_failures.push(repo.to_string());
    }

    pub fn record_dirty(&mut self, repo: &str) {
        self.dirty.push(repo.to_string());
    }

    pub fn record_skipped(&mut self, repo: &str) {
        self.skipped.push(repo.to_string());
    }

    pub fn record_failure(&mut self, repo: &str, step: &str, error: impl ToString) {
        self.failures.push(RepoFailure {
            repo: repo.to_string(),
            step: step.to_string(),
            error: error.to_string(),
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock duration of the run, once finished.
    pub fn elapsed_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// Numbered output lines, `"1) repo"`.
    pub fn numbered(entries: &[String]) -> Vec<String> {
        entries
            .iter()
            .enumerate()
            .map(|(i, entry)| format!("{}) {}", i + 1, entry))
            .collect()
    }
}
