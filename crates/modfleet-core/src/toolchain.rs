//! Module build-tool backend.
//!
//! The pipeline never shells out to `go` directly; it goes through a
//! [`ModuleTool`] so tests can substitute a deterministic implementation.

use async_trait::async_trait;

use crate::domain::error::Result;
use crate::repo::RepoHandle;

/// Build mode for the compile check in the `test` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Standard,
    /// Fallback for repositories that only build as plugins.
    Plugin,
}

/// Outcome of running a repository's test suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestRun {
    Passed,
    /// The tool ran but reported no test results.
    NoTests,
    Failed(String),
}

/// Operations on a repository's module manifest and build.
#[async_trait]
pub trait ModuleTool: Send + Sync {
    /// Create a fresh manifest declaring `repo`'s module identity.
    async fn init(&self, repo: &RepoHandle) -> Result<()>;

    /// Require `module` at exactly `version`.
    async fn pin(&self, repo: &RepoHandle, module: &str, version: &str) -> Result<()>;

    /// Re-resolve the full requirement set and lock file.
    async fn tidy(&self, repo: &RepoHandle) -> Result<()>;

    async fn build(&self, repo: &RepoHandle, mode: BuildMode) -> Result<()>;

    async fn test(&self, repo: &RepoHandle) -> Result<TestRun>;
}

/// The `go` command line.
#[derive(Debug, Clone)]
pub struct GoToolchain {
    program: String,
}

impl Default for GoToolchain {
    fn default() -> Self {
        Self {
            program: "go".to_string(),
        }
    }
}

/// Scratch binary written by the compile check.
const BUILD_OUTPUT: &str = "test-out.o";

impl GoToolchain {
    /// Use a specific `go` binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(self.program.as_str());
        full.extend_from_slice(args);
        full
    }
}

#[async_trait]
impl ModuleTool for GoToolchain {
    async fn init(&self, repo: &RepoHandle) -> Result<()> {
        repo.run(&self.command(&["mod", "init", repo.identity()]))
            .await
    }

    async fn pin(&self, repo: &RepoHandle, module: &str, version: &str) -> Result<()> {
        let target = format!("{module}@{version}");
        repo.run(&self.command(&["get", &target])).await
    }

    async fn tidy(&self, repo: &RepoHandle) -> Result<()> {
        repo.run(&self.command(&["mod", "tidy"])).await
    }

    async fn build(&self, repo: &RepoHandle, mode: BuildMode) -> Result<()> {
        let args: &[&str] = match mode {
            BuildMode::Standard => &["build", "-o", BUILD_OUTPUT],
            BuildMode::Plugin => &["build", "-buildmode=plugin", "-o", BUILD_OUTPUT],
        };
        let built = repo.run(&self.command(args)).await;
        let scratch = repo.path().join(BUILD_OUTPUT);
        if scratch.exists() {
            std::fs::remove_file(scratch)?;
        }
        built
    }

    async fn test(&self, repo: &RepoHandle) -> Result<TestRun> {
        let output = repo.probe(&self.command(&["test", "./..."])).await?;
        if !output.success() {
            let detail = if output.stdout.trim().is_empty() {
                output.stderr
            } else {
                output.stdout
            };
            return Ok(TestRun::Failed(detail));
        }
        if output.stdout.contains("PASS") || output.stdout.lines().any(|l| l.starts_with("ok")) {
            Ok(TestRun::Passed)
        } else {
            Ok(TestRun::NoTests)
        }
    }
}
