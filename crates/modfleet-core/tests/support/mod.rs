//! Shared fixtures: a small fleet of real git repositories with local bare
//! remotes, a deterministic stand-in for the `go` tool, and a hosting API
//! that records calls.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use modfleet_core::hosting::{HostingApi, PullRequest, PullRequestOutcome};
use modfleet_core::toolchain::{BuildMode, ModuleTool, TestRun};
use modfleet_core::{CancelToken, FleetError, RepoHandle, Result};

pub const ORG: &str = "example.com/org";

pub fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Render a manifest the way [`FakeGo`] writes it.
pub fn render_manifest(module: &str, requires: &BTreeMap<String, String>) -> String {
    let mut out = format!("module {module}\n\ngo 1.21\n");
    if !requires.is_empty() {
        out.push_str("\nrequire (\n");
        for (dep, version) in requires {
            out.push_str(&format!("\t{dep} {version}\n"));
        }
        out.push_str(")\n");
    }
    out
}

/// Render a lock file the way [`FakeGo`] writes it.
pub fn render_lock(entries: &BTreeMap<String, String>) -> String {
    entries
        .iter()
        .map(|(module, version)| {
            format!("{module} {version} h1:fake=\n{module} {version}/go.mod h1:fake=\n")
        })
        .collect()
}

/// `(module, requires)` parsed from a manifest.
pub fn parse_manifest(content: &str) -> (String, BTreeMap<String, String>) {
    let mut module = String::new();
    let mut requires = BTreeMap::new();
    for line in content.lines() {
        let mut tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() == Some(&"module") && tokens.len() == 2 {
            module = tokens[1].to_string();
            continue;
        }
        if tokens.first() == Some(&"require") {
            tokens.remove(0);
        }
        if tokens.len() >= 2 && tokens[1].starts_with('v') {
            requires.insert(tokens[0].to_string(), tokens[1].to_string());
        }
    }
    (module, requires)
}

/// Non-standard-library import paths in the `.go` files at the repo root.
pub fn scan_imports(dir: &Path) -> BTreeSet<String> {
    let mut imports = BTreeSet::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return imports;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("go") {
            continue;
        }
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        let mut in_block = false;
        for line in content.lines() {
            let line = line.trim();
            if line == "import (" {
                in_block = true;
                continue;
            }
            if in_block && line == ")" {
                in_block = false;
                continue;
            }
            let quoted = if in_block {
                Some(line)
            } else {
                line.strip_prefix("import ")
            };
            if let Some(path) = quoted.and_then(|q| q.trim().strip_prefix('"')?.strip_suffix('"')) {
                if path.split('/').next().is_some_and(|host| host.contains('.')) {
                    imports.insert(path.to_string());
                }
            }
        }
    }
    imports
}

/// A fleet of repositories under `<root>/go/src/example.com/org`, each with
/// a bare remote under `<root>/remotes`.
pub struct Fleet {
    pub root: tempfile::TempDir,
}

impl Fleet {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("remotes")).unwrap();
        std::fs::create_dir_all(root.path().join("go/src").join(ORG)).unwrap();
        Self { root }
    }

    /// `core <- util <- app`: each tagged `v0.1.0` with one more commit on
    /// top, so every tag is behind HEAD.
    pub fn chain() -> Self {
        let fleet = Self::new();
        fleet.add_repo("core", &[], &[]);
        fleet.add_repo("util", &["core"], &[("core", "v0.1.0")]);
        fleet.add_repo("app", &["util"], &[("util", "v0.1.0"), ("core", "v0.1.0")]);
        fleet
    }

    pub fn src_root(&self) -> PathBuf {
        self.root.path().join("go/src")
    }

    pub fn org_dir(&self) -> PathBuf {
        self.src_root().join(ORG)
    }

    pub fn repo_dir(&self, name: &str) -> PathBuf {
        self.org_dir().join(name)
    }

    pub fn remote_dir(&self, name: &str) -> PathBuf {
        self.root.path().join("remotes").join(format!("{name}.git"))
    }

    pub fn identity(name: &str) -> String {
        format!("{ORG}/{name}")
    }

    /// Create `name` importing `imports` (sibling names); `locked` lists
    /// `(sibling, version)` pairs for the lock file, transitive ones
    /// included. Direct imports are required at their locked version.
    pub fn add_repo(&self, name: &str, imports: &[&str], locked: &[(&str, &str)]) -> PathBuf {
        let remote = self.remote_dir(name);
        std::fs::create_dir_all(&remote).unwrap();
        run_git(&remote, &["init", "--bare", "-b", "master"]);

        let dir = self.repo_dir(name);
        std::fs::create_dir_all(&dir).unwrap();
        run_git(&dir, &["init", "-b", "master"]);
        run_git(&dir, &["config", "user.email", "test@test.com"]);
        run_git(&dir, &["config", "user.name", "Test"]);
        run_git(&dir, &["config", "commit.gpgsign", "false"]);
        run_git(&dir, &["config", "tag.gpgsign", "false"]);
        run_git(&dir, &["config", "pull.rebase", "false"]);
        run_git(&dir, &["remote", "add", "origin", &remote.to_string_lossy()]);

        let locked: BTreeMap<String, String> = locked
            .iter()
            .map(|(dep, version)| (Self::identity(dep), version.to_string()))
            .collect();
        let requires: BTreeMap<String, String> = imports
            .iter()
            .map(|dep| {
                let module = Self::identity(dep);
                let version = locked.get(&module).cloned().unwrap_or_else(|| "v0.1.0".into());
                (module, version)
            })
            .collect();

        std::fs::write(
            dir.join("go.mod"),
            render_manifest(&Self::identity(name), &requires),
        )
        .unwrap();
        if !locked.is_empty() {
            std::fs::write(dir.join("go.sum"), render_lock(&locked)).unwrap();
        }
        let mut source = format!("package {name}\n");
        for dep in imports {
            source.push_str(&format!("\nimport \"{}\"\n", Self::identity(dep)));
        }
        std::fs::write(dir.join("main.go"), source).unwrap();
        std::fs::write(dir.join("README.md"), format!("# {name}\n")).unwrap();

        run_git(&dir, &["add", "."]);
        run_git(&dir, &["commit", "-m", "initial"]);
        run_git(&dir, &["tag", "v0.1.0"]);
        std::fs::write(dir.join("README.md"), format!("# {name}\n\nMore docs.\n")).unwrap();
        run_git(&dir, &["commit", "-am", "docs"]);
        run_git(&dir, &["push", "-u", "origin", "master"]);
        run_git(&dir, &["push", "origin", "--tags"]);
        dir
    }

    pub fn read(&self, name: &str, file: &str) -> String {
        std::fs::read_to_string(self.repo_dir(name).join(file)).unwrap_or_default()
    }

    /// Tags present on `name`'s remote.
    pub fn remote_tags(&self, name: &str) -> Vec<String> {
        run_git(&self.remote_dir(name), &["tag", "--list"])
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// Deterministic `go` stand-in.
///
/// `tidy` requires every sibling module imported by the repository's `.go`
/// files (keeping pinned versions, else the sibling's latest tag) and writes
/// a lock file holding the transitive closure read from the siblings'
/// manifests on disk. The manifest is only rewritten when its requirements
/// change, so replace directives survive.
pub struct FakeGo {
    src_root: PathBuf,
    cancel_on_init: Mutex<Option<CancelToken>>,
    pub inits: AtomicUsize,
    pub tests_failing: bool,
}

impl FakeGo {
    pub fn new(src_root: PathBuf) -> Self {
        Self {
            src_root,
            cancel_on_init: Mutex::new(None),
            inits: AtomicUsize::new(0),
            tests_failing: false,
        }
    }

    /// Trip `token` on the next `init`, simulating an interrupt mid-run.
    pub fn arm(&self, token: CancelToken) {
        *self.cancel_on_init.lock().unwrap() = Some(token);
    }

    fn manifest_of(&self, module: &str) -> BTreeMap<String, String> {
        std::fs::read_to_string(self.src_root.join(module).join("go.mod"))
            .map(|content| parse_manifest(&content).1)
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModuleTool for FakeGo {
    async fn init(&self, repo: &RepoHandle) -> Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.cancel_on_init.lock().unwrap().take() {
            token.cancel();
        }
        std::fs::write(
            repo.manifest_path(),
            render_manifest(repo.identity(), &BTreeMap::new()),
        )?;
        Ok(())
    }

    async fn pin(&self, repo: &RepoHandle, module: &str, version: &str) -> Result<()> {
        let content = repo.read_manifest().unwrap_or_default();
        let (name, mut requires) = parse_manifest(&content);
        requires.insert(module.to_string(), version.to_string());
        std::fs::write(repo.manifest_path(), render_manifest(&name, &requires))?;
        Ok(())
    }

    async fn tidy(&self, repo: &RepoHandle) -> Result<()> {
        let content = repo.read_manifest().unwrap_or_default();
        let (name, current) = parse_manifest(&content);

        let mut requires = BTreeMap::new();
        for import in scan_imports(repo.path()) {
            let version = match current.get(&import) {
                Some(version) => version.clone(),
                None => RepoHandle::new(self.src_root.join(&import))
                    .latest_tag()
                    .await?
                    .ok_or_else(|| FleetError::MissingVersion {
                        module: import.clone(),
                    })?,
            };
            requires.insert(import, version);
        }
        if requires != current {
            std::fs::write(repo.manifest_path(), render_manifest(&name, &requires))?;
        }

        let mut closure = BTreeMap::new();
        let mut pending: Vec<(String, String)> = requires.into_iter().collect();
        while let Some((module, version)) = pending.pop() {
            if closure.insert(module.clone(), version).is_some() {
                continue;
            }
            pending.extend(self.manifest_of(&module));
        }
        if closure.is_empty() {
            repo.remove_lock_file()?;
        } else {
            std::fs::write(repo.lock_path(), render_lock(&closure))?;
        }
        Ok(())
    }

    async fn build(&self, _repo: &RepoHandle, _mode: BuildMode) -> Result<()> {
        Ok(())
    }

    async fn test(&self, _repo: &RepoHandle) -> Result<TestRun> {
        if self.tests_failing {
            Ok(TestRun::Failed("--- FAIL: TestChain\nFAIL".to_string()))
        } else {
            Ok(TestRun::Passed)
        }
    }
}

/// Hosting API that records what it was asked to do.
#[derive(Default)]
pub struct RecordingHosting {
    pub pull_requests: Mutex<Vec<(String, PullRequest)>>,
    pub secrets: Mutex<Vec<(String, String, Vec<u8>)>>,
}

#[async_trait]
impl HostingApi for RecordingHosting {
    async fn open_pull_request(
        &self,
        identity: &str,
        request: &PullRequest,
    ) -> Result<PullRequestOutcome> {
        self.pull_requests
            .lock()
            .unwrap()
            .push((identity.to_string(), request.clone()));
        Ok(PullRequestOutcome::Opened {
            url: format!("https://{identity}/pull/1"),
        })
    }

    async fn upload_secret(&self, identity: &str, name: &str, value: &[u8]) -> Result<()> {
        self.secrets
            .lock()
            .unwrap()
            .push((identity.to_string(), name.to_string(), value.to_vec()));
        Ok(())
    }
}
