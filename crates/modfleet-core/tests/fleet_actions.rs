//! `list`, `pull`, `replace`, `reset`, `test`, and `secret` over a fleet.

mod support;

use std::sync::Arc;

use modfleet_core::pipeline::{regenerate_manifest, Pin};
use modfleet_core::{
    ActionKind, ActionOptions, CredentialStore, Credentials, Orchestrator, RepoHandle, RunReport,
};
use support::{render_manifest, run_git, FakeGo, Fleet, RecordingHosting};

fn options(fleet: &Fleet, action: ActionKind) -> ActionOptions {
    let mut options = ActionOptions::new(action);
    options.target_directories = vec![fleet.org_dir()];
    options
}

async fn run(fleet: &Fleet, options: ActionOptions) -> RunReport {
    Orchestrator::new(
        options,
        Arc::new(FakeGo::new(fleet.src_root())),
        Arc::new(RecordingHosting::default()),
    )
    .run()
    .await
    .unwrap()
}

#[tokio::test]
async fn list_reports_every_chained_repository() {
    let fleet = Fleet::chain();
    let report = run(&fleet, options(&fleet, ActionKind::List)).await;
    let pipeline = report.pipeline.unwrap();

    assert_eq!(pipeline.touched, report.chain);
    assert_eq!(report.chain.len(), 3);
    assert!(pipeline.stats.failures.is_empty());
}

#[tokio::test]
async fn pull_fetches_new_remote_commits() {
    let fleet = Fleet::chain();
    let clone = fleet.root.path().join("clone");
    run_git(
        fleet.root.path(),
        &[
            "clone",
            &fleet.remote_dir("core").to_string_lossy(),
            &clone.to_string_lossy(),
        ],
    );
    run_git(&clone, &["config", "user.email", "other@test.com"]);
    run_git(&clone, &["config", "user.name", "Other"]);
    std::fs::write(clone.join("CHANGELOG.md"), "upstream\n").unwrap();
    run_git(&clone, &["add", "."]);
    run_git(&clone, &["commit", "-m", "upstream change"]);
    run_git(&clone, &["push", "origin", "master"]);

    let report = run(&fleet, options(&fleet, ActionKind::Pull)).await;
    let pipeline = report.pipeline.unwrap();

    assert!(fleet.repo_dir("core").join("CHANGELOG.md").exists());
    assert_eq!(pipeline.stats.updated.len(), 3);
    assert!(pipeline.stats.failures.is_empty());
}

#[tokio::test]
async fn replace_points_dependencies_at_local_checkouts() {
    let fleet = Fleet::chain();
    let report = run(&fleet, options(&fleet, ActionKind::Replace)).await;
    let pipeline = report.pipeline.unwrap();

    let core_path = std::fs::canonicalize(fleet.repo_dir("core")).unwrap();
    let util_path = std::fs::canonicalize(fleet.repo_dir("util")).unwrap();

    let util_manifest = fleet.read("util", "go.mod");
    assert!(util_manifest.contains(&format!(
        "replace example.com/org/core => {}",
        core_path.display()
    )));

    // app resolves core transitively, so it is replaced as well.
    let app_manifest = fleet.read("app", "go.mod");
    assert!(app_manifest.contains(&format!(
        "replace example.com/org/core => {}",
        core_path.display()
    )));
    assert!(app_manifest.contains(&format!(
        "replace example.com/org/util => {}",
        util_path.display()
    )));

    assert_eq!(
        pipeline.stats.updated,
        vec![Fleet::identity("util"), Fleet::identity("app")]
    );
}

#[tokio::test]
async fn reset_restores_mod_files_and_flags_other_changes() {
    let fleet = Fleet::chain();
    let app = fleet.repo_dir("app");
    let committed = fleet.read("app", "go.mod");
    std::fs::write(app.join("go.mod"), format!("{committed}\n// local edit\n")).unwrap();
    std::fs::write(app.join("main.go"), "package app\n\n// wip\n").unwrap();
    std::fs::write(
        fleet.repo_dir("util").join("go.mod"),
        render_manifest(&Fleet::identity("util"), &Default::default()),
    )
    .unwrap();

    let report = run(&fleet, options(&fleet, ActionKind::Reset)).await;
    let pipeline = report.pipeline.unwrap();

    assert_eq!(fleet.read("app", "go.mod"), committed);
    assert!(fleet.read("util", "go.mod").contains("example.com/org/core v0.1.0"));
    assert_eq!(fleet.read("app", "main.go"), "package app\n\n// wip\n");
    assert_eq!(pipeline.stats.dirty, vec![Fleet::identity("app")]);
}

#[tokio::test]
async fn test_action_records_failures_without_committing() {
    let fleet = Fleet::chain();
    let head_before = run_git(&fleet.remote_dir("app"), &["rev-parse", "HEAD"]);
    let mut tool = FakeGo::new(fleet.src_root());
    tool.tests_failing = true;

    let report = Orchestrator::new(
        options(&fleet, ActionKind::Test),
        Arc::new(tool),
        Arc::new(RecordingHosting::default()),
    )
    .run()
    .await
    .unwrap();
    let pipeline = report.pipeline.unwrap();

    assert_eq!(pipeline.stats.test_failures.len(), 3);
    assert!(pipeline.repos.iter().all(|r| r.status.test_failed));
    assert_eq!(
        run_git(&fleet.remote_dir("app"), &["rev-parse", "HEAD"]),
        head_before
    );
}

#[tokio::test]
async fn secret_uploads_file_to_every_repository() {
    let fleet = Fleet::chain();
    let secret = fleet.root.path().join("deploy-key.json");
    std::fs::write(&secret, b"{\"key\":\"s3cret\"}").unwrap();

    let store = CredentialStore::new(fleet.root.path().join("creds"), None);
    store.save(&Credentials::new("bot", "token")).unwrap();

    let mut options = options(&fleet, ActionKind::Secret);
    options.source_path = Some(secret);
    let hosting = Arc::new(RecordingHosting::default());

    let report = Orchestrator::new(
        options,
        Arc::new(FakeGo::new(fleet.src_root())),
        hosting.clone(),
    )
    .with_credentials(Arc::new(store))
    .run()
    .await
    .unwrap();

    assert!(report.pipeline.unwrap().stats.failures.is_empty());
    let uploads = hosting.secrets.lock().unwrap();
    assert_eq!(uploads.len(), 3);
    assert!(uploads
        .iter()
        .all(|(_, name, value)| name == "DEPLOY_KEY_JSON" && value == b"{\"key\":\"s3cret\"}"));
}

#[tokio::test]
async fn regenerating_manifest_keeps_the_module_set() {
    let fleet = Fleet::chain();
    let util = RepoHandle::new(fleet.repo_dir("util"));
    let manifest_before = fleet.read("util", "go.mod");
    let lock_before = fleet.read("util", "go.sum");

    let pins = vec![Pin {
        module: Fleet::identity("core"),
        version: "v0.1.0".to_string(),
        fresh: false,
    }];
    let failed = regenerate_manifest(&util, &FakeGo::new(fleet.src_root()), &pins)
        .await
        .unwrap();

    assert!(failed.is_empty());
    assert_eq!(fleet.read("util", "go.sum"), lock_before);
    assert_eq!(fleet.read("util", "go.mod"), manifest_before);
    assert!(!util.has_changes().await.unwrap());
}
