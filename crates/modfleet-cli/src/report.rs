//! Human-readable run report.

use modfleet_core::{ActionKind, ActionOptions, ActionStats, RunReport};

/// Lines printed for `list`: the sorted chain with positions.
pub fn format_chain(chain: &[String]) -> String {
    chain
        .iter()
        .enumerate()
        .map(|(i, identity)| format!("{}) {identity}\n", i + 1))
        .collect()
}

/// Identities printed in names-only mode.
pub fn names_only(options: &ActionOptions, report: &RunReport) -> Vec<String> {
    match (&report.pipeline, options.action) {
        (None, _) => Vec::new(),
        (Some(_), ActionKind::List) => report.chain.clone(),
        (Some(pipeline), _) => pipeline.touched.clone(),
    }
}

/// Summary printed once the run and cleanup are done.
pub fn format_report(options: &ActionOptions, report: &RunReport) -> String {
    let Some(pipeline) = &report.pipeline else {
        return "Run declined; nothing was changed.\n".to_string();
    };
    let stats = &pipeline.stats;
    let total = stats.dep_count;
    let mut out = String::new();

    match options.action {
        ActionKind::List => out.push_str(&format_chain(&report.chain)),
        ActionKind::Pull => {
            let branch = options.branch.as_deref().unwrap_or("the current branch");
            section(
                &mut out,
                &format!(
                    "Pulled latest version of {branch} in {}/{total} lib(s):",
                    stats.updated.len()
                ),
                &stats.updated,
            );
        }
        ActionKind::Replace => section(
            &mut out,
            &format!(
                "Replaced local dependencies in {}/{total} lib(s):",
                stats.updated.len()
            ),
            &stats.updated,
        ),
        ActionKind::Reset => {
            if stats.dirty.is_empty() {
                out.push_str(&format!("Reset mod files in {total} lib(s).\n"));
            } else {
                section(
                    &mut out,
                    &format!("Local changes remain in {}/{total} lib(s):", stats.dirty.len()),
                    &stats.dirty,
                );
            }
        }
        ActionKind::Test => {
            if stats.test_failures.is_empty() {
                out.push_str(&format!("All {total} lib(s) built and passed tests.\n"));
            } else {
                section(
                    &mut out,
                    &format!(
                        "Tests failed in {}/{total} lib(s):",
                        stats.test_failures.len()
                    ),
                    &stats.test_failures,
                );
            }
        }
        ActionKind::Secret => {
            let uploaded = total.saturating_sub(failed_repos(stats));
            out.push_str(&format!("Updated secret in {uploaded}/{total} lib(s).\n"));
        }
        ActionKind::Sync => format_sync(&mut out, options, stats),
    }

    if !stats.skipped.is_empty() {
        section(
            &mut out,
            "Skipped (version already set):",
            &stats.skipped,
        );
    }
    if !stats.failures.is_empty() {
        out.push_str("Failures:\n");
        for failure in &stats.failures {
            out.push_str(&format!(
                "  {} [{}]: {}\n",
                failure.repo, failure.step, failure.error
            ));
        }
    }
    if report.interrupted {
        out.push_str(&format!(
            "Interrupted after {}/{total} lib(s).\n",
            pipeline.completed.len()
        ));
    }
    if !report.cleanup.dirty.is_empty() {
        section(
            &mut out,
            "Has local changes:",
            &report.cleanup.dirty,
        );
    }
    out
}

fn format_sync(out: &mut String, options: &ActionOptions, stats: &ActionStats) {
    let total = stats.dep_count;

    if stats.updated.is_empty() {
        out.push_str(&format!("All {total} lib dependencies already up to date!\n"));
    } else {
        section(
            out,
            &format!("Updated mod files in {}/{total} lib(s):", stats.updated.len()),
            &stats.updated,
        );
    }

    if stats.tagged.is_empty() {
        out.push_str(&format!("All {total} lib tags already up to date!\n"));
    } else {
        let tagged: Vec<String> = stats
            .tagged
            .iter()
            .map(|t| format!("{}@{}", t.repo, t.version))
            .collect();
        section(
            out,
            &format!("Updated tag in {}/{total} lib(s):", tagged.len()),
            &tagged,
        );
    }

    if options.commit {
        let branch = options.branch.as_deref().unwrap_or("current branch");
        if stats.committed.is_empty() {
            out.push_str(&format!("No local changes to deploy in {total} lib(s).\n"));
        } else {
            section(
                out,
                &format!(
                    "Deployed new changes to <{branch}> in {}/{total} lib(s):",
                    stats.committed.len()
                ),
                &stats.committed,
            );
        }
    }
    if !stats.pull_requests.is_empty() {
        section(out, "Opened pull requests:", &stats.pull_requests);
    }
    if !stats.branches_created.is_empty() {
        section(out, "Created branches:", &stats.branches_created);
    }
}

fn section(out: &mut String, header: &str, entries: &[String]) {
    out.push_str(header);
    out.push('\n');
    for line in ActionStats::numbered(entries) {
        out.push_str(&line);
        out.push('\n');
    }
}

fn failed_repos(stats: &ActionStats) -> usize {
    let mut repos: Vec<&str> = stats.failures.iter().map(|f| f.repo.as_str()).collect();
    repos.sort_unstable();
    repos.dedup();
    repos.len()
}
