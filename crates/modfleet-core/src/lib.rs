//! modfleet core library
//!
//! Discovers a fleet of Go module repositories, orders them so every
//! dependency precedes its dependents, and runs one release action across
//! the chain with interrupt-safe cleanup of hidden local changes.

pub mod cancel;
pub mod domain;
pub mod graph;
pub mod hosting;
pub mod orchestrator;
pub mod pipeline;
pub mod repo;
pub mod telemetry;
pub mod toolchain;

pub use cancel::CancelToken;

pub use domain::{
    ActionKind, ActionOptions, ActionStats, DependencyFilter, FleetError, ImportMode, RepoFailure,
    Result, TagEntry, Verbosity, PROTECTED_BRANCHES,
};

pub use graph::{DependencyGraph, RepoId, RepoRecord, RepoRegistry, RepoStatus};

pub use hosting::{
    CredentialPrompt, CredentialStore, Credentials, HostingApi, HostingClient, PullRequest,
    PullRequestOutcome, ReqwestTransport, API_URL_ENV,
};

pub use orchestrator::{cleanup, CleanupReport, Orchestrator, PlanApproval, RunReport};
pub use pipeline::{ActionPipeline, PipelineReport, RepoSummary};
pub use repo::discovery::discover_candidates;
pub use repo::RepoHandle;
pub use toolchain::{BuildMode, GoToolchain, ModuleTool, TestRun};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
