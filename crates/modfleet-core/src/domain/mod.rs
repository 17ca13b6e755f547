pub mod error;
pub mod options;
pub mod stats;

pub use error::{FleetError, Result};
pub use options::{
    ActionKind, ActionOptions, DependencyFilter, ImportMode, Verbosity, PROTECTED_BRANCHES,
};
pub use stats::{ActionStats, RepoFailure, TagEntry};
