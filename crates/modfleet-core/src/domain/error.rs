//! Error taxonomy for fleet operations.

/// Errors produced while discovering, ordering, or releasing repositories.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("`{command}` failed in {repo}: {stderr}")]
    CommandFailed {
        repo: String,
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` timed out after {secs}s in {repo}")]
    CommandTimedOut {
        repo: String,
        command: String,
        secs: u64,
    },

    #[error("{host} is not supported for hosting API calls")]
    UnsupportedHost { host: String },

    #[error("hosting API returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    #[error("no version available to pin {module}")]
    MissingVersion { module: String },

    #[error("secret encryption is not supported; no sealing scheme is configured")]
    SecretEncryptionUnsupported,

    #[error("pipeline did not shut down cleanly; check for local changes and stashes in: {}", repos.join(", "))]
    ShutdownIncomplete { repos: Vec<String> },

    #[error("invalid {what}: {value}")]
    InvalidArgument { what: String, value: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetError {
    pub(crate) fn invalid(what: &str, value: impl Into<String>) -> Self {
        Self::InvalidArgument {
            what: what.to_string(),
            value: value.into(),
        }
    }

    /// True for a 401 from the hosting API.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Http { status: 401, .. })
    }
}

impl From<reqwest::Error> for FleetError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;
