//! Hosting-provider credentials persisted in the home directory.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::error::{FleetError, Result};

/// File name of the credential store under the home directory.
pub const CREDENTIALS_FILE: &str = ".modfleetrc";

/// Environment variable overriding the credential file location.
pub const CREDENTIALS_ENV: &str = "MODFLEET_CREDENTIALS";

/// API user and token.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.user.trim().is_empty() && !self.token.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Interactive source of credentials (username, then token).
pub trait CredentialPrompt: Send + Sync {
    fn prompt(&self) -> Result<Credentials>;
}

/// Lazily loaded, file-backed credentials.
///
/// When nothing usable is stored and a prompt is configured, the prompt is
/// asked and its answer saved. Without a prompt the lookup fails instead of
/// blocking on a terminal nobody is watching.
pub struct CredentialStore {
    path: PathBuf,
    prompt: Option<Arc<dyn CredentialPrompt>>,
    cached: Mutex<Option<Credentials>>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .field("interactive", &self.prompt.is_some())
            .finish()
    }
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, prompt: Option<Arc<dyn CredentialPrompt>>) -> Self {
        Self {
            path: path.into(),
            prompt,
            cached: Mutex::new(None),
        }
    }

    /// Store at `$MODFLEET_CREDENTIALS`, or `~/.modfleetrc`.
    pub fn at_default_location(prompt: Option<Arc<dyn CredentialPrompt>>) -> Result<Self> {
        Ok(Self::new(default_path()?, prompt))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file. Missing, unreadable, or incomplete files yield `None`.
    pub fn load(&self) -> Option<Credentials> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<Credentials>(&raw) {
            Ok(creds) if creds.is_complete() => Some(creds),
            Ok(_) => {
                debug!(path = %self.path.display(), "Stored credentials are incomplete");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable credential file");
                None
            }
        }
    }

    /// Persist `creds`, readable only by the current user.
    pub fn save(&self, creds: &Credentials) -> Result<()> {
        let json = serde_json::to_string_pretty(creds)?;
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(json.as_bytes())?;
        self.set_cached(Some(creds.clone()));
        Ok(())
    }

    /// Forget cached credentials and delete the file.
    pub fn clear(&self) -> Result<()> {
        self.set_cached(None);
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Removed stored credentials");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Cached, stored, or freshly prompted credentials.
    ///
    /// The prompt blocks on the terminal, so it runs on the blocking pool.
    pub async fn obtain(&self) -> Result<Credentials> {
        if let Some(creds) = self.cached() {
            return Ok(creds);
        }
        if let Some(creds) = self.load() {
            self.set_cached(Some(creds.clone()));
            return Ok(creds);
        }
        let Some(prompt) = self.prompt.clone() else {
            return Err(FleetError::CredentialsUnavailable(format!(
                "no usable credentials in {} and prompting is disabled",
                self.path.display()
            )));
        };
        let creds = tokio::task::spawn_blocking(move || prompt.prompt())
            .await
            .map_err(|e| {
                FleetError::CredentialsUnavailable(format!("credential prompt aborted: {e}"))
            })??;
        if !creds.is_complete() {
            return Err(FleetError::CredentialsUnavailable(
                "username and token are both required".to_string(),
            ));
        }
        self.save(&creds)?;
        Ok(creds)
    }

    fn cached(&self) -> Option<Credentials> {
        self.cached.lock().ok().and_then(|guard| guard.clone())
    }

    fn set_cached(&self, creds: Option<Credentials>) {
        if let Ok(mut guard) = self.cached.lock() {
            *guard = creds;
        }
    }
}

fn default_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CREDENTIALS_ENV) {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|home| home.join(CREDENTIALS_FILE))
        .ok_or_else(|| {
            FleetError::CredentialsUnavailable("cannot locate the home directory".to_string())
        })
}
