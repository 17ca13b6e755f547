//! Repository secret payloads.
//!
//! The hosting provider only accepts secrets sealed against the repository's
//! public key. No sealing scheme ships with this crate: [`UnsupportedSealer`]
//! refuses, and a real [`SecretSealer`] must be injected to upload secrets.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::error::{FleetError, Result};

/// A repository's secret-encryption public key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoPublicKey {
    pub key_id: String,
    /// Base64-encoded key material.
    pub key: String,
}

/// Upload body for a single secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SealedSecret {
    pub encrypted_value: String,
    pub key_id: String,
}

/// Encrypts a plaintext secret for a repository.
pub trait SecretSealer: Send + Sync {
    fn seal(&self, key: &RepoPublicKey, plaintext: &[u8]) -> Result<SealedSecret>;
}

/// Sealer used when no encryption scheme is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSealer;

impl SecretSealer for UnsupportedSealer {
    fn seal(&self, _key: &RepoPublicKey, _plaintext: &[u8]) -> Result<SealedSecret> {
        Err(FleetError::SecretEncryptionUnsupported)
    }
}

/// Secret name derived from a payload file name: upper-cased, with anything
/// outside `[A-Z0-9_]` replaced by `_`.
pub fn secret_name(path: &Path) -> Result<String> {
    let stem = path
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| FleetError::invalid("secret file", path.display().to_string()))?;
    let name: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(FleetError::invalid("secret name", name));
    }
    Ok(name)
}
