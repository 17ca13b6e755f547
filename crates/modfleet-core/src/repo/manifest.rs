//! Go module manifest (`go.mod`) and lock file (`go.sum`) probes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::RepoHandle;
use crate::domain::error::Result;
use crate::domain::options::ImportMode;

pub const MANIFEST_FILE: &str = "go.mod";
pub const LOCK_FILE: &str = "go.sum";

const REPLACE_HEADER: &str = "// Local replacements";

impl RepoHandle {
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.path.join(LOCK_FILE)
    }

    /// Repositories without a manifest are not tracked modules.
    pub fn has_manifest(&self) -> bool {
        self.manifest_path().is_file()
    }

    pub fn read_manifest(&self) -> Option<String> {
        fs::read_to_string(self.manifest_path()).ok()
    }

    pub fn read_lock(&self) -> Option<String> {
        fs::read_to_string(self.lock_path()).ok()
    }

    /// The manifest names `module` as a requirement.
    pub fn imports_directly(&self, module: &str) -> bool {
        self.read_manifest()
            .is_some_and(|content| declares_module(&content, module))
    }

    /// The lock file resolves `module`, directly or transitively.
    pub fn resolves(&self, module: &str) -> bool {
        self.read_lock()
            .is_some_and(|content| declares_module(&content, module))
    }

    pub fn depends_on(&self, module: &str, mode: ImportMode) -> bool {
        match mode {
            ImportMode::Direct => self.imports_directly(module),
            ImportMode::Recursive => self.resolves(module),
        }
    }

    /// Delete the manifest and lock files; missing files are fine.
    pub fn clear_manifest_files(&self) -> Result<()> {
        remove_if_present(&self.manifest_path())?;
        self.remove_lock_file()
    }

    pub fn remove_lock_file(&self) -> Result<()> {
        remove_if_present(&self.lock_path())
    }

    /// Append `replace module => path` directives under a marker comment.
    pub fn append_replace_directives(&self, replacements: &[(String, PathBuf)]) -> Result<()> {
        let mut block = format!("\n\n{REPLACE_HEADER}\n\n");
        for (module, path) in replacements {
            block.push_str(&format!("replace {module} => {}\n", path.display()));
        }
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(self.manifest_path())?;
        file.write_all(block.as_bytes())?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Whether `content` contains `module` followed by a version token.
///
/// Matches `require` lines in `go.mod` and every entry in `go.sum`, but not
/// the `module` directive or replace targets.
pub fn declares_module(content: &str, module: &str) -> bool {
    content.lines().any(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        tokens
            .windows(2)
            .any(|pair| pair[0] == module && pair[1].starts_with('v'))
    })
}
