//! Golden files on disk.
//!
//! Artifacts live in `_regtest_outputs/` next to the test source file. A
//! missing artifact reads as the empty string, so a first run with non-empty
//! output always mismatches instead of erroring.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{RegtestError, Result};
use crate::identity::ArtifactName;

pub const GOLDEN_DIR_NAME: &str = "_regtest_outputs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoldenStore {
    dir: PathBuf,
}

impl GoldenStore {
    /// Store for tests defined in `source_file`.
    pub fn for_source_file(source_file: &Path) -> Self {
        let parent = source_file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::at(parent.join(GOLDEN_DIR_NAME))
    }

    /// Store rooted at an explicit directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &ArtifactName) -> PathBuf {
        self.dir.join(name.as_str())
    }

    pub fn load(&self, name: &ArtifactName) -> Result<String> {
        let path = self.path_for(name);
        match fs::read_to_string(&path) {
            Ok(text) => {
                debug!(path = %path.display(), bytes = text.len(), "loaded golden output");
                Ok(text)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no golden output yet");
                Ok(String::new())
            }
            Err(err) => Err(RegtestError::storage(path, err)),
        }
    }

    /// Write `text` as the new golden output and return its path.
    ///
    /// The text goes to a hidden sibling file first and is renamed over the
    /// target, so concurrent readers see either the old or the new content.
    pub fn save(&self, name: &ArtifactName, text: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|err| RegtestError::storage(&self.dir, err))?;

        let target = self.path_for(name);
        let staging = self
            .dir
            .join(format!(".{}.{}.tmp", name.as_str(), std::process::id()));
        if let Err(err) = fs::write(&staging, text) {
            let _ = fs::remove_file(&staging);
            return Err(RegtestError::storage(staging, err));
        }
        if let Err(err) = fs::rename(&staging, &target) {
            let _ = fs::remove_file(&staging);
            return Err(RegtestError::storage(target, err));
        }
        info!(path = %target.display(), bytes = text.len(), "recorded golden output");
        Ok(target)
    }
}

/// Locate a `file!()` path on disk.
///
/// `file!()` is relative to the workspace root in workspace builds and to the
/// crate root otherwise, so candidates are tried from the manifest directory
/// upwards. Falls back to `manifest_dir.join(file)`.
pub fn resolve_source_file(manifest_dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }
    manifest_dir
        .ancestors()
        .map(|dir| dir.join(file))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| manifest_dir.join(file))
}
