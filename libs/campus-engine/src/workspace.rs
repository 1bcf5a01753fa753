//! Per-request staging arena for submitted files.
//!
//! Every grading call gets its own temporary directory, removed when the
//! arena drops. Two submissions can never share a staging directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::EngineError;

pub struct StagingArea {
    dir: TempDir,
}

/// What was actually written; rejected paths skip only their own file.
#[derive(Debug, Default)]
pub struct StageReport {
    pub staged: Vec<PathBuf>,
    pub rejected: Vec<String>,
}

impl StagingArea {
    pub fn create() -> Result<Self, EngineError> {
        let dir = tempfile::Builder::new()
            .prefix("campus-grade-")
            .tempdir()?;
        debug!(path = %dir.path().display(), "staging arena created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Materialize submitted files under the arena root. A path that is
    /// absolute, climbs out of the root, or otherwise fails resolution is
    /// rejected and reported; the remaining valid files are still written.
    pub fn stage_files(
        &self,
        files: &BTreeMap<String, String>,
    ) -> Result<StageReport, EngineError> {
        let mut report = StageReport::default();
        for (rel, content) in files {
            match self.resolve(rel) {
                Ok(target) => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&target, content)?;
                    report.staged.push(target);
                }
                Err(err) => {
                    warn!(path = %rel, "rejected submitted path: {err}");
                    report.rejected.push(rel.clone());
                }
            }
        }
        Ok(report)
    }

    /// Write a single file (e.g. raw submitted code) under the arena root.
    pub fn write_file(&self, rel: &str, content: &str) -> Result<PathBuf, EngineError> {
        let target = self.resolve(rel)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        Ok(target)
    }

    /// Seed the declared starter file, but only when nothing already sits
    /// at that path. Returns whether the file was written. An existing file
    /// is never silently overwritten.
    pub fn seed_starter(&self, rel: &str, content: &str) -> Result<bool, EngineError> {
        let target = self.resolve(rel)?;
        if target.exists() {
            return Ok(false);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        Ok(true)
    }

    fn resolve(&self, rel: &str) -> Result<PathBuf, EngineError> {
        let path = Path::new(rel);
        if path.is_absolute() {
            return Err(EngineError::ForbiddenPath(rel.to_string()));
        }
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(EngineError::ForbiddenPath(rel.to_string())),
            }
        }
        let target = self.dir.path().join(path);
        if !target.starts_with(self.dir.path()) {
            return Err(EngineError::ForbiddenPath(rel.to_string()));
        }
        Ok(target)
    }
}
