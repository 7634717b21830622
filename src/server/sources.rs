//! Resolving source ids to log files.

use crate::error::{FilterError, Result};
use crate::server::protocol::SourceInfo;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Maps client-facing source ids onto readable files
pub trait SourceResolver: Send + Sync {
    /// Path of an existing file, or [`FilterError::SourceNotFound`]
    fn resolve(&self, source_id: &str) -> Result<PathBuf>;

    /// Sources offered for selection
    fn list(&self) -> Result<Vec<SourceInfo>>;
}

/// Files directly inside one log directory. Ids are plain file names.
pub struct LogDirectory {
    root: PathBuf,
    globs: GlobSet,
}

impl LogDirectory {
    pub fn new(root: impl Into<PathBuf>, patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| FilterError::invalid(format!("bad source glob {:?}: {}", pattern, e)))?;
            builder.add(glob);
        }
        let globs = builder
            .build()
            .map_err(|e| FilterError::invalid(format!("bad source globs: {}", e)))?;

        Ok(Self {
            root: root.into(),
            globs,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceResolver for LogDirectory {
    fn resolve(&self, source_id: &str) -> Result<PathBuf> {
        let relative = Path::new(source_id);
        let mut components = relative.components();
        let is_plain_name = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !is_plain_name {
            return Err(FilterError::invalid(format!("bad source id: {:?}", source_id)));
        }

        let path = self.root.join(relative);
        if path.is_file() {
            Ok(path)
        } else {
            Err(FilterError::SourceNotFound(source_id.to_string()))
        }
    }

    fn list(&self) -> Result<Vec<SourceInfo>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sources = Vec::new();
        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.globs.is_match(&name) {
                sources.push(SourceInfo {
                    id: name,
                    size_bytes: metadata.len(),
                });
            }
        }
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }
}
