//! Pass-through copies and the output cleaner.

use std::fs;
use std::path::{Path, PathBuf};

use crate::sources;
use crate::tasks::PipelineError;

/// Fonts shipped alongside the site.
pub const FONT_PATTERN: &str = "*.{eot,woff,ttf,otf,woff2}";

/// Static files: anything with an extension, top level only.
pub const STATIC_PATTERN: &str = "*.*";

/// Delete the output tree. A missing directory is not an error.
pub fn clean(output: &Path) -> Result<(), PipelineError> {
    if !output.exists() {
        return Ok(());
    }
    tracing::info!("Removing old files from {}", output.display());
    fs::remove_dir_all(output)
        .map_err(|e| PipelineError::WriteError(format!("{}: {}", output.display(), e)))
}

/// Copy files under `base` matching `pattern` into `dest`, keeping relative paths.
pub fn copy_matching(base: &Path, pattern: &str, dest: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut written = Vec::new();
    for file in sources::collect(base, pattern)? {
        let target = dest.join(sources::relative(&file, base));
        copy_file(&file, &target)?;
        written.push(target);
    }
    Ok(written)
}

/// Copy a single named file; it must exist.
pub fn copy_required(source: &Path, target: &Path) -> Result<PathBuf, PipelineError> {
    if !source.is_file() {
        return Err(PipelineError::MissingSource(source.to_path_buf()));
    }
    copy_file(source, target)?;
    Ok(target.to_path_buf())
}

fn copy_file(source: &Path, target: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::WriteError(e.to_string()))?;
    }
    fs::copy(source, target)
        .map(|_| ())
        .map_err(|e| PipelineError::WriteError(format!("{}: {}", target.display(), e)))
}
