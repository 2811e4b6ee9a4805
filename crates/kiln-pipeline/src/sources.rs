//! Source file selection by glob pattern.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use walkdir::WalkDir;

use crate::config::slash_path;
use crate::tasks::PipelineError;

/// Compile a glob where `*` never crosses a `/`.
pub fn glob(pattern: &str) -> Result<GlobMatcher, PipelineError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| PipelineError::PatternError(format!("{}: {}", pattern, e)))
}

/// Collect the files under `base` whose base-relative path matches `pattern`.
///
/// A missing `base` yields no files. Results are sorted so every task
/// processes its inputs in a stable order.
pub fn collect(base: &Path, pattern: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let matcher = glob(pattern)?;

    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(base).follow_links(true) {
        let entry =
            entry.map_err(|e| PipelineError::ReadError(format!("{}: {}", base.display(), e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(base) else {
            continue;
        };
        if matcher.is_match(slash_path(relative)) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// Path of `path` relative to `base`, falling back to the file name.
pub fn relative(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.file_name().map(PathBuf::from).unwrap_or_default())
}
