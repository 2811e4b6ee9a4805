//! Loading kiln.toml and locating the project root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kiln_pipeline::SiteConfig;

/// Load configuration from `path` if it exists.
/// Returns an error if the config file exists but is malformed.
pub fn load_config(path: &Path) -> Result<SiteConfig> {
    if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: SiteConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        tracing::info!("Loaded config from {}", path.display());
        return Ok(config);
    }
    Ok(SiteConfig::default())
}

/// Absolute project root: the directory holding the config file.
pub fn project_root(config_path: &Path) -> Result<PathBuf> {
    let dir = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    dir.canonicalize()
        .with_context(|| format!("Project directory not found: {}", dir.display()))
}
