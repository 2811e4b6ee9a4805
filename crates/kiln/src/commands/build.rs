//! One-shot site build command.

use std::path::Path;

use anyhow::Result;
use kiln_pipeline::Pipeline;

use super::config::{load_config, project_root};

/// Run the build command.
pub async fn run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let root = project_root(config_path)?;

    tracing::info!("Building site in {}", root.display());

    let pipeline = Pipeline::new(root, config)?;
    let result = tokio::task::spawn_blocking(move || pipeline.build()).await??;

    let written: usize = result.reports.iter().map(|r| r.written.len()).sum();
    tracing::info!(
        "Built {} files in {}ms",
        written,
        result.duration_ms
    );

    tracing::info!("Output: {}", result.output_dir.display());

    Ok(())
}
