//! Development server command.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use kiln_pipeline::{dev_plan, Pipeline};
use kiln_server::{DevServer, DevServerConfig, ReloadHub};

use super::config::{load_config, project_root};

/// Run the dev server.
pub async fn run(config_path: &Path, port: Option<u16>, open: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let root = project_root(config_path)?;

    let mut server_config = DevServerConfig::from(&config.serve);
    if let Some(port) = port {
        server_config.port = port;
    }
    server_config.open = server_config.open && open;

    let pipeline = Pipeline::new(root, config)?;
    let hub = ReloadHub::new(pipeline.layout().output.clone());
    let pipeline = Arc::new(pipeline.with_reload(Arc::new(hub.clone())));

    let startup = Arc::clone(&pipeline);
    tokio::task::spawn_blocking(move || startup.run_plan(&dev_plan())).await??;

    tracing::info!("Starting development server on port {}", server_config.port);

    DevServer::new(server_config, pipeline, hub).start().await?;

    Ok(())
}
