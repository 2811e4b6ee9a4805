//! Development server implementation.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use kiln_pipeline::config::ServeConfig;
use kiln_pipeline::{Layout, Pipeline, Task};

use crate::rules::WatchRules;
use crate::watcher::{FileWatcher, WatchEvent};
use crate::websocket::{reload_client_script, ReloadHub, ReloadMessage, RELOAD_ENDPOINT, RELOAD_SCRIPT};

/// Quiet period that closes a batch of file events.
const SETTLE: Duration = Duration::from_millis(200);

/// Configuration for the development server.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Host to bind to
    pub host: String,

    /// Open browser on start
    pub open: bool,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self::from(&ServeConfig::default())
    }
}

impl From<&ServeConfig> for DevServerConfig {
    fn from(serve: &ServeConfig) -> Self {
        Self {
            port: serve.port,
            host: serve.host.clone(),
            open: serve.open,
        }
    }
}

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid address {0}: {1}")]
    AddressError(String, String),

    #[error("Failed to bind to {0}: {1}")]
    BindError(SocketAddr, String),

    #[error("File watch error: {0}")]
    WatchError(String),

    #[error("Invalid watch rule: {0}")]
    RuleError(String),
}

/// Shared server state.
struct ServerState {
    output_dir: PathBuf,
    hub: ReloadHub,
}

/// Development server: serves the output tree, rebuilds on change and
/// pushes reloads to connected browsers.
pub struct DevServer {
    config: DevServerConfig,
    pipeline: Arc<Pipeline>,
    hub: ReloadHub,
}

impl DevServer {
    /// Create a new development server. `hub` should be the pipeline's reload sink.
    pub fn new(config: DevServerConfig, pipeline: Arc<Pipeline>, hub: ReloadHub) -> Self {
        Self {
            config,
            pipeline,
            hub,
        }
    }

    /// Start watching and serving. Runs until the process is terminated.
    pub async fn start(self) -> Result<(), ServerError> {
        let addr = resolve_addr(&self.config.host, self.config.port).await?;

        let layout = self.pipeline.layout().clone();
        let rules =
            WatchRules::standard(&layout).map_err(|e| ServerError::RuleError(e.to_string()))?;

        let (watcher, rx) = FileWatcher::new(&[layout.source.clone()])
            .map_err(|e| ServerError::WatchError(e.to_string()))?;

        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            watch_loop(rx, pipeline, rules, layout).await;
            // Keep watcher alive
            drop(watcher);
        });

        let state = Arc::new(ServerState {
            output_dir: self.pipeline.layout().output.clone(),
            hub: self.hub.clone(),
        });

        let app = Router::new()
            .route(RELOAD_ENDPOINT, get(ws_handler))
            .route(RELOAD_SCRIPT, get(reload_script_handler))
            .fallback(serve_output)
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;

        tracing::info!(
            "Serving {} at http://{}",
            self.pipeline.layout().output.display(),
            addr
        );

        if self.config.open {
            let url = format!("http://{}", addr);
            let _ = open::that(&url);
        }

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;

        Ok(())
    }
}

/// Resolve `host` (a name such as `localhost` or an IP literal) to a bind address.
async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    let address_error = |reason: String| ServerError::AddressError(format!("{}:{}", host, port), reason);

    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| address_error(e.to_string()))?;

    addrs
        .next()
        .ok_or_else(|| address_error("host resolved to no addresses".to_string()))
}

/// Collect events until the watcher goes quiet, then run the triggered sequences.
async fn watch_loop(
    mut rx: mpsc::Receiver<WatchEvent>,
    pipeline: Arc<Pipeline>,
    rules: WatchRules,
    layout: Layout,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(Some(event)) = tokio::time::timeout(SETTLE, rx.recv()).await {
            batch.push(event);
        }

        let changed: Vec<String> = batch
            .iter()
            .filter_map(|event| layout.relative_to_root(event.path()))
            .collect();

        for sequence in rules.plan(&changed) {
            tracing::debug!("Change in {:?} triggers {:?}", changed, sequence);
            run_sequence(Arc::clone(&pipeline), sequence).await;
        }
    }
}

/// Run one task sequence off the async runtime. Failures are logged; the
/// previous output stays in place.
async fn run_sequence(pipeline: Arc<Pipeline>, sequence: Vec<Task>) {
    let result = tokio::task::spawn_blocking(move || pipeline.run_series(&sequence)).await;

    match result {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!("Rebuild failed: {}", e),
        Err(e) => tracing::error!("Rebuild task panicked: {}", e),
    }
}

/// Map a request path to an HTML file under `root`, resolving directory indexes.
fn resolve_html(root: &Path, uri_path: &str) -> Option<PathBuf> {
    // Decode percent-encoded characters (e.g., %20 -> space)
    let decoded = urlencoding::decode(uri_path).ok()?;

    let mut path = root.to_path_buf();
    for segment in decoded.split('/').filter(|s| !s.is_empty()) {
        if segment == ".." || segment == "." || segment.contains('\\') {
            return None;
        }
        path.push(segment);
    }

    if path.is_dir() {
        path.push("index.html");
    }

    let is_html = path.extension().is_some_and(|ext| ext == "html");
    (is_html && path.is_file()).then_some(path)
}

/// Add the live reload client to an HTML document.
fn inject_reload_script(html: &str) -> String {
    let tag = format!(r#"<script src="{}"></script>"#, RELOAD_SCRIPT);
    match html.rfind("</body>") {
        Some(pos) => format!("{}{}\n{}", &html[..pos], tag, &html[pos..]),
        None => format!("{}\n{}", html, tag),
    }
}

/// Serve the output tree, adding the reload client to HTML pages.
async fn serve_output(State(state): State<Arc<ServerState>>, req: Request) -> Response {
    if let Some(path) = resolve_html(&state.output_dir, req.uri().path()) {
        match tokio::fs::read_to_string(&path).await {
            Ok(html) => return Html(inject_reload_script(&html)).into_response(),
            Err(e) => tracing::warn!("Failed to read {}: {}", path.display(), e),
        }
    }

    match ServeDir::new(&state.output_dir).oneshot(req).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

/// Handler for the live reload WebSocket endpoint.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn send_json(socket: &mut WebSocket, msg: &ReloadMessage) -> bool {
    let Ok(json) = serde_json::to_string(msg) else {
        return true;
    };
    socket.send(Message::Text(json.into())).await.is_ok()
}

/// Handle a WebSocket connection.
async fn handle_ws(mut socket: WebSocket, state: Arc<ServerState>) {
    let mut rx = state.hub.subscribe();

    if !send_json(&mut socket, &ReloadMessage::Connected).await {
        return;
    }

    // Forward reload messages to the client
    loop {
        match rx.recv().await {
            Ok(msg) => {
                if !send_json(&mut socket, &msg).await {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Client lagged behind by {} messages", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Handler for the live reload client script.
async fn reload_script_handler() -> impl IntoResponse {
    let script = reload_client_script(RELOAD_ENDPOINT);
    ([("content-type", "application/javascript")], script)
}
