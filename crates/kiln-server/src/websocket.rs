//! WebSocket-based live reload.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use kiln_pipeline::config::slash_path;
use kiln_pipeline::ReloadSink;

/// Path of the WebSocket endpoint.
pub const RELOAD_ENDPOINT: &str = "/__livereload";

/// Path of the client script.
pub const RELOAD_SCRIPT: &str = "/__livereload.js";

/// Messages sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReloadMessage {
    /// Full page reload
    Reload,

    /// Swap a stylesheet without reloading
    Inject {
        /// URL path of the stylesheet
        path: String,
    },

    /// Connection established
    Connected,
}

/// Hub for broadcasting reload messages to all connected clients.
#[derive(Debug, Clone)]
pub struct ReloadHub {
    sender: broadcast::Sender<ReloadMessage>,
    output_dir: PathBuf,
}

impl ReloadHub {
    /// Create a hub for a site served from `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            sender,
            output_dir: output_dir.into(),
        }
    }

    /// Send a message to all connected clients.
    pub fn send(&self, msg: ReloadMessage) {
        // No receivers is fine
        let _ = self.sender.send(msg);
    }

    /// Subscribe to reload messages.
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// URL path of a file in the output tree.
    fn url_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.output_dir).ok()?;
        Some(format!("/{}", slash_path(relative)))
    }

    /// Messages for a batch of written files: one inject per stylesheet,
    /// a single reload for anything else.
    pub fn stream_messages(&self, changed: &[PathBuf]) -> Vec<ReloadMessage> {
        let mut messages = Vec::new();
        let mut needs_reload = false;

        for path in changed {
            let is_css = path.extension().is_some_and(|ext| ext == "css");
            match self.url_path(path) {
                Some(url) if is_css => messages.push(ReloadMessage::Inject { path: url }),
                _ => needs_reload = true,
            }
        }

        if needs_reload {
            messages.push(ReloadMessage::Reload);
        }
        messages
    }
}

impl ReloadSink for ReloadHub {
    fn reload(&self) {
        tracing::debug!("Reloading {} client(s)", self.subscriber_count());
        self.send(ReloadMessage::Reload);
    }

    fn stream(&self, changed: &[PathBuf]) {
        for msg in self.stream_messages(changed) {
            self.send(msg);
        }
    }
}

/// Generate the client-side live reload script.
pub fn reload_client_script(endpoint: &str) -> String {
    format!(
        r#"
(function() {{
  'use strict';

  const ws = new WebSocket((location.protocol === 'https:' ? 'wss://' : 'ws://') + location.host + '{}');
  let reconnectAttempts = 0;
  const maxReconnectAttempts = 10;

  function injectStylesheet(path) {{
    let swapped = false;
    document.querySelectorAll('link[rel="stylesheet"]').forEach(function(link) {{
      const url = new URL(link.href, location.href);
      if (url.pathname === path) {{
        url.searchParams.set('livereload', Date.now());
        link.href = url.toString();
        swapped = true;
      }}
    }});
    if (!swapped) {{
      location.reload();
    }}
  }}

  ws.onopen = function() {{
    console.log('[livereload] Connected');
    reconnectAttempts = 0;
  }};

  ws.onmessage = function(event) {{
    const msg = JSON.parse(event.data);

    switch (msg.type) {{
      case 'reload':
        location.reload();
        break;

      case 'inject':
        injectStylesheet(msg.path);
        break;

      case 'connected':
        console.log('[livereload] Server acknowledged connection');
        break;
    }}
  }};

  ws.onclose = function() {{
    console.log('[livereload] Disconnected');
    if (reconnectAttempts < maxReconnectAttempts) {{
      reconnectAttempts++;
      setTimeout(function() {{
        console.log('[livereload] Reconnecting...');
        location.reload();
      }}, 1000 * reconnectAttempts);
    }}
  }};

  ws.onerror = function(e) {{
    console.error('[livereload] WebSocket error:', e);
  }};
}})();
"#,
        endpoint
    )
}
