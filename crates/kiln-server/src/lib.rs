//! Development server for kiln sites.
//!
//! Serves the output tree, reruns pipeline tasks when sources change and
//! pushes live reload messages to connected browsers over a WebSocket.

pub mod rules;
pub mod server;
pub mod watcher;
pub mod websocket;

pub use rules::{WatchRule, WatchRules};
pub use server::{DevServer, DevServerConfig, ServerError};
pub use watcher::{FileWatcher, WatchEvent};
pub use websocket::{ReloadHub, ReloadMessage};
