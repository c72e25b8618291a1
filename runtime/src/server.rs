//! Unix-socket daemon speaking newline-delimited JSON.
//!
//! Each request line is a controller message with an optional `id`:
//! `{"id": 1, "type": "activateProxy", "host": "1.2.3.4", "port": 8080}`.
//! Each response line echoes the id next to the acknowledgment:
//! `{"id": 1, "success": true, "result": {...}}`.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::controller::{Ack, Controller, Message};
use crate::error::GeomaskError;

pub struct Server {
    socket_path: PathBuf,
    controller: Arc<Controller>,
    shutdown: Arc<Notify>,
}

impl Server {
    pub fn new(socket_path: &Path, controller: Arc<Controller>) -> Self {
        Self {
            socket_path: socket_path.to_path_buf(),
            controller,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Notified once to stop accepting connections.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Bind and serve until shutdown is notified.
    pub async fn start(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).ok();
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("failed to bind {}", self.socket_path.display()))?;
        info!("listening on {}", self.socket_path.display());

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = accepted.context("accept failed")?;
                    let controller = Arc::clone(&self.controller);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, controller).await {
                            debug!("connection closed: {e}");
                        }
                    });
                }
                _ = self.shutdown.notified() => {
                    info!("server shutting down");
                    break;
                }
            }
        }

        std::fs::remove_file(&self.socket_path).ok();
        Ok(())
    }
}

async fn serve_connection(stream: UnixStream, controller: Arc<Controller>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = handle_line(&controller, line).await;
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Decode one request line, run it, and build the response object.
pub async fn handle_line(controller: &Controller, line: &str) -> Value {
    let (id, parsed) = match decode(line) {
        Ok((id, message)) => (id, Ok(message)),
        Err((id, e)) => (id, Err(e)),
    };
    let ack = match parsed {
        Ok(message) => controller.handle(message).await,
        Err(e) => {
            warn!("rejected request: {e}");
            Ack::failed(&e)
        }
    };

    let mut response = json!({ "id": id });
    if let (Value::Object(out), Ok(Value::Object(fields))) = (&mut response, serde_json::to_value(&ack)) {
        out.extend(fields);
    }
    response
}

fn decode(line: &str) -> std::result::Result<(Value, Message), (Value, GeomaskError)> {
    let mut value: Value = serde_json::from_str(line)
        .map_err(|e| (Value::Null, GeomaskError::Protocol(format!("invalid JSON: {e}"))))?;
    let id = value
        .as_object_mut()
        .and_then(|obj| obj.remove("id"))
        .unwrap_or(Value::Null);
    match serde_json::from_value(value) {
        Ok(message) => Ok((id, message)),
        Err(e) => Err((id, GeomaskError::Protocol(format!("invalid message: {e}")))),
    }
}
