//! Talking to the running daemon over its socket.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::cli::output::{self, Styled};
use crate::controller::{Ack, Message};

/// Send one message and wait for its acknowledgment.
pub async fn send(socket: &Path, message: &Message) -> Result<Ack> {
    let stream = UnixStream::connect(socket).await.with_context(|| {
        format!(
            "geomask is not running at {} (start it with 'geomask start')",
            socket.display()
        )
    })?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut req = serde_json::to_value(message)?;
    if let Value::Object(obj) = &mut req {
        obj.insert("id".to_string(), Value::from(message.kind()));
    }
    writer
        .write_all(format!("{req}\n").as_bytes())
        .await
        .context("failed to send request")?;
    writer.flush().await?;

    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .context("failed to read response")?;
    if line.trim().is_empty() {
        bail!("daemon closed the connection without answering");
    }
    let ack: Ack = serde_json::from_str(line.trim()).context("invalid response")?;
    Ok(ack)
}

/// Send a message and report the outcome; a failed ack becomes an error.
pub async fn run(socket: &Path, message: Message, done: &str) -> Result<Option<Value>> {
    let ack = send(socket, &message).await?;
    if output::is_json() {
        output::print_json(&serde_json::to_value(&ack)?);
    }
    if !ack.success {
        let code = ack.code.as_deref().unwrap_or("unknown");
        let msg = ack.error.as_deref().unwrap_or("unknown error");
        bail!("{} failed [{code}]: {msg}", message.kind());
    }
    if !output::is_json() && !output::is_quiet() {
        let s = Styled::new();
        eprintln!("  {} {done}", s.ok_sym());
    }
    Ok(ack.result)
}
