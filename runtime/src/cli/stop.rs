//! Stop the running daemon.

use crate::cli::output::{self, Styled};
use crate::config::RuntimeConfig;
use anyhow::{Context, Result};
use std::time::Duration;

fn alive(pid: i32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Stop the daemon by reading the PID file and sending SIGTERM.
pub async fn run(config: &RuntimeConfig) -> Result<()> {
    let s = Styled::new();
    let pid_path = config.pid_file();

    if !pid_path.exists() {
        if !output::is_quiet() {
            eprintln!("  geomask is not running.");
        }
        return Ok(());
    }

    let pid_str = std::fs::read_to_string(&pid_path).context("failed to read PID file")?;
    let pid: i32 = pid_str.trim().parse().context("invalid PID in PID file")?;

    if !alive(pid) {
        let _ = std::fs::remove_file(&pid_path);
        let _ = std::fs::remove_file(&config.socket);
        if !output::is_quiet() {
            eprintln!("  Cleaned up stale PID file (process {pid} was not running).");
        }
        return Ok(());
    }

    if !output::is_quiet() {
        eprint!("  Stopping geomask (PID {pid})...");
    }
    std::process::Command::new("kill")
        .arg(pid.to_string())
        .output()
        .context("failed to send SIGTERM")?;

    // up to 5 seconds
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !alive(pid) {
            let _ = std::fs::remove_file(&pid_path);
            let _ = std::fs::remove_file(&config.socket);
            if !output::is_quiet() {
                eprintln!(" {}", s.ok_sym());
            }
            return Ok(());
        }
    }

    if !output::is_quiet() {
        eprintln!(" {}", s.warn_sym());
        eprintln!("  geomask may still be running. If it persists, try: kill -9 {pid}");
    }
    Ok(())
}
