//! `geomask proxy ...`: manage the stored proxy list through the daemon.

use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::client;
use crate::cli::output::{self, Styled};
use crate::config::RuntimeConfig;
use crate::controller::Message;
use crate::model::{Proxy, ProxyList};

pub async fn add(config: &RuntimeConfig, entries: Vec<String>) -> Result<()> {
    let count = entries.len();
    client::run(
        &config.socket,
        Message::AddProxies { lines: entries },
        &format!("{count} proxy entries saved"),
    )
    .await?;
    Ok(())
}

/// One entry per line; blank lines and `#` comments are skipped by the daemon.
pub async fn import(config: &RuntimeConfig, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let lines: Vec<String> = text.lines().map(String::from).collect();
    let result = client::run(
        &config.socket,
        Message::AddProxies { lines },
        &format!("imported {}", file.display()),
    )
    .await?;
    if let Some(added) = result.and_then(|r| r.get("added").and_then(|v| v.as_u64())) {
        if !output::is_quiet() && !output::is_json() {
            eprintln!("    {added} entries");
        }
    }
    Ok(())
}

pub async fn remove(config: &RuntimeConfig, entry: &str) -> Result<()> {
    let proxy = Proxy::parse_line(entry)?;
    client::run(
        &config.socket,
        Message::RemoveProxy {
            host: proxy.host.clone(),
            port: proxy.port,
        },
        &format!("removed {}", proxy.key()),
    )
    .await?;
    Ok(())
}

pub async fn clear(config: &RuntimeConfig) -> Result<()> {
    client::run(&config.socket, Message::ClearProxies, "proxy list cleared").await?;
    Ok(())
}

pub async fn list(config: &RuntimeConfig) -> Result<()> {
    let ack = client::send(&config.socket, &Message::ListProxies).await?;
    if output::is_json() {
        output::print_json(&serde_json::to_value(&ack)?);
        return Ok(());
    }
    let proxies: ProxyList = match ack.result {
        Some(value) => serde_json::from_value(value).context("invalid proxy list")?,
        None => ProxyList::default(),
    };

    let s = Styled::new();
    output::print_section(&s, &format!("Proxies ({})", proxies.len()));
    if proxies.is_empty() {
        eprintln!("    (none)");
    }
    for proxy in proxies.iter() {
        let marker = if proxy.headers_active {
            s.ok_sym().to_string()
        } else if proxy.is_active {
            s.yellow("*")
        } else {
            " ".to_string()
        };
        let user = match proxy.credentials() {
            Some((user, pass)) => format!("{user}:{}", output::mask(pass)),
            None => String::new(),
        };
        let locale = match (&proxy.language, &proxy.timezone) {
            (Some(l), Some(t)) => s.dim(&format!("{l} {t}")),
            _ => String::new(),
        };
        eprintln!("    {marker} {:<24} {user:<16} {locale}", proxy.key().to_string());
    }
    Ok(())
}
