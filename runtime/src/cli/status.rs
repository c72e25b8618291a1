//! Show the daemon's activation state.

use crate::cli::client;
use crate::cli::output::{self, Styled};
use crate::config::RuntimeConfig;
use crate::controller::Message;
use anyhow::{bail, Result};
use serde_json::Value;

pub async fn run(config: &RuntimeConfig) -> Result<()> {
    let s = Styled::new();
    let ack = match client::send(&config.socket, &Message::Status).await {
        Ok(ack) => ack,
        Err(e) => {
            if output::is_json() {
                output::print_json(&serde_json::json!({ "running": false }));
                return Ok(());
            }
            eprintln!("  {e:#}");
            std::process::exit(1);
        }
    };

    if output::is_json() {
        output::print_json(&serde_json::to_value(&ack)?);
        return Ok(());
    }
    if !ack.success {
        bail!("status failed: {}", ack.error.unwrap_or_default());
    }
    let result = ack.result.unwrap_or(Value::Null);
    let field = |name: &str| result.get(name).cloned().unwrap_or(Value::Null);

    eprintln!();
    output::print_section(&s, &format!("geomask v{}", env!("CARGO_PKG_VERSION")));

    match field("active").as_object() {
        Some(active) => {
            let host = active.get("host").and_then(Value::as_str).unwrap_or("?");
            let port = active.get("port").and_then(Value::as_u64).unwrap_or(0);
            output::print_check(s.ok_sym(), "Proxy:", &format!("{host}:{port}"));
            let locale = format!(
                "{} / {}",
                active.get("language").and_then(Value::as_str).unwrap_or("-"),
                active.get("timezone").and_then(Value::as_str).unwrap_or("-")
            );
            output::print_check(" ", "Locale:", &locale);
        }
        None => output::print_check(s.warn_sym(), "Proxy:", "none active"),
    }

    let headers = field("headersActive").as_bool().unwrap_or(false);
    output::print_check(
        if headers { s.ok_sym() } else { " " },
        "Headers:",
        if headers { "spoofing" } else { "off" },
    );

    if let Some(toggles) = field("toggles").as_object() {
        for (name, state) in toggles {
            output::print_check(" ", &format!("{name}:"), state.as_str().unwrap_or("?"));
        }
    }
    let ua = field("userAgent");
    let ua_label = if field("uaOverride").as_bool().unwrap_or(false) {
        "User-Agent:"
    } else {
        "User-Agent*:"
    };
    output::print_check(" ", ua_label, &s.dim(ua.as_str().unwrap_or("?")));

    let rules = field("ruleIds")
        .as_array()
        .map(|ids| ids.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))
        .unwrap_or_default();
    output::print_check(" ", "Rules:", if rules.is_empty() { "none" } else { &rules });
    let allowed = field("frameAllowList")
        .as_array()
        .map(|hosts| hosts.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(", "))
        .unwrap_or_default();
    if !allowed.is_empty() {
        output::print_check(" ", "Frames ok:", &allowed);
    }
    output::print_check(" ", "Icon:", &s.green(field("icon").as_str().unwrap_or("?")));
    output::print_check(
        " ",
        "Proxies:",
        &field("proxyCount").as_u64().unwrap_or(0).to_string(),
    );
    eprintln!();
    Ok(())
}
