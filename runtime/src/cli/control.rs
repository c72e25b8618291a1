//! Activation commands: proxy, headers, frame suppressor, toggles and user-agent.

use anyhow::Result;
use serde_json::Value;

use crate::cli::client;
use crate::cli::output;
use crate::config::RuntimeConfig;
use crate::controller::Message;
use crate::model::{Feature, FeatureToggle, Proxy};

fn print_profile(result: Option<Value>) {
    if output::is_quiet() || output::is_json() {
        return;
    }
    if let Some(profile) = result {
        let get = |k: &str| profile.get(k).and_then(Value::as_str).unwrap_or("-").to_string();
        output::print_check(" ", "Language:", &get("language"));
        output::print_check(" ", "Timezone:", &get("timezone"));
        output::print_check(" ", "Platform:", &get("platform"));
    }
}

pub async fn activate(config: &RuntimeConfig, entry: &str, headers: bool) -> Result<()> {
    let proxy = Proxy::parse_line(entry)?;
    let (username, password) = match proxy.credentials() {
        Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
        None => (None, None),
    };
    let result = client::run(
        &config.socket,
        Message::ActivateProxy {
            host: proxy.host.clone(),
            port: proxy.port,
            username,
            password,
        },
        &format!("routing through {}", proxy.key()),
    )
    .await?;
    print_profile(result);

    if headers {
        headers_on(config, entry, "", "").await?;
    }
    Ok(())
}

pub async fn deactivate(config: &RuntimeConfig, entry: Option<&str>) -> Result<()> {
    match entry {
        Some(entry) => {
            let proxy = Proxy::parse_line(entry)?;
            client::run(
                &config.socket,
                Message::DeactivateProxy {
                    host: proxy.host.clone(),
                    port: proxy.port,
                },
                &format!("{} deactivated", proxy.key()),
            )
            .await?;
        }
        None => {
            client::run(&config.socket, Message::DeactivateAllProxies, "all proxies deactivated")
                .await?;
        }
    }
    Ok(())
}

pub async fn headers_on(config: &RuntimeConfig, entry: &str, language: &str, timezone: &str) -> Result<()> {
    let proxy = Proxy::parse_line(entry)?;
    let result = client::run(
        &config.socket,
        Message::ActivateHeaders {
            host: proxy.host.clone(),
            port: proxy.port,
            language: language.to_string(),
            timezone: timezone.to_string(),
        },
        "identity spoofing on",
    )
    .await?;
    print_profile(result);
    Ok(())
}

pub async fn headers_off(config: &RuntimeConfig) -> Result<()> {
    client::run(&config.socket, Message::DeactivateHeaders, "identity spoofing off").await?;
    Ok(())
}

pub async fn frames(config: &RuntimeConfig, on: bool) -> Result<()> {
    let (message, done) = if on {
        (Message::ActivateContentScript, "frame suppressor on")
    } else {
        (Message::DeactivateContentScript, "frame suppressor off")
    };
    client::run(&config.socket, message, done).await?;
    Ok(())
}

/// Add `host` to the frame allow-list, or take it off with `remove`.
pub async fn allow_frames(config: &RuntimeConfig, host: &str, remove: bool) -> Result<()> {
    let (message, done) = if remove {
        (Message::DisallowFrames { host: host.to_string() }, format!("frames removed on {host}"))
    } else {
        (Message::AllowFrames { host: host.to_string() }, format!("frames allowed on {host}"))
    };
    client::run(&config.socket, message, &done).await?;
    Ok(())
}

pub async fn toggle(config: &RuntimeConfig, feature: Feature, state: FeatureToggle) -> Result<()> {
    client::run(
        &config.socket,
        Message::SetToggle { feature, state },
        &format!("{} {state}", feature.key()),
    )
    .await?;
    Ok(())
}

pub async fn user_agent(config: &RuntimeConfig, user_agent: Option<String>) -> Result<()> {
    let done = match &user_agent {
        Some(_) => "user-agent override saved",
        None => "user-agent override cleared",
    };
    client::run(&config.socket, Message::SetUserAgent { user_agent }, done).await?;
    Ok(())
}

pub async fn open(config: &RuntimeConfig, url: &str) -> Result<()> {
    client::run(
        &config.socket,
        Message::OpenTab { url: url.to_string() },
        &format!("opened {url}"),
    )
    .await?;
    Ok(())
}
