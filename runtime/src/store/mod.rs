//! Persisted state store.
//!
//! A flat key-value store of JSON values. Each key is last-write-wins with
//! read-your-writes; there is no atomicity across keys, so callers mutate a
//! whole value (e.g. the proxy list) and write it back in one call.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::model::{Feature, FeatureToggle, ProxyList, Toggles};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Proxy collection (`Proxy[]`).
pub const KEY_PROXIES: &str = "proxies";
/// Selected user-agent override.
pub const KEY_UA: &str = "ua";
/// Catalog of selectable user-agent strings.
pub const KEY_USER_AGENTS: &str = "userAgent";
/// Hostnames where the frame suppressor leaves iframes alone.
pub const KEY_FRAME_ALLOW_LIST: &str = "list";

/// Key-value persistence used by the controller and the identity spoofer.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Every stored key at once.
    async fn snapshot(&self) -> Result<Map<String, Value>>;

    async fn proxies(&self) -> Result<ProxyList> {
        match self.get(KEY_PROXIES).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(ProxyList::default()),
        }
    }

    async fn set_proxies(&self, proxies: &ProxyList) -> Result<()> {
        self.set(KEY_PROXIES, serde_json::to_value(proxies)?).await
    }

    /// The user-agent override, if one is selected and non-empty.
    async fn ua_override(&self) -> Result<Option<String>> {
        Ok(self
            .get(KEY_UA)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty()))
    }

    async fn set_ua_override(&self, user_agent: Option<&str>) -> Result<()> {
        match user_agent {
            Some(ua) if !ua.is_empty() => self.set(KEY_UA, Value::String(ua.to_string())).await,
            _ => self.remove(KEY_UA).await,
        }
    }

    async fn user_agents(&self) -> Result<Vec<String>> {
        match self.get(KEY_USER_AGENTS).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn frame_allow_list(&self) -> Result<Vec<String>> {
        match self.get(KEY_FRAME_ALLOW_LIST).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn set_frame_allow_list(&self, hosts: &[String]) -> Result<()> {
        self.set(KEY_FRAME_ALLOW_LIST, serde_json::to_value(hosts)?).await
    }

    /// A feature toggle; `Enabled` when never written.
    async fn toggle(&self, feature: Feature) -> Result<FeatureToggle> {
        match self.get(feature.key()).await? {
            Some(value) => Ok(serde_json::from_value(value).unwrap_or_default()),
            None => Ok(FeatureToggle::default()),
        }
    }

    async fn set_toggle(&self, feature: Feature, state: FeatureToggle) -> Result<()> {
        self.set(feature.key(), serde_json::to_value(state)?).await
    }

    async fn toggles(&self) -> Result<Toggles> {
        Ok(Toggles {
            webrtc: self.toggle(Feature::WebRtc).await?,
            iframes: self.toggle(Feature::Iframes).await?,
        })
    }
}
