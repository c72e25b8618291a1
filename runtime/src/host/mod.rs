//! Browser host: the platform side the controller drives.
//!
//! A host owns the process-wide proxy route, the installed header rules,
//! scripts run in open tabs or registered for future documents, the WebRTC
//! policy and the status indicator. The controller is its only caller.

pub mod chromium;
pub mod recording;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::controller::auth::{AuthChallenge, AuthDecision};
use crate::controller::icon::IconState;
use crate::error::Result;
use crate::rules::HeaderRule;

pub use chromium::{ChromiumHost, ChromiumOptions};
pub use recording::RecordingHost;

/// A fixed single-proxy route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRoute {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl ProxyRoute {
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: "http".to_string(),
            host: host.into(),
            port,
        }
    }

    /// `scheme://host:port`, the form Chromium's proxy settings take.
    pub fn server(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl fmt::Display for ProxyRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.server())
    }
}

/// Scripts that can be registered for future documents, one per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptSlot {
    IdentitySpoofer,
    FrameSuppressor,
    WebRtcGuard,
}

/// WebRTC IP-handling policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebRtcPolicy {
    #[default]
    Default,
    /// Only proxied (relay) candidates.
    Protected,
}

#[async_trait]
pub trait BrowserHost: Send + Sync {
    /// Replace the route. Failure maps to `GeomaskError::ProxyConfig`.
    async fn set_proxy_route(&self, route: &ProxyRoute) -> Result<()>;

    /// Back to direct connections. Clearing an absent route is not an error.
    async fn clear_proxy_route(&self) -> Result<()>;

    async fn proxy_route(&self) -> Result<Option<ProxyRoute>>;

    /// Remove `remove_ids`, then add `add_rules`.
    ///
    /// Removing an unknown id is a no-op; adding an id that is still
    /// installed is an error.
    async fn update_rules(&self, remove_ids: &[u32], add_rules: &[HeaderRule]) -> Result<()>;

    async fn installed_rules(&self) -> Result<Vec<HeaderRule>>;

    /// Run `source` once in every open tab. Returns how many tabs ran it.
    async fn run_in_open_tabs(&self, source: &str) -> Result<usize>;

    /// Run `source` at the start of every future document, replacing the slot's previous script.
    async fn register_document_script(&self, slot: ScriptSlot, source: &str) -> Result<()>;

    /// Unregistering an empty slot is not an error.
    async fn unregister_document_script(&self, slot: ScriptSlot) -> Result<()>;

    async fn registered_slots(&self) -> Result<Vec<ScriptSlot>>;

    async fn set_webrtc_policy(&self, policy: WebRtcPolicy) -> Result<()>;

    async fn set_indicator(&self, state: IconState) -> Result<()>;

    async fn open_tab(&self, url: &str) -> Result<()>;
}

/// Answers proxy authentication challenges raised by the network stack.
#[async_trait]
pub trait AuthResponder: Send + Sync {
    async fn respond(&self, challenge: &AuthChallenge) -> AuthDecision;
}
