//! The privileged controller.
//!
//! One [`Controller`] per process owns every mutation of the proxy route,
//! the installed header rules, the registered page scripts and the
//! persisted activation flags. Operations are serialized on a single lock
//! and read their state from the store on every call; nothing is cached
//! between operations.

pub mod auth;
pub mod icon;
pub mod messages;

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::AuditLogger;
use crate::error::{GeomaskError, Result};
use crate::frames;
use crate::geo::{resolve_locale, GeoLocator};
use crate::host::{BrowserHost, ProxyRoute, ScriptSlot, WebRtcPolicy};
use crate::identity::{IdentityPatch, RealmDelivery};
use crate::model::{
    Feature, FeatureToggle, IdentityProfile, Locale, Proxy, ProxyList, Toggles,
};
use crate::rules::{compile, HeaderRuleSet, RULE_IDS};
use crate::store::{StateStore, KEY_PROXIES};

pub use auth::{ActiveProxyAuth, AuthChallenge, AuthDecision, PendingProxy};
pub use icon::{IconInputs, IconState};
pub use messages::{Ack, Message};

/// Chrome 124 on Windows 10, used when no user-agent override is stored.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

pub const PRECONDITION_ACTIVATE_FIRST: &str = "activate the proxy first";

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub default_user_agent: String,
    /// Upper bound on a geolocation lookup before falling back.
    pub geo_timeout: Duration,
    pub delivery: RealmDelivery,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_user_agent: DEFAULT_USER_AGENT.to_string(),
            geo_timeout: Duration::from_millis(5000),
            delivery: RealmDelivery::default(),
        }
    }
}

/// Snapshot returned by the `status` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub active: Option<Proxy>,
    pub headers_active: bool,
    pub toggles: Toggles,
    pub user_agent: String,
    pub ua_override: bool,
    /// Selectable user-agent catalog.
    pub user_agents: Vec<String>,
    /// Hostnames the frame suppressor leaves alone.
    pub frame_allow_list: Vec<String>,
    pub icon: IconState,
    pub rule_ids: Vec<u32>,
    pub route: Option<ProxyRoute>,
    pub proxy_count: usize,
}

pub struct Controller {
    store: Arc<dyn StateStore>,
    host: Arc<dyn BrowserHost>,
    geo: Arc<dyn GeoLocator>,
    config: ControllerConfig,
    audit: Option<AuditLogger>,
    pending: Arc<PendingProxy>,
    op: Mutex<()>,
}

impl Controller {
    pub fn new(
        store: Arc<dyn StateStore>,
        host: Arc<dyn BrowserHost>,
        geo: Arc<dyn GeoLocator>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            host,
            geo,
            config,
            audit: None,
            pending: Arc::default(),
            op: Mutex::new(()),
        }
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Publish records mid-activation to the auth responder sharing `pending`.
    pub fn with_pending(mut self, pending: Arc<PendingProxy>) -> Self {
        self.pending = pending;
        self
    }

    /// Route through `proxy` and make it the single active record.
    ///
    /// The locale comes from the record's cache when resolved, otherwise from
    /// a bounded geolocation lookup. If the route cannot be set nothing is
    /// torn down and nothing is written. If a later step fails the previous
    /// route is put back.
    pub async fn activate_proxy(&self, proxy: Proxy) -> Result<IdentityProfile> {
        let _op = self.op.lock().await;
        let mut proxies = self.store.proxies().await?;

        let mut record = match proxies.find(&proxy.host, proxy.port) {
            Some(stored) => stored.clone(),
            None => Proxy::new(proxy.host.clone(), proxy.port),
        };
        if proxy.credentials().is_some() {
            record.username = proxy.username.clone();
            record.password = proxy.password.clone();
        }

        let locale = if record.locale_is_stale() {
            resolve_locale(self.geo.as_ref(), &record.host, self.config.geo_timeout).await
        } else {
            Locale::new(
                record.language.clone().unwrap_or_default(),
                record.timezone.clone().unwrap_or_default(),
            )
        };

        record.language = Some(locale.language.clone());
        record.timezone = Some(locale.timezone.clone());
        record.is_active = true;
        let key = record.key();

        let previous = self.host.proxy_route().await?;
        let pending = self.pending.hold(record.clone());
        self.host
            .set_proxy_route(&ProxyRoute::http(record.host.clone(), record.port))
            .await?;

        let committed: Result<()> = async {
            self.teardown_headers().await?;
            self.teardown_frames().await?;
            proxies.mark_active(record);
            self.store.set_proxies(&proxies).await
        }
        .await;
        drop(pending);
        if let Err(e) = committed {
            self.restore_route(previous.as_ref()).await;
            return Err(e);
        }

        let user_agent = self.effective_user_agent().await?;
        self.refresh_icon().await?;
        info!("proxy {key} active ({}, {})", locale.language, locale.timezone);
        Ok(IdentityProfile::new(user_agent, locale))
    }

    /// Stop routing through host:port. A no-op unless that record is active.
    pub async fn deactivate_proxy(&self, host: &str, port: u16) -> Result<()> {
        let _op = self.op.lock().await;
        self.deactivate_proxy_locked(host, port).await
    }

    async fn deactivate_proxy_locked(&self, host: &str, port: u16) -> Result<()> {
        let mut proxies = self.store.proxies().await?;
        let is_active = proxies.find(host, port).is_some_and(|p| p.is_active);
        if !is_active {
            debug!("deactivate {host}:{port}: not active");
            return Ok(());
        }

        self.teardown_headers().await?;
        self.teardown_frames().await?;
        self.host.clear_proxy_route().await?;

        if proxies.mark_inactive(host, port) {
            self.store.set_proxies(&proxies).await?;
        }
        self.refresh_icon().await?;
        info!("proxy {host}:{port} deactivated");
        Ok(())
    }

    /// Clear the route, strip every rule and script, reset every record.
    ///
    /// Runs at daemon start so no route survives a restart.
    pub async fn deactivate_all_proxies(&self) -> Result<()> {
        let _op = self.op.lock().await;
        self.deactivate_all_locked().await
    }

    async fn deactivate_all_locked(&self) -> Result<()> {
        self.host.clear_proxy_route().await?;
        self.host.update_rules(&RULE_IDS, &[]).await?;
        for slot in self.host.registered_slots().await? {
            self.host.unregister_document_script(slot).await?;
        }
        self.host.set_webrtc_policy(WebRtcPolicy::Default).await?;

        let mut proxies = self.store.proxies().await?;
        if proxies.reset_all() {
            self.store.set_proxies(&proxies).await?;
        }
        self.refresh_icon().await?;
        info!("all proxies deactivated");
        Ok(())
    }

    /// Install header rules and the identity spoofer for the active proxy.
    ///
    /// Empty `language`/`timezone` fall back to the record's cached locale.
    pub async fn activate_headers(
        &self,
        host: &str,
        port: u16,
        language: &str,
        timezone: &str,
    ) -> Result<IdentityProfile> {
        let _op = self.op.lock().await;
        let mut proxies = self.store.proxies().await?;
        let record = proxies
            .active()
            .filter(|p| p.matches(host, port))
            .cloned()
            .ok_or_else(|| GeomaskError::Precondition(PRECONDITION_ACTIVATE_FIRST.to_string()))?;

        let fallback = Locale::fallback();
        let locale = Locale::new(
            pick(language, record.language.as_deref(), &fallback.language),
            pick(timezone, record.timezone.as_deref(), &fallback.timezone),
        );
        let user_agent = self.effective_user_agent().await?;
        let profile = IdentityProfile::new(user_agent, locale);
        let toggles = self.store.toggles().await?;

        let rules = self.rules_for(&profile, toggles.iframes);
        self.host.update_rules(&RULE_IDS, &rules.rules).await?;

        proxies.arm_headers(host, port, &profile.language, &profile.timezone);
        let mut state = self.store.snapshot().await?;
        state.insert(KEY_PROXIES.to_string(), serde_json::to_value(&proxies)?);
        let patch = IdentityPatch::from_state(&state, &self.config.default_user_agent)
            .ok_or_else(|| GeomaskError::Precondition(PRECONDITION_ACTIVATE_FIRST.to_string()))?;
        let source = self.config.delivery.wrap(&patch.apply_script());
        let tabs = self.host.run_in_open_tabs(&source).await?;
        self.host
            .register_document_script(ScriptSlot::IdentitySpoofer, &source)
            .await?;

        if toggles.webrtc.is_enabled() {
            self.host.set_webrtc_policy(WebRtcPolicy::Protected).await?;
        }

        self.store.set_proxies(&proxies).await?;
        self.refresh_icon().await?;
        info!(
            "headers active for {host}:{port} ({}, {}), spoofer ran in {tabs} tabs",
            profile.language, profile.timezone
        );
        Ok(profile)
    }

    /// Remove header rules and the spoofer. A no-op when nothing is installed.
    pub async fn deactivate_headers(&self) -> Result<()> {
        let _op = self.op.lock().await;
        if !self.teardown_headers().await? {
            return Ok(());
        }
        self.refresh_icon().await?;
        Ok(())
    }

    /// Run the frame suppressor in open tabs and register it for new documents.
    pub async fn activate_content_script(&self) -> Result<()> {
        let _op = self.op.lock().await;
        self.install_frames().await
    }

    pub async fn deactivate_content_script(&self) -> Result<()> {
        let _op = self.op.lock().await;
        self.teardown_frames().await
    }

    /// Add a hostname to the frame allow-list and re-render the suppressor.
    pub async fn allow_frames(&self, host: &str) -> Result<Vec<String>> {
        let _op = self.op.lock().await;
        let host = frames::allow_list_host(host)
            .ok_or_else(|| GeomaskError::Protocol(format!("not a hostname: '{host}'")))?;
        let mut hosts = self.store.frame_allow_list().await?;
        if !hosts.contains(&host) {
            hosts.push(host.clone());
            self.store.set_frame_allow_list(&hosts).await?;
            self.reinstall_frames().await?;
            info!("frames allowed on {host}");
        }
        Ok(hosts)
    }

    pub async fn disallow_frames(&self, host: &str) -> Result<Vec<String>> {
        let _op = self.op.lock().await;
        let host = frames::allow_list_host(host).unwrap_or_default();
        let mut hosts = self.store.frame_allow_list().await?;
        let before = hosts.len();
        hosts.retain(|h| *h != host);
        if hosts.len() != before {
            self.store.set_frame_allow_list(&hosts).await?;
            self.reinstall_frames().await?;
            info!("frames removed again on {host}");
        }
        Ok(hosts)
    }

    /// Persist a feature toggle and re-apply whatever it gates.
    pub async fn set_toggle(&self, feature: Feature, state: FeatureToggle) -> Result<IconState> {
        let _op = self.op.lock().await;
        self.store.set_toggle(feature, state).await?;

        let proxies = self.store.proxies().await?;
        let armed = proxies.active().filter(|p| p.headers_active).cloned();
        match feature {
            Feature::WebRtc => {
                if armed.is_some() {
                    let policy = if state.is_enabled() {
                        WebRtcPolicy::Protected
                    } else {
                        WebRtcPolicy::Default
                    };
                    self.host.set_webrtc_policy(policy).await?;
                }
            }
            Feature::Iframes => {
                if let Some(record) = armed {
                    let profile = self.profile_for(&record).await?;
                    let rules = self.rules_for(&profile, state);
                    self.host.update_rules(&RULE_IDS, &rules.rules).await?;
                }
                self.reinstall_frames().await?;
            }
        }
        info!("{} -> {state}", feature.key());
        self.refresh_icon().await
    }

    /// Persist (or clear, with `None` or an empty string) the user-agent override.
    ///
    /// Takes effect at the next header activation.
    pub async fn set_user_agent(&self, user_agent: Option<&str>) -> Result<IconState> {
        let _op = self.op.lock().await;
        self.store.set_ua_override(user_agent).await?;
        self.refresh_icon().await
    }

    pub async fn open_tab(&self, url: &str) -> Result<()> {
        let _op = self.op.lock().await;
        self.host.open_tab(url).await
    }

    pub async fn status(&self) -> Result<Status> {
        let _op = self.op.lock().await;
        let proxies = self.store.proxies().await?;
        let toggles = self.store.toggles().await?;
        let ua_override = self.store.ua_override().await?;
        let active = proxies.active().cloned();
        let icon = icon::compute(self.icon_inputs(&proxies, toggles, ua_override.is_some()));
        let rule_ids = self
            .host
            .installed_rules()
            .await?
            .iter()
            .map(|r| r.id)
            .collect();

        Ok(Status {
            headers_active: active.as_ref().is_some_and(|p| p.headers_active),
            active,
            toggles,
            user_agent: ua_override
                .clone()
                .unwrap_or_else(|| self.config.default_user_agent.clone()),
            ua_override: ua_override.is_some(),
            user_agents: self.store.user_agents().await?,
            frame_allow_list: self.store.frame_allow_list().await?,
            icon,
            rule_ids,
            route: self.host.proxy_route().await?,
            proxy_count: proxies.len(),
        })
    }

    /// Parse and upsert proxy list lines. Blank lines and `#` comments are skipped.
    ///
    /// Every line is parsed before anything is written.
    pub async fn add_proxies(&self, lines: &[String]) -> Result<usize> {
        let _op = self.op.lock().await;
        let parsed = lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(Proxy::parse_line)
            .collect::<Result<Vec<_>>>()?;

        let mut proxies = self.store.proxies().await?;
        for proxy in &parsed {
            proxies.upsert(proxy.clone());
        }
        self.store.set_proxies(&proxies).await?;
        Ok(parsed.len())
    }

    /// Remove a record, deactivating it first when active.
    pub async fn remove_proxy(&self, host: &str, port: u16) -> Result<bool> {
        let _op = self.op.lock().await;
        self.deactivate_proxy_locked(host, port).await?;
        let mut proxies = self.store.proxies().await?;
        if proxies.remove(host, port).is_none() {
            return Ok(false);
        }
        self.store.set_proxies(&proxies).await?;
        Ok(true)
    }

    pub async fn clear_proxies(&self) -> Result<()> {
        let _op = self.op.lock().await;
        if self.store.proxies().await?.active().is_some() {
            self.deactivate_all_locked().await?;
        }
        self.store.set_proxies(&ProxyList::default()).await?;
        self.refresh_icon().await?;
        Ok(())
    }

    pub async fn list_proxies(&self) -> Result<ProxyList> {
        self.store.proxies().await
    }

    /// Dispatch one inbound message and acknowledge it.
    pub async fn handle(&self, message: Message) -> Ack {
        let started = Instant::now();
        let kind = message.kind();
        let proxy = message_proxy(&message);
        let outcome = self.dispatch(message).await;

        let ack = match &outcome {
            Ok(Some(result)) => Ack::with_result(result.clone()),
            Ok(None) => Ack::ok(),
            Err(e) => {
                warn!("{kind} failed: {e}");
                Ack::failed(e)
            }
        };

        if let Some(audit) = &self.audit {
            let error = outcome.as_ref().err().map(|e| e.to_string());
            if let Err(e) = audit.log_operation(
                kind,
                proxy.as_deref(),
                started.elapsed().as_millis() as u64,
                error.as_deref(),
            ) {
                warn!("audit log write failed: {e}");
            }
        }
        ack
    }

    async fn dispatch(&self, message: Message) -> Result<Option<Value>> {
        let value = match message {
            Message::ActivateProxy {
                host,
                port,
                username,
                password,
            } => {
                let mut proxy = Proxy::new(host, port);
                if let Some(username) = username {
                    proxy = proxy.with_credentials(username, password.unwrap_or_default());
                }
                Some(serde_json::to_value(self.activate_proxy(proxy).await?)?)
            }
            Message::DeactivateProxy { host, port } => {
                self.deactivate_proxy(&host, port).await?;
                None
            }
            Message::DeactivateAllProxies => {
                self.deactivate_all_proxies().await?;
                None
            }
            Message::ActivateHeaders {
                host,
                port,
                language,
                timezone,
            } => Some(serde_json::to_value(
                self.activate_headers(&host, port, &language, &timezone)
                    .await?,
            )?),
            Message::DeactivateHeaders => {
                self.deactivate_headers().await?;
                None
            }
            Message::ActivateContentScript => {
                self.activate_content_script().await?;
                None
            }
            Message::DeactivateContentScript => {
                self.deactivate_content_script().await?;
                None
            }
            Message::SetToggle { feature, state } => {
                let icon = self.set_toggle(feature, state).await?;
                Some(json!({ "icon": icon }))
            }
            Message::SetUserAgent { user_agent } => {
                let icon = self.set_user_agent(user_agent.as_deref()).await?;
                Some(json!({ "icon": icon }))
            }
            Message::Status => Some(serde_json::to_value(self.status().await?)?),
            Message::OpenTab { url } => {
                self.open_tab(&url).await?;
                None
            }
            Message::AddProxies { lines } => {
                let added = self.add_proxies(&lines).await?;
                Some(json!({ "added": added }))
            }
            Message::RemoveProxy { host, port } => {
                let removed = self.remove_proxy(&host, port).await?;
                Some(json!({ "removed": removed }))
            }
            Message::ClearProxies => {
                self.clear_proxies().await?;
                None
            }
            Message::ListProxies => Some(serde_json::to_value(self.list_proxies().await?)?),
            Message::AllowFrames { host } => {
                Some(json!({ "frameAllowList": self.allow_frames(&host).await? }))
            }
            Message::DisallowFrames { host } => {
                Some(json!({ "frameAllowList": self.disallow_frames(&host).await? }))
            }
        };
        Ok(value)
    }

    /// Remove rules, the spoofer and the WebRTC guard, then clear header flags.
    ///
    /// Returns whether anything was installed or flagged.
    async fn teardown_headers(&self) -> Result<bool> {
        let mut proxies = self.store.proxies().await?;
        let flagged = proxies.iter().any(|p| p.headers_active);
        let installed = !self.host.installed_rules().await?.is_empty();
        if !flagged && !installed {
            return Ok(false);
        }

        self.host.update_rules(&RULE_IDS, &[]).await?;
        self.host
            .unregister_document_script(ScriptSlot::IdentitySpoofer)
            .await?;
        let restore = self.config.delivery.wrap(&IdentityPatch::restore_script());
        self.host.run_in_open_tabs(&restore).await?;
        self.host.set_webrtc_policy(WebRtcPolicy::Default).await?;

        if proxies.clear_headers() {
            self.store.set_proxies(&proxies).await?;
        }
        info!("headers deactivated");
        Ok(true)
    }

    async fn install_frames(&self) -> Result<()> {
        let toggle = self.store.toggle(Feature::Iframes).await?;
        let allowed = self.store.frame_allow_list().await?;
        let source = frames::suppressor_script(toggle, &allowed);
        self.host.run_in_open_tabs(&source).await?;
        self.host
            .register_document_script(ScriptSlot::FrameSuppressor, &source)
            .await
    }

    /// Re-render the suppressor if it is installed.
    async fn reinstall_frames(&self) -> Result<()> {
        let slots = self.host.registered_slots().await?;
        if slots.contains(&ScriptSlot::FrameSuppressor) {
            self.install_frames().await?;
        }
        Ok(())
    }

    async fn teardown_frames(&self) -> Result<()> {
        if !self
            .host
            .registered_slots()
            .await?
            .contains(&ScriptSlot::FrameSuppressor)
        {
            return Ok(());
        }
        self.host
            .unregister_document_script(ScriptSlot::FrameSuppressor)
            .await?;
        self.host.run_in_open_tabs(&frames::teardown_script()).await?;
        Ok(())
    }

    /// Best-effort return to `previous` after a failed activation.
    async fn restore_route(&self, previous: Option<&ProxyRoute>) {
        let restored = match previous {
            Some(route) => self.host.set_proxy_route(route).await,
            None => self.host.clear_proxy_route().await,
        };
        match restored {
            Ok(()) => info!("proxy route restored"),
            Err(e) => warn!("proxy route not restored: {e}"),
        }
    }

    fn rules_for(&self, profile: &IdentityProfile, iframes: FeatureToggle) -> HeaderRuleSet {
        let rules = compile(profile);
        if iframes.is_enabled() {
            rules
        } else {
            rules.without_subframe_block()
        }
    }

    async fn profile_for(&self, record: &Proxy) -> Result<IdentityProfile> {
        let fallback = Locale::fallback();
        let locale = Locale::new(
            pick("", record.language.as_deref(), &fallback.language),
            pick("", record.timezone.as_deref(), &fallback.timezone),
        );
        Ok(IdentityProfile::new(self.effective_user_agent().await?, locale))
    }

    async fn effective_user_agent(&self) -> Result<String> {
        Ok(self
            .store
            .ua_override()
            .await?
            .unwrap_or_else(|| self.config.default_user_agent.clone()))
    }

    fn icon_inputs(&self, proxies: &ProxyList, toggles: Toggles, ua_override: bool) -> IconInputs {
        let active = proxies.active();
        IconInputs {
            proxy_active: active.is_some(),
            headers_active: active.is_some_and(|p| p.headers_active),
            webrtc_protected: toggles.webrtc.is_enabled(),
            iframes_blocked: toggles.iframes.is_enabled(),
            ua_override,
        }
    }

    async fn refresh_icon(&self) -> Result<IconState> {
        let proxies = self.store.proxies().await?;
        let toggles = self.store.toggles().await?;
        let ua_override = self.store.ua_override().await?.is_some();
        let state = icon::compute(self.icon_inputs(&proxies, toggles, ua_override));
        self.host.set_indicator(state).await?;
        Ok(state)
    }
}

/// First non-empty of an explicit value, a cached value and a fallback.
fn pick(explicit: &str, cached: Option<&str>, fallback: &str) -> String {
    [Some(explicit), cached]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn message_proxy(message: &Message) -> Option<String> {
    match message {
        Message::ActivateProxy { host, port, .. }
        | Message::DeactivateProxy { host, port }
        | Message::ActivateHeaders { host, port, .. }
        | Message::RemoveProxy { host, port } => Some(format!("{host}:{port}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_prefers_explicit_then_cached() {
        assert_eq!(pick("fr-FR", Some("de"), "en"), "fr-FR");
        assert_eq!(pick("", Some("de"), "en"), "de");
        assert_eq!(pick("", Some(""), "en"), "en");
        assert_eq!(pick("", None, "en"), "en");
    }

    #[test]
    fn test_message_proxy_omits_credentials() {
        let msg = Message::ActivateProxy {
            host: "1.2.3.4".into(),
            port: 8080,
            username: Some("alice".into()),
            password: Some("s3cret".into()),
        };
        assert_eq!(message_proxy(&msg).as_deref(), Some("1.2.3.4:8080"));
        assert_eq!(message_proxy(&Message::Status), None);
    }
}
