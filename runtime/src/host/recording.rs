//! In-memory host that records every call.
//!
//! Backs the controller tests and the daemon's `--no-browser` mode, where
//! the runtime manages state without driving a browser.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

use super::{AuthResponder, BrowserHost, ProxyRoute, ScriptSlot, WebRtcPolicy};
use crate::controller::auth::{AuthChallenge, AuthDecision};
use crate::controller::icon::IconState;
use crate::error::{GeomaskError, Result};
use crate::rules::HeaderRule;

#[derive(Debug, Default)]
struct Recorded {
    route: Option<ProxyRoute>,
    rules: BTreeMap<u32, HeaderRule>,
    document_scripts: BTreeMap<ScriptSlot, String>,
    tab_runs: Vec<String>,
    tabs: Vec<String>,
    webrtc: WebRtcPolicy,
    indicator: IconState,
    route_challenges: Vec<AuthDecision>,
}

pub struct RecordingHost {
    state: Mutex<Recorded>,
    fail_route: AtomicBool,
    responder: Mutex<Option<Arc<dyn AuthResponder>>>,
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHost {
    /// A host with one open blank tab.
    pub fn new() -> Self {
        Self::with_tabs(&["about:blank"])
    }

    pub fn with_tabs(urls: &[&str]) -> Self {
        let recorded = Recorded {
            tabs: urls.iter().map(|u| u.to_string()).collect(),
            ..Recorded::default()
        };
        Self {
            state: Mutex::new(recorded),
            fail_route: AtomicBool::new(false),
            responder: Mutex::new(None),
        }
    }

    /// Raise a proxy challenge through `responder` on every route change,
    /// the way reloading tabs through the new proxy does.
    pub fn challenge_route_changes(&self, responder: Arc<dyn AuthResponder>) {
        if let Ok(mut slot) = self.responder.lock() {
            *slot = Some(responder);
        }
    }

    /// Answers to the challenges raised by route changes, in order.
    pub fn route_challenges(&self) -> Vec<AuthDecision> {
        self.with(|s| s.route_challenges.clone()).unwrap_or_default()
    }

    /// Make every subsequent `set_proxy_route` fail.
    pub fn fail_route_changes(&self, fail: bool) {
        self.fail_route.store(fail, Ordering::SeqCst);
    }

    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GeomaskError::Host("recording host lock poisoned".into()))?;
        Ok(f(&mut state))
    }

    pub fn route(&self) -> Option<ProxyRoute> {
        self.with(|s| s.route.clone()).ok().flatten()
    }

    pub fn rule_ids(&self) -> Vec<u32> {
        self.with(|s| s.rules.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn rule(&self, id: u32) -> Option<HeaderRule> {
        self.with(|s| s.rules.get(&id).cloned()).ok().flatten()
    }

    pub fn document_script(&self, slot: ScriptSlot) -> Option<String> {
        self.with(|s| s.document_scripts.get(&slot).cloned())
            .ok()
            .flatten()
    }

    /// Every source run in open tabs, in call order (once per call, not per tab).
    pub fn tab_runs(&self) -> Vec<String> {
        self.with(|s| s.tab_runs.clone()).unwrap_or_default()
    }

    pub fn webrtc(&self) -> WebRtcPolicy {
        self.with(|s| s.webrtc).unwrap_or_default()
    }

    pub fn indicator(&self) -> IconState {
        self.with(|s| s.indicator).unwrap_or_default()
    }

    pub fn tabs(&self) -> Vec<String> {
        self.with(|s| s.tabs.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BrowserHost for RecordingHost {
    async fn set_proxy_route(&self, route: &ProxyRoute) -> Result<()> {
        if self.fail_route.load(Ordering::SeqCst) {
            return Err(GeomaskError::ProxyConfig(format!("cannot route through {route}")));
        }
        info!("route -> {route}");
        self.with(|s| s.route = Some(route.clone()))?;

        let responder = self.responder.lock().ok().and_then(|slot| slot.clone());
        if let Some(responder) = responder {
            let decision = responder
                .respond(&AuthChallenge::proxy(route.host.clone(), route.port))
                .await;
            self.with(|s| s.route_challenges.push(decision))?;
        }
        Ok(())
    }

    async fn clear_proxy_route(&self) -> Result<()> {
        self.with(|s| s.route = None)
    }

    async fn proxy_route(&self) -> Result<Option<ProxyRoute>> {
        self.with(|s| s.route.clone())
    }

    async fn update_rules(&self, remove_ids: &[u32], add_rules: &[HeaderRule]) -> Result<()> {
        self.with(|s| {
            for id in remove_ids {
                s.rules.remove(id);
            }
            if let Some(dup) = add_rules.iter().find(|r| s.rules.contains_key(&r.id)) {
                return Err(GeomaskError::Host(format!("rule id {} is already installed", dup.id)));
            }
            for rule in add_rules {
                s.rules.insert(rule.id, rule.clone());
            }
            Ok(())
        })?
    }

    async fn installed_rules(&self) -> Result<Vec<HeaderRule>> {
        self.with(|s| s.rules.values().cloned().collect())
    }

    async fn run_in_open_tabs(&self, source: &str) -> Result<usize> {
        self.with(|s| {
            s.tab_runs.push(source.to_string());
            s.tabs.len()
        })
    }

    async fn register_document_script(&self, slot: ScriptSlot, source: &str) -> Result<()> {
        self.with(|s| {
            s.document_scripts.insert(slot, source.to_string());
        })
    }

    async fn unregister_document_script(&self, slot: ScriptSlot) -> Result<()> {
        self.with(|s| {
            s.document_scripts.remove(&slot);
        })
    }

    async fn registered_slots(&self) -> Result<Vec<ScriptSlot>> {
        self.with(|s| s.document_scripts.keys().copied().collect())
    }

    async fn set_webrtc_policy(&self, policy: WebRtcPolicy) -> Result<()> {
        self.with(|s| s.webrtc = policy)
    }

    async fn set_indicator(&self, state: IconState) -> Result<()> {
        self.with(|s| s.indicator = state)
    }

    async fn open_tab(&self, url: &str) -> Result<()> {
        self.with(|s| s.tabs.push(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IdentityProfile, Locale};
    use crate::rules::{compile, RULE_IDS};

    fn rules() -> Vec<HeaderRule> {
        compile(&IdentityProfile::new("UA Mac", Locale::fallback())).rules
    }

    #[tokio::test]
    async fn test_add_over_add_is_rejected() {
        let host = RecordingHost::new();
        host.update_rules(&[], &rules()).await.unwrap();
        assert!(host.update_rules(&[], &rules()).await.is_err());
        // remove-then-add in one call is the supported replacement
        host.update_rules(&RULE_IDS, &rules()).await.unwrap();
        assert_eq!(host.rule_ids(), RULE_IDS.to_vec());
    }

    #[tokio::test]
    async fn test_route_failure_keeps_previous_route() {
        let host = RecordingHost::new();
        host.set_proxy_route(&ProxyRoute::http("a", 1)).await.unwrap();
        host.fail_route_changes(true);
        assert!(host.set_proxy_route(&ProxyRoute::http("b", 2)).await.is_err());
        assert_eq!(host.route(), Some(ProxyRoute::http("a", 1)));
    }
}
