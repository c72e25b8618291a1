//! End-to-end controller behavior against the in-memory host and store.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

use geomask_runtime::controller::{
    ActiveProxyAuth, Ack, AuthChallenge, AuthDecision, Controller, ControllerConfig, IconState,
    Message, PendingProxy,
};
use geomask_runtime::geo::{FixedGeoLocator, GeoLocator};
use geomask_runtime::host::{AuthResponder, ProxyRoute, RecordingHost, ScriptSlot, WebRtcPolicy};
use geomask_runtime::identity::IdentityPatch;
use geomask_runtime::model::{Feature, FeatureToggle, Locale, Proxy, ProxyList};
use geomask_runtime::rules::{HeaderRuleSet, ResourceType, RULE_BLOCK_SUBFRAMES, RULE_IDS};
use geomask_runtime::store::{MemoryStore, StateStore};
use geomask_runtime::{GeomaskError, Result};

const MAC_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.6367.91 Safari/537.36";

struct Harness {
    controller: Controller,
    store: Arc<MemoryStore>,
    host: Arc<RecordingHost>,
}

fn harness_with(geo: Arc<dyn GeoLocator>, config: ControllerConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let host = Arc::new(RecordingHost::with_tabs(&["https://a.example/", "https://b.example/"]));
    let controller = Controller::new(store.clone(), host.clone(), geo, config);
    Harness {
        controller,
        store,
        host,
    }
}

fn harness() -> Harness {
    harness_with(
        Arc::new(FixedGeoLocator::new(Locale::new("de", "Europe/Berlin"))),
        ControllerConfig::default(),
    )
}

impl Harness {
    async fn seed(&self, proxies: Vec<Proxy>) {
        self.store
            .set_proxies(&ProxyList::from(proxies))
            .await
            .unwrap();
    }

    async fn proxies(&self) -> ProxyList {
        self.store.proxies().await.unwrap()
    }

    async fn record(&self, host: &str, port: u16) -> Proxy {
        self.proxies().await.find(host, port).cloned().unwrap()
    }

    fn installed(&self) -> HeaderRuleSet {
        HeaderRuleSet {
            rules: RULE_IDS.iter().filter_map(|id| self.host.rule(*id)).collect(),
        }
    }
}

fn proxy_a() -> Proxy {
    Proxy::new("1.2.3.4", 8080)
}

fn proxy_b() -> Proxy {
    Proxy::new("5.6.7.8", 3128).with_credentials("bob", "hunter2")
}

#[tokio::test]
async fn activate_headers_then_deactivate_proxy() {
    let h = harness();
    h.controller
        .add_proxies(&["1.2.3.4:8080".to_string()])
        .await
        .unwrap();

    h.controller.activate_proxy(proxy_a()).await.unwrap();
    assert_eq!(h.host.route(), Some(ProxyRoute::http("1.2.3.4", 8080)));
    assert!(h.record("1.2.3.4", 8080).await.is_active);

    let profile = h
        .controller
        .activate_headers("1.2.3.4", 8080, "fr-FR", "Europe/Paris")
        .await
        .unwrap();
    assert_eq!(profile.locale(), Locale::new("fr-FR", "Europe/Paris"));

    let headers = h
        .installed()
        .request_headers(ResourceType::MainFrame, "https://example.com/");
    assert!(headers.contains(&("Accept-Language".to_string(), "fr-FR".to_string())));
    assert!(headers.contains(&("Time-Zone".to_string(), "Europe/Paris".to_string())));
    assert_eq!(h.host.indicator(), IconState::ActiveFull);
    assert_eq!(h.host.webrtc(), WebRtcPolicy::Protected);

    let spoofer = h.host.document_script(ScriptSlot::IdentitySpoofer).unwrap();
    assert!(spoofer.contains("Europe/Paris"));
    assert_eq!(h.host.tab_runs().last(), Some(&spoofer));

    let record = h.record("1.2.3.4", 8080).await;
    assert!(record.headers_active);
    assert_eq!(record.language.as_deref(), Some("fr-FR"));

    h.controller.deactivate_proxy("1.2.3.4", 8080).await.unwrap();
    assert_eq!(h.host.route(), None);
    assert!(h.host.rule_ids().is_empty());
    assert_eq!(h.host.document_script(ScriptSlot::IdentitySpoofer), None);
    assert_eq!(h.host.webrtc(), WebRtcPolicy::Default);
    assert_eq!(h.host.indicator(), IconState::Default);
    let record = h.record("1.2.3.4", 8080).await;
    assert!(!record.is_active && !record.headers_active);
}

#[tokio::test]
async fn activating_b_replaces_a() {
    let h = harness();
    h.seed(vec![proxy_a(), proxy_b()]).await;

    h.controller.activate_proxy(proxy_a()).await.unwrap();
    h.controller
        .activate_headers("1.2.3.4", 8080, "", "")
        .await
        .unwrap();
    assert_eq!(h.host.rule_ids(), RULE_IDS.to_vec());

    h.controller
        .activate_proxy(Proxy::new("5.6.7.8", 3128))
        .await
        .unwrap();

    let proxies = h.proxies().await;
    assert_eq!(proxies.active_count(), 1);
    assert_eq!(proxies.active().map(|p| p.key().to_string()), Some("5.6.7.8:3128".into()));
    assert!(!proxies.find("1.2.3.4", 8080).unwrap().headers_active);
    assert!(h.host.rule_ids().is_empty());
    assert_eq!(h.host.route(), Some(ProxyRoute::http("5.6.7.8", 3128)));
    // stored credentials survive an activation that supplies none
    assert_eq!(
        proxies.find("5.6.7.8", 3128).unwrap().credentials(),
        Some(("bob", "hunter2"))
    );
}

#[tokio::test]
async fn at_most_one_active_after_every_operation() {
    let h = harness();
    h.seed(vec![proxy_a(), proxy_b(), Proxy::new("9.9.9.9", 80)]).await;

    let steps: Vec<Message> = vec![
        Message::ActivateProxy { host: "1.2.3.4".into(), port: 8080, username: None, password: None },
        Message::ActivateProxy { host: "5.6.7.8".into(), port: 3128, username: None, password: None },
        Message::ActivateHeaders { host: "5.6.7.8".into(), port: 3128, language: String::new(), timezone: String::new() },
        Message::DeactivateProxy { host: "1.2.3.4".into(), port: 8080 },
        Message::ActivateProxy { host: "9.9.9.9".into(), port: 80, username: None, password: None },
        Message::ActivateProxy { host: "10.0.0.1".into(), port: 1080, username: None, password: None },
        Message::DeactivateHeaders,
        Message::DeactivateAllProxies,
        Message::ActivateProxy { host: "1.2.3.4".into(), port: 8080, username: None, password: None },
    ];
    for step in steps {
        h.controller.handle(step).await;
        assert!(h.proxies().await.active_count() <= 1);
    }
    // activating an unknown proxy inserts it
    assert!(h.proxies().await.find("10.0.0.1", 1080).is_some());
}

#[tokio::test]
async fn deactivation_when_idle_changes_nothing() {
    let h = harness();
    h.seed(vec![proxy_a()]).await;
    let before = h.store.snapshot().await.unwrap();

    h.controller.deactivate_proxy("1.2.3.4", 8080).await.unwrap();
    h.controller.deactivate_proxy("7.7.7.7", 1).await.unwrap();
    h.controller.deactivate_headers().await.unwrap();

    assert_eq!(h.store.snapshot().await.unwrap(), before);
    assert!(h.host.tab_runs().is_empty());
    assert!(h.host.rule_ids().is_empty());
}

#[tokio::test]
async fn headers_need_the_matching_active_proxy() {
    let h = harness();
    h.seed(vec![proxy_a(), proxy_b()]).await;

    let err = h
        .controller
        .activate_headers("1.2.3.4", 8080, "fr-FR", "Europe/Paris")
        .await
        .unwrap_err();
    assert!(matches!(err, GeomaskError::Precondition(ref m) if m == "activate the proxy first"));
    assert!(!h.record("1.2.3.4", 8080).await.headers_active);

    h.controller.activate_proxy(proxy_b()).await.unwrap();
    let err = h
        .controller
        .activate_headers("1.2.3.4", 8080, "", "")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "precondition");
    assert!(h.host.rule_ids().is_empty());
}

#[tokio::test]
async fn rule_ids_never_accumulate() {
    let h = harness();
    h.controller.activate_proxy(proxy_a()).await.unwrap();

    for _ in 0..2 {
        h.controller
            .activate_headers("1.2.3.4", 8080, "", "")
            .await
            .unwrap();
        h.controller
            .activate_headers("1.2.3.4", 8080, "es-ES", "Europe/Madrid")
            .await
            .unwrap();
        assert_eq!(h.host.rule_ids(), RULE_IDS.to_vec());
        h.controller.deactivate_headers().await.unwrap();
        assert!(h.host.rule_ids().is_empty());
    }
}

#[tokio::test]
async fn failed_lookup_yields_fallback_locale() {
    let h = harness_with(Arc::new(FixedGeoLocator::failing()), ControllerConfig::default());
    let profile = h.controller.activate_proxy(proxy_a()).await.unwrap();
    assert_eq!(profile.language, "en");
    assert_eq!(profile.timezone, "UTC");
}

struct HangingLocator;

#[async_trait]
impl GeoLocator for HangingLocator {
    async fn lookup(&self, _host: &str) -> Result<Locale> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Locale::new("ja", "Asia/Tokyo"))
    }
}

#[tokio::test]
async fn hung_lookup_is_bounded() {
    let config = ControllerConfig {
        geo_timeout: Duration::from_millis(50),
        ..ControllerConfig::default()
    };
    let h = harness_with(Arc::new(HangingLocator), config);

    let started = Instant::now();
    let profile = h.controller.activate_proxy(proxy_a()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(profile.locale(), Locale::fallback());
}

#[tokio::test]
async fn resolved_locale_is_cached_on_the_record() {
    let h = harness_with(Arc::new(FixedGeoLocator::failing()), ControllerConfig::default());
    let mut cached = proxy_a();
    cached.language = Some("it".into());
    cached.timezone = Some("Europe/Rome".into());
    h.seed(vec![cached]).await;

    let profile = h.controller.activate_proxy(proxy_a()).await.unwrap();
    assert_eq!(profile.locale(), Locale::new("it", "Europe/Rome"));

    let h = harness();
    let profile = h.controller.activate_proxy(proxy_a()).await.unwrap();
    assert_eq!(profile.locale(), Locale::new("de", "Europe/Berlin"));
    assert_eq!(h.record("1.2.3.4", 8080).await.timezone.as_deref(), Some("Europe/Berlin"));
}

#[tokio::test]
async fn route_failure_commits_nothing() {
    let h = harness();
    h.seed(vec![proxy_a(), proxy_b()]).await;
    h.controller.activate_proxy(proxy_a()).await.unwrap();
    h.controller
        .activate_headers("1.2.3.4", 8080, "", "")
        .await
        .unwrap();
    let before = h.store.snapshot().await.unwrap();

    h.host.fail_route_changes(true);
    let err = h.controller.activate_proxy(proxy_b()).await.unwrap_err();
    assert_eq!(err.code(), "proxy_config");

    assert_eq!(h.store.snapshot().await.unwrap(), before);
    assert_eq!(h.host.route(), Some(ProxyRoute::http("1.2.3.4", 8080)));
    assert_eq!(h.host.rule_ids(), RULE_IDS.to_vec());
}

#[tokio::test]
async fn storage_failures_are_reported() {
    let h = harness();
    h.store.fail_writes(true);
    let ack = h
        .controller
        .handle(Message::AddProxies { lines: vec!["1.2.3.4:8080".into()] })
        .await;
    assert!(!ack.success);
    assert_eq!(ack.code.as_deref(), Some("storage"));
}

#[tokio::test]
async fn auth_follows_the_active_record() {
    let h = harness();
    let with_creds = Proxy::new("1.2.3.4", 8080).with_credentials("alice", "s3cret");
    h.controller.activate_proxy(with_creds).await.unwrap();

    let store: Arc<dyn StateStore> = h.store.clone();
    let auth = ActiveProxyAuth::new(store);
    assert_eq!(
        auth.respond(&AuthChallenge::proxy("1.2.3.4", 8080)).await,
        AuthDecision::Provide {
            username: "alice".into(),
            password: "s3cret".into()
        }
    );
    assert_eq!(
        auth.respond(&AuthChallenge::proxy("1.2.3.4", 9090)).await,
        AuthDecision::Cancel
    );

    h.controller.deactivate_proxy("1.2.3.4", 8080).await.unwrap();
    assert_eq!(
        auth.respond(&AuthChallenge::proxy("1.2.3.4", 8080)).await,
        AuthDecision::Cancel
    );
}

#[tokio::test]
async fn challenges_during_route_change_get_the_new_credentials() {
    let store = Arc::new(MemoryStore::new());
    let host = Arc::new(RecordingHost::new());
    let pending = Arc::new(PendingProxy::default());
    let auth = ActiveProxyAuth::new(store.clone()).with_pending(pending.clone());
    host.challenge_route_changes(Arc::new(auth));
    let controller = Controller::new(
        store.clone(),
        host.clone(),
        Arc::new(FixedGeoLocator::new(Locale::new("de", "Europe/Berlin"))),
        ControllerConfig::default(),
    )
    .with_pending(pending.clone());

    let alice = Proxy::new("1.2.3.4", 8080).with_credentials("alice", "s3cret");
    controller.activate_proxy(alice).await.unwrap();
    controller.activate_proxy(proxy_b()).await.unwrap();

    assert_eq!(
        host.route_challenges(),
        vec![
            AuthDecision::Provide {
                username: "alice".into(),
                password: "s3cret".into()
            },
            AuthDecision::Provide {
                username: "bob".into(),
                password: "hunter2".into()
            },
        ]
    );
    assert_eq!(pending.get(), None);
}

#[tokio::test]
async fn failed_commit_puts_the_previous_route_back() {
    let h = harness();
    h.controller.activate_proxy(proxy_a()).await.unwrap();

    h.store.fail_writes(true);
    let err = h.controller.activate_proxy(proxy_b()).await.unwrap_err();
    assert_eq!(err.code(), "storage");
    assert_eq!(h.host.route(), Some(ProxyRoute::http("1.2.3.4", 8080)));

    h.store.fail_writes(false);
    h.controller.deactivate_proxy("1.2.3.4", 8080).await.unwrap();
    h.store.fail_writes(true);
    assert!(h.controller.activate_proxy(proxy_b()).await.is_err());
    assert_eq!(h.host.route(), None);
}

#[tokio::test]
async fn iframe_toggle_reshapes_installed_rules() {
    let h = harness();
    h.controller.activate_proxy(proxy_a()).await.unwrap();
    h.controller
        .activate_headers("1.2.3.4", 8080, "", "")
        .await
        .unwrap();
    assert!(h.host.rule(RULE_BLOCK_SUBFRAMES).is_some());

    let icon = h
        .controller
        .set_toggle(Feature::Iframes, FeatureToggle::Disabled)
        .await
        .unwrap();
    assert_eq!(icon, IconState::ActiveMedium);
    assert!(h.host.rule(RULE_BLOCK_SUBFRAMES).is_none());
    assert_eq!(h.host.rule_ids().len(), RULE_IDS.len() - 1);

    h.controller
        .set_toggle(Feature::WebRtc, FeatureToggle::Disabled)
        .await
        .unwrap();
    assert_eq!(h.host.webrtc(), WebRtcPolicy::Default);
}

#[tokio::test]
async fn frame_suppressor_follows_activation() {
    let h = harness();
    h.controller.activate_content_script().await.unwrap();
    let script = h.host.document_script(ScriptSlot::FrameSuppressor).unwrap();
    assert!(script.contains("MutationObserver"));

    h.controller
        .set_toggle(Feature::Iframes, FeatureToggle::Disabled)
        .await
        .unwrap();
    let regated = h.host.document_script(ScriptSlot::FrameSuppressor).unwrap();
    assert_ne!(script, regated);

    // switching proxies tears the suppressor down
    h.controller.activate_proxy(proxy_a()).await.unwrap();
    assert_eq!(h.host.document_script(ScriptSlot::FrameSuppressor), None);

    h.controller.activate_content_script().await.unwrap();
    h.controller.deactivate_content_script().await.unwrap();
    assert_eq!(h.host.document_script(ScriptSlot::FrameSuppressor), None);
}

#[tokio::test]
async fn allowed_sites_keep_their_frames() {
    let h = harness();
    h.controller.activate_content_script().await.unwrap();

    let ack = h
        .controller
        .handle(Message::AllowFrames { host: "https://News.Example/today".into() })
        .await;
    assert!(ack.success, "{ack:?}");
    assert_eq!(ack.result.unwrap()["frameAllowList"], json!(["news.example"]));
    let script = h.host.document_script(ScriptSlot::FrameSuppressor).unwrap();
    assert!(script.contains(r#"["news.example"]"#));
    assert_eq!(h.host.tab_runs().last(), Some(&script));

    // adding twice keeps one entry
    let hosts = h.controller.allow_frames("news.example").await.unwrap();
    assert_eq!(hosts, vec!["news.example".to_string()]);
    let status = h.controller.status().await.unwrap();
    assert_eq!(status.frame_allow_list, hosts);

    let hosts = h.controller.disallow_frames("news.example").await.unwrap();
    assert!(hosts.is_empty());
    let script = h.host.document_script(ScriptSlot::FrameSuppressor).unwrap();
    assert!(script.contains("(true, [])"));

    let ack = h.controller.handle(Message::AllowFrames { host: "  ".into() }).await;
    assert_eq!(ack.code.as_deref(), Some("protocol"));
}

#[tokio::test]
async fn spoofer_script_is_stable_across_invocations() {
    let h = harness();
    h.store.set_ua_override(Some(MAC_UA)).await.unwrap();
    h.controller.activate_proxy(proxy_a()).await.unwrap();

    h.controller
        .activate_headers("1.2.3.4", 8080, "fr-FR", "Europe/Paris")
        .await
        .unwrap();
    let first = h.host.document_script(ScriptSlot::IdentitySpoofer).unwrap();
    h.controller
        .activate_headers("1.2.3.4", 8080, "fr-FR", "Europe/Paris")
        .await
        .unwrap();
    let second = h.host.document_script(ScriptSlot::IdentitySpoofer).unwrap();
    assert_eq!(first, second);

    let snapshot = h.store.snapshot().await.unwrap();
    let patch = IdentityPatch::from_state(&snapshot, "unused").unwrap();
    assert_eq!(patch.user_agent, MAC_UA);
    assert_eq!(patch.apply_script(), first);
}

#[tokio::test]
async fn removing_the_active_proxy_deactivates_it() {
    let h = harness();
    h.seed(vec![proxy_a(), proxy_b()]).await;
    h.controller.activate_proxy(proxy_a()).await.unwrap();

    assert!(h.controller.remove_proxy("1.2.3.4", 8080).await.unwrap());
    assert_eq!(h.host.route(), None);
    assert_eq!(h.proxies().await.len(), 1);
    assert!(!h.controller.remove_proxy("1.2.3.4", 8080).await.unwrap());

    h.controller.activate_proxy(proxy_b()).await.unwrap();
    h.controller.clear_proxies().await.unwrap();
    assert!(h.proxies().await.is_empty());
    assert_eq!(h.host.route(), None);
}

#[tokio::test]
async fn deactivate_all_strips_everything() {
    let h = harness();
    h.seed(vec![proxy_a()]).await;
    h.controller.activate_proxy(proxy_a()).await.unwrap();
    h.controller
        .activate_headers("1.2.3.4", 8080, "", "")
        .await
        .unwrap();
    h.controller.activate_content_script().await.unwrap();

    h.controller.deactivate_all_proxies().await.unwrap();
    assert_eq!(h.host.route(), None);
    assert!(h.host.rule_ids().is_empty());
    assert_eq!(h.host.document_script(ScriptSlot::IdentitySpoofer), None);
    assert_eq!(h.host.document_script(ScriptSlot::FrameSuppressor), None);
    assert_eq!(h.proxies().await.active_count(), 0);
    assert!(h.proxies().await.iter().all(|p| !p.headers_active));
}

#[tokio::test]
async fn status_and_acks_over_messages() {
    let h = harness();
    let ack = h
        .controller
        .handle(serde_json::from_value(json!({
            "type": "activateProxy", "host": "1.2.3.4", "port": "8080"
        }))
        .unwrap())
        .await;
    assert!(ack.success, "{ack:?}");
    assert_eq!(ack.result.as_ref().unwrap()["timezone"], json!("Europe/Berlin"));

    let ack: Ack = h.controller.handle(Message::Status).await;
    let status = ack.result.unwrap();
    assert_eq!(status["active"]["host"], json!("1.2.3.4"));
    assert_eq!(status["headersActive"], json!(false));
    assert_eq!(status["icon"], json!("active-medium"));
    assert_eq!(status["route"]["port"], json!(8080));

    let ack = h
        .controller
        .handle(Message::SetUserAgent { user_agent: Some(MAC_UA.into()) })
        .await;
    assert!(ack.success);
    assert_eq!(h.store.ua_override().await.unwrap().as_deref(), Some(MAC_UA));

    let ack = h
        .controller
        .handle(Message::OpenTab { url: "https://c.example/".into() })
        .await;
    assert!(ack.success);
    assert_eq!(h.host.tabs().len(), 3);
}
