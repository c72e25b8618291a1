//! Chromium host over the DevTools protocol.
//!
//! The proxy route is a browser context created with a fixed proxy server;
//! changing the route reopens every tab in a fresh context. Header rules are
//! applied by pausing each request in the Fetch domain, which also surfaces
//! proxy authentication challenges. Pages the browser opens on its own
//! (popups, `target=_blank`, user tabs) are adopted and wired the same way.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, AuthChallengeSource,
    ContinueRequestParams, ContinueWithAuthParams, EnableParams, EventAuthRequired,
    EventRequestPaused, FailRequestParams, HeaderEntry, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, ResourceType as CdpResourceType};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, RemoveScriptToEvaluateOnNewDocumentParams,
    ScriptIdentifier,
};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
    EventTargetCreated, EventTargetDestroyed, TargetId,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{AuthResponder, BrowserHost, ProxyRoute, ScriptSlot, WebRtcPolicy};
use crate::controller::auth::{AuthChallenge, AuthDecision};
use crate::controller::icon::IconState;
use crate::error::{GeomaskError, Result};
use crate::identity::webrtc;
use crate::rules::{HeaderRule, HeaderRuleSet, ResourceType};

const BLANK: &str = "about:blank";

/// How long to wait for a newly discovered page to become attachable.
const ADOPT_ATTEMPTS: u32 = 20;
const ADOPT_BACKOFF: Duration = Duration::from_millis(50);

type SharedRules = Arc<RwLock<HeaderRuleSet>>;

#[derive(Debug, Clone, Default)]
pub struct ChromiumOptions {
    /// Browser binary; auto-detected when unset.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    /// Pass `--no-sandbox`; needed when running as root in containers.
    pub no_sandbox: bool,
}

struct Tab {
    page: Page,
    scripts: HashMap<ScriptSlot, ScriptIdentifier>,
    interceptor: JoinHandle<()>,
}

impl Tab {
    async fn close(self) {
        self.interceptor.abort();
        if let Err(e) = self.page.close().await {
            debug!("closing tab: {e}");
        }
    }
}

struct Inner {
    browser: Browser,
    context: Option<BrowserContextId>,
    route: Option<ProxyRoute>,
    tabs: Vec<Tab>,
    document_scripts: BTreeMap<ScriptSlot, String>,
    webrtc: WebRtcPolicy,
    indicator: IconState,
}

pub struct ChromiumHost {
    inner: Arc<Mutex<Inner>>,
    rules: SharedRules,
    auth: Arc<dyn AuthResponder>,
    handler: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

fn host_err(e: impl Display) -> GeomaskError {
    GeomaskError::Host(e.to_string())
}

impl ChromiumHost {
    /// Launch the browser and open one blank tab in the default context.
    pub async fn launch(options: ChromiumOptions, auth: Arc<dyn AuthResponder>) -> Result<Self> {
        let mut builder = BrowserConfig::builder();
        if let Some(path) = &options.executable {
            builder = builder.chrome_executable(path);
        }
        if !options.headless {
            builder = builder.with_head();
        }
        if options.no_sandbox {
            builder = builder.no_sandbox();
        }
        let config = builder.build().map_err(GeomaskError::Host)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(host_err)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("browser connection closed: {e}");
                    break;
                }
            }
        });

        let created = browser
            .event_listener::<EventTargetCreated>()
            .await
            .map_err(host_err)?;
        let destroyed = browser
            .event_listener::<EventTargetDestroyed>()
            .await
            .map_err(host_err)?;

        let inner = Arc::new(Mutex::new(Inner {
            browser,
            context: None,
            route: None,
            tabs: Vec::new(),
            document_scripts: BTreeMap::new(),
            webrtc: WebRtcPolicy::Default,
            indicator: IconState::Default,
        }));
        let rules: SharedRules = Arc::new(RwLock::new(HeaderRuleSet::default()));
        let watcher = tokio::spawn(watch_targets(
            Arc::clone(&inner),
            Arc::clone(&rules),
            Arc::clone(&auth),
            created,
            destroyed,
        ));

        let host = Self {
            inner,
            rules,
            auth,
            handler,
            watcher,
        };
        host.open_tab(BLANK).await?;
        info!("browser launched");
        Ok(host)
    }

    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        for tab in std::mem::take(&mut inner.tabs) {
            tab.close().await;
        }
        self.watcher.abort();
        if let Err(e) = inner.browser.close().await {
            warn!("browser close: {e}");
        }
        self.handler.abort();
    }

    /// Open a tab in `context`, wired for interception and document scripts,
    /// then navigate it.
    async fn spawn_tab(
        &self,
        inner: &Inner,
        context: Option<&BrowserContextId>,
        url: &str,
    ) -> Result<Tab> {
        let mut target = CreateTargetParams::builder().url(BLANK);
        if let Some(id) = context {
            target = target.browser_context_id(id.clone());
        }
        let target = target.build().map_err(GeomaskError::Host)?;
        let page = inner.browser.new_page(target).await.map_err(host_err)?;

        let mut scripts = HashMap::new();
        for (slot, source) in &inner.document_scripts {
            let id = add_document_script(&page, source).await?;
            scripts.insert(*slot, id);
        }

        let interceptor = intercept(&page, &self.rules, &self.auth).await?;
        if url != BLANK {
            page.goto(url).await.map_err(host_err)?;
        }
        Ok(Tab {
            page,
            scripts,
            interceptor,
        })
    }

    /// Reopen every tab in `context` and drop the previous context.
    async fn move_tabs(&self, inner: &mut Inner, context: Option<BrowserContextId>) -> Result<()> {
        let mut urls = Vec::new();
        for tab in &inner.tabs {
            let url = tab.page.url().await.ok().flatten();
            urls.push(url.unwrap_or_else(|| BLANK.to_string()));
        }
        if urls.is_empty() {
            urls.push(BLANK.to_string());
        }

        let mut fresh = Vec::with_capacity(urls.len());
        for url in &urls {
            match self.spawn_tab(inner, context.as_ref(), url).await {
                Ok(tab) => fresh.push(tab),
                Err(e) => {
                    for tab in fresh {
                        tab.close().await;
                    }
                    return Err(e);
                }
            }
        }

        for tab in std::mem::replace(&mut inner.tabs, fresh) {
            tab.close().await;
        }
        if let Some(previous) = std::mem::replace(&mut inner.context, context) {
            if let Err(e) = inner
                .browser
                .execute(DisposeBrowserContextParams::new(previous))
                .await
            {
                warn!("disposing old browser context: {e}");
            }
        }
        Ok(())
    }

    async fn register_locked(&self, inner: &mut Inner, slot: ScriptSlot, source: &str) -> Result<()> {
        for tab in inner.tabs.iter_mut() {
            if let Some(previous) = tab.scripts.remove(&slot) {
                remove_document_script(&tab.page, previous).await;
            }
            let id = add_document_script(&tab.page, source).await?;
            tab.scripts.insert(slot, id);
        }
        inner.document_scripts.insert(slot, source.to_string());
        Ok(())
    }

    async fn unregister_locked(&self, inner: &mut Inner, slot: ScriptSlot) {
        for tab in inner.tabs.iter_mut() {
            if let Some(previous) = tab.scripts.remove(&slot) {
                remove_document_script(&tab.page, previous).await;
            }
        }
        inner.document_scripts.remove(&slot);
    }

    async fn run_locked(&self, inner: &Inner, source: &str) -> usize {
        let mut ran = 0;
        for tab in &inner.tabs {
            match tab.page.execute(EvaluateParams::new(source)).await {
                Ok(_) => ran += 1,
                Err(e) => warn!("script skipped in tab: {e}"),
            }
        }
        ran
    }
}

/// Enable Fetch interception on `page` and spawn its event loop.
async fn intercept(
    page: &Page,
    rules: &SharedRules,
    auth: &Arc<dyn AuthResponder>,
) -> Result<JoinHandle<()>> {
    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(host_err)?;
    let mut challenges = page
        .event_listener::<EventAuthRequired>()
        .await
        .map_err(host_err)?;

    let pattern = RequestPattern::builder()
        .url_pattern("*")
        .request_stage(RequestStage::Request)
        .build();
    page.execute(
        EnableParams::builder()
            .handle_auth_requests(true)
            .pattern(pattern)
            .build(),
    )
    .await
    .map_err(host_err)?;

    let page = page.clone();
    let rules = Arc::clone(rules);
    let auth = Arc::clone(auth);
    Ok(tokio::spawn(async move {
        // Request ids that already received credentials.
        let mut answered: HashSet<String> = HashSet::new();
        loop {
            tokio::select! {
                Some(event) = paused.next() => {
                    if let Err(e) = continue_paused(&page, &rules, &event).await {
                        debug!("request {:?} not continued: {e}", event.request_id);
                    }
                }
                Some(event) = challenges.next() => {
                    if let Err(e) = answer_challenge(&page, auth.as_ref(), &mut answered, &event).await {
                        warn!("auth challenge not answered: {e}");
                    }
                }
                else => break,
            }
        }
    }))
}

/// Adopt pages opened outside the host and forget the ones that close.
///
/// Tabs spawned by the host are created under the `Inner` lock and tracked
/// before it is released, so they are recognised here and skipped.
async fn watch_targets(
    inner: Arc<Mutex<Inner>>,
    rules: SharedRules,
    auth: Arc<dyn AuthResponder>,
    mut created: EventStream<EventTargetCreated>,
    mut destroyed: EventStream<EventTargetDestroyed>,
) {
    loop {
        tokio::select! {
            Some(event) = created.next() => {
                let info = &event.target_info;
                if info.r#type != "page" {
                    continue;
                }
                let mut inner = inner.lock().await;
                if inner.tabs.iter().any(|t| t.page.target_id() == &info.target_id) {
                    continue;
                }
                match adopt_page(&inner, info.target_id.clone(), &rules, &auth).await {
                    Ok(tab) => {
                        debug!("adopted page {}", info.url);
                        inner.tabs.push(tab);
                    }
                    Err(e) => warn!("page {} left unwired: {e}", info.target_id.inner()),
                }
            }
            Some(event) = destroyed.next() => {
                let mut inner = inner.lock().await;
                if let Some(pos) = inner.tabs.iter().position(|t| t.page.target_id() == &event.target_id) {
                    inner.tabs.remove(pos).interceptor.abort();
                }
            }
            else => break,
        }
    }
}

/// Wire an already open page: interception, registered document scripts,
/// and one run of each script against the document it already shows.
async fn adopt_page(
    inner: &Inner,
    target_id: TargetId,
    rules: &SharedRules,
    auth: &Arc<dyn AuthResponder>,
) -> Result<Tab> {
    let mut attempt = 0;
    let page = loop {
        match inner.browser.get_page(target_id.clone()).await {
            Ok(page) => break page,
            Err(e) if attempt + 1 >= ADOPT_ATTEMPTS => return Err(host_err(e)),
            Err(_) => {
                attempt += 1;
                tokio::time::sleep(ADOPT_BACKOFF).await;
            }
        }
    };

    let interceptor = intercept(&page, rules, auth).await?;
    let mut scripts = HashMap::new();
    for (slot, source) in &inner.document_scripts {
        let id = add_document_script(&page, source).await?;
        scripts.insert(*slot, id);
        if let Err(e) = page.execute(EvaluateParams::new(source.clone())).await {
            debug!("script skipped in adopted page: {e}");
        }
    }
    Ok(Tab {
        page,
        scripts,
        interceptor,
    })
}

async fn add_document_script(page: &Page, source: &str) -> Result<ScriptIdentifier> {
    let response = page
        .execute(AddScriptToEvaluateOnNewDocumentParams::new(source))
        .await
        .map_err(host_err)?;
    Ok(response.result.identifier.clone())
}

async fn remove_document_script(page: &Page, id: ScriptIdentifier) {
    if let Err(e) = page
        .execute(RemoveScriptToEvaluateOnNewDocumentParams::new(id))
        .await
    {
        debug!("removing document script: {e}");
    }
}

fn resource_type(kind: &CdpResourceType, main_frame: bool) -> ResourceType {
    match kind {
        CdpResourceType::Document if main_frame => ResourceType::MainFrame,
        CdpResourceType::Document => ResourceType::SubFrame,
        CdpResourceType::Stylesheet => ResourceType::Stylesheet,
        CdpResourceType::Script => ResourceType::Script,
        CdpResourceType::Image => ResourceType::Image,
        CdpResourceType::Font => ResourceType::Font,
        CdpResourceType::Media => ResourceType::Media,
        CdpResourceType::Xhr | CdpResourceType::Fetch | CdpResourceType::EventSource => {
            ResourceType::Xmlhttprequest
        }
        CdpResourceType::WebSocket => ResourceType::Websocket,
        CdpResourceType::Ping => ResourceType::Ping,
        CdpResourceType::CspViolationReport => ResourceType::CspReport,
        _ => ResourceType::Other,
    }
}

async fn continue_paused(
    page: &Page,
    rules: &RwLock<HeaderRuleSet>,
    event: &EventRequestPaused,
) -> Result<()> {
    let main_frame = match event.resource_type {
        CdpResourceType::Document => {
            let main = page.mainframe().await.map_err(host_err)?;
            main.map_or(true, |id| id == event.frame_id)
        }
        _ => false,
    };
    let kind = resource_type(&event.resource_type, main_frame);
    let url = event.request.url.as_str();

    let (blocked, overrides) = {
        let rules = rules
            .read()
            .map_err(|_| GeomaskError::Host("rule table lock poisoned".into()))?;
        (rules.blocks(kind, url), rules.request_headers(kind, url))
    };

    if blocked {
        debug!("blocked sub-frame {url}");
        page.execute(FailRequestParams::new(
            event.request_id.clone(),
            ErrorReason::BlockedByClient,
        ))
        .await
        .map_err(host_err)?;
        return Ok(());
    }

    let mut params = ContinueRequestParams::new(event.request_id.clone());
    if !overrides.is_empty() {
        let mut headers: Vec<HeaderEntry> = event
            .request
            .headers
            .inner()
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(name, value)| {
                        value.as_str().map(|v| HeaderEntry::new(name.clone(), v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        for (name, value) in overrides {
            headers.retain(|h| !h.name.eq_ignore_ascii_case(&name));
            headers.push(HeaderEntry::new(name, value));
        }
        params.headers = Some(headers);
    }
    page.execute(params).await.map_err(host_err)?;
    Ok(())
}

async fn answer_challenge(
    page: &Page,
    auth: &dyn AuthResponder,
    answered: &mut HashSet<String>,
    event: &EventAuthRequired,
) -> Result<()> {
    let origin = url::Url::parse(&event.auth_challenge.origin)
        .map_err(|e| GeomaskError::Protocol(format!("challenge origin: {e}")))?;
    let request_key = event.request_id.as_ref().to_string();
    let challenge = AuthChallenge {
        host: origin.host_str().unwrap_or_default().to_string(),
        port: origin.port_or_known_default().unwrap_or_default(),
        is_proxy: matches!(event.auth_challenge.source, Some(AuthChallengeSource::Proxy)),
        retry: answered.contains(&request_key),
    };

    let response = match auth.respond(&challenge).await {
        AuthDecision::Provide { username, password } => {
            answered.insert(request_key);
            let mut response =
                AuthChallengeResponse::new(AuthChallengeResponseResponse::ProvideCredentials);
            response.username = Some(username);
            response.password = Some(password);
            response
        }
        AuthDecision::Default => AuthChallengeResponse::new(AuthChallengeResponseResponse::Default),
        AuthDecision::Cancel => AuthChallengeResponse::new(AuthChallengeResponseResponse::CancelAuth),
    };
    page.execute(ContinueWithAuthParams::new(event.request_id.clone(), response))
        .await
        .map_err(host_err)?;
    Ok(())
}

#[async_trait]
impl BrowserHost for ChromiumHost {
    async fn set_proxy_route(&self, route: &ProxyRoute) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let params = CreateBrowserContextParams::builder()
            .proxy_server(route.server())
            .build();
        let context = inner
            .browser
            .execute(params)
            .await
            .map_err(|e| GeomaskError::ProxyConfig(format!("cannot route through {route}: {e}")))?
            .result
            .browser_context_id
            .clone();

        if let Err(e) = self.move_tabs(&mut inner, Some(context.clone())).await {
            if let Err(dispose) = inner
                .browser
                .execute(DisposeBrowserContextParams::new(context))
                .await
            {
                debug!("disposing unused context: {dispose}");
            }
            return Err(GeomaskError::ProxyConfig(format!(
                "cannot route through {route}: {e}"
            )));
        }
        inner.route = Some(route.clone());
        info!("proxy route -> {route}");
        Ok(())
    }

    async fn clear_proxy_route(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.context.is_none() {
            inner.route = None;
            return Ok(());
        }
        self.move_tabs(&mut inner, None).await?;
        inner.route = None;
        info!("proxy route cleared");
        Ok(())
    }

    async fn proxy_route(&self) -> Result<Option<ProxyRoute>> {
        Ok(self.inner.lock().await.route.clone())
    }

    async fn update_rules(&self, remove_ids: &[u32], add_rules: &[HeaderRule]) -> Result<()> {
        let mut rules = self
            .rules
            .write()
            .map_err(|_| GeomaskError::Host("rule table lock poisoned".into()))?;
        let kept: Vec<HeaderRule> = rules
            .rules
            .iter()
            .filter(|r| !remove_ids.contains(&r.id))
            .cloned()
            .collect();
        if let Some(dup) = add_rules.iter().find(|a| kept.iter().any(|r| r.id == a.id)) {
            return Err(GeomaskError::Host(format!("rule id {} is already installed", dup.id)));
        }
        rules.rules = kept;
        rules.rules.extend(add_rules.iter().cloned());
        Ok(())
    }

    async fn installed_rules(&self) -> Result<Vec<HeaderRule>> {
        let rules = self
            .rules
            .read()
            .map_err(|_| GeomaskError::Host("rule table lock poisoned".into()))?;
        Ok(rules.rules.clone())
    }

    async fn run_in_open_tabs(&self, source: &str) -> Result<usize> {
        let inner = self.inner.lock().await;
        Ok(self.run_locked(&inner, source).await)
    }

    async fn register_document_script(&self, slot: ScriptSlot, source: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.register_locked(&mut inner, slot, source).await
    }

    async fn unregister_document_script(&self, slot: ScriptSlot) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.unregister_locked(&mut inner, slot).await;
        Ok(())
    }

    async fn registered_slots(&self) -> Result<Vec<ScriptSlot>> {
        Ok(self.inner.lock().await.document_scripts.keys().copied().collect())
    }

    async fn set_webrtc_policy(&self, policy: WebRtcPolicy) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match policy {
            WebRtcPolicy::Protected => {
                let guard = webrtc::guard_script();
                self.register_locked(&mut inner, ScriptSlot::WebRtcGuard, &guard)
                    .await?;
                self.run_locked(&inner, &guard).await;
            }
            WebRtcPolicy::Default => {
                self.unregister_locked(&mut inner, ScriptSlot::WebRtcGuard).await;
                if inner.webrtc == WebRtcPolicy::Protected {
                    self.run_locked(&inner, &webrtc::release_script()).await;
                }
            }
        }
        inner.webrtc = policy;
        Ok(())
    }

    async fn set_indicator(&self, state: IconState) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.indicator != state {
            info!("indicator -> {state}");
            inner.indicator = state;
        }
        Ok(())
    }

    async fn open_tab(&self, url: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let context = inner.context.clone();
        let tab = self.spawn_tab(&inner, context.as_ref(), url).await?;
        inner.tabs.push(tab);
        Ok(())
    }
}
