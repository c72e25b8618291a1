//! Proxy authentication routing.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::host::AuthResponder;
use crate::model::Proxy;
use crate::store::StateStore;

/// An authentication challenge raised by the network stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub host: String,
    pub port: u16,
    /// Raised by a proxy rather than the origin server.
    pub is_proxy: bool,
    /// Credentials were already supplied once for this request.
    pub retry: bool,
}

impl AuthChallenge {
    pub fn proxy(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            is_proxy: true,
            retry: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Provide { username: String, password: String },
    /// Leave the challenge to the browser's own prompt.
    Default,
    Cancel,
}

/// Decide how to answer `challenge` given the currently active proxy.
///
/// Credentials only ever go to the exact host:port of the active record.
pub fn decide(active: Option<&Proxy>, challenge: &AuthChallenge) -> AuthDecision {
    if !challenge.is_proxy {
        return AuthDecision::Default;
    }
    let Some(active) = active else {
        return AuthDecision::Cancel;
    };
    if !active.matches(&challenge.host, challenge.port) {
        return AuthDecision::Cancel;
    }
    match active.credentials() {
        Some(_) if challenge.retry => AuthDecision::Cancel,
        Some((username, password)) => AuthDecision::Provide {
            username: username.to_string(),
            password: password.to_string(),
        },
        None => AuthDecision::Default,
    }
}

/// The record whose route is being set up but not yet persisted.
///
/// Switching the route reloads pages through the new proxy before the store
/// names it active, so its challenges are answered from here meanwhile.
#[derive(Debug, Default)]
pub struct PendingProxy {
    slot: Mutex<Option<Proxy>>,
}

impl PendingProxy {
    /// Publish `proxy` until the returned guard is dropped.
    pub fn hold(&self, proxy: Proxy) -> PendingGuard<'_> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(proxy);
        }
        PendingGuard { pending: self }
    }

    pub fn get(&self) -> Option<Proxy> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

pub struct PendingGuard<'a> {
    pending: &'a PendingProxy,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.pending.slot.lock() {
            *slot = None;
        }
    }
}

/// Answers challenges from the pending route, else the persisted active record.
pub struct ActiveProxyAuth {
    store: Arc<dyn StateStore>,
    pending: Arc<PendingProxy>,
}

impl ActiveProxyAuth {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            pending: Arc::default(),
        }
    }

    /// Share the controller's pending record.
    pub fn with_pending(mut self, pending: Arc<PendingProxy>) -> Self {
        self.pending = pending;
        self
    }
}

#[async_trait]
impl AuthResponder for ActiveProxyAuth {
    async fn respond(&self, challenge: &AuthChallenge) -> AuthDecision {
        let decision = match self.pending.get() {
            Some(pending) => decide(Some(&pending), challenge),
            None => match self.store.proxies().await {
                Ok(proxies) => decide(proxies.active(), challenge),
                Err(e) => {
                    warn!("auth challenge from {}:{} cancelled: {e}", challenge.host, challenge.port);
                    return AuthDecision::Cancel;
                }
            },
        };
        debug!(
            "auth challenge {}:{} -> {}",
            challenge.host,
            challenge.port,
            match &decision {
                AuthDecision::Provide { .. } => "provide",
                AuthDecision::Default => "default",
                AuthDecision::Cancel => "cancel",
            }
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProxyList;
    use crate::store::MemoryStore;

    fn with_creds() -> Proxy {
        let mut p = Proxy::new("1.2.3.4", 8080).with_credentials("alice", "s3cret");
        p.is_active = true;
        p
    }

    #[test]
    fn test_matching_challenge_gets_credentials() {
        let decision = decide(Some(&with_creds()), &AuthChallenge::proxy("1.2.3.4", 8080));
        assert_eq!(
            decision,
            AuthDecision::Provide {
                username: "alice".into(),
                password: "s3cret".into()
            }
        );
    }

    #[test]
    fn test_other_proxy_is_cancelled() {
        let active = with_creds();
        assert_eq!(decide(Some(&active), &AuthChallenge::proxy("1.2.3.4", 8081)), AuthDecision::Cancel);
        assert_eq!(decide(Some(&active), &AuthChallenge::proxy("5.6.7.8", 8080)), AuthDecision::Cancel);
    }

    #[test]
    fn test_no_active_proxy_cancels() {
        assert_eq!(decide(None, &AuthChallenge::proxy("1.2.3.4", 8080)), AuthDecision::Cancel);
    }

    #[test]
    fn test_missing_credentials_defers_to_prompt() {
        let mut p = Proxy::new("1.2.3.4", 8080);
        p.is_active = true;
        assert_eq!(decide(Some(&p), &AuthChallenge::proxy("1.2.3.4", 8080)), AuthDecision::Default);
    }

    #[test]
    fn test_retry_after_credentials_is_cancelled() {
        let mut challenge = AuthChallenge::proxy("1.2.3.4", 8080);
        challenge.retry = true;
        assert_eq!(decide(Some(&with_creds()), &challenge), AuthDecision::Cancel);
    }

    #[test]
    fn test_server_challenge_left_alone() {
        let mut challenge = AuthChallenge::proxy("example.com", 443);
        challenge.is_proxy = false;
        assert_eq!(decide(None, &challenge), AuthDecision::Default);
    }

    #[tokio::test]
    async fn test_pending_record_wins_until_released() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_proxies(&ProxyList::from(vec![with_creds()]))
            .await
            .unwrap();
        let pending = Arc::new(PendingProxy::default());
        let responder = ActiveProxyAuth::new(store.clone()).with_pending(pending.clone());

        let next = Proxy::new("5.6.7.8", 3128).with_credentials("bob", "hunter2");
        let guard = pending.hold(next);
        assert!(matches!(
            responder.respond(&AuthChallenge::proxy("5.6.7.8", 3128)).await,
            AuthDecision::Provide { username, .. } if username == "bob"
        ));
        assert_eq!(
            responder.respond(&AuthChallenge::proxy("1.2.3.4", 8080)).await,
            AuthDecision::Cancel
        );

        drop(guard);
        assert_eq!(pending.get(), None);
        assert!(matches!(
            responder.respond(&AuthChallenge::proxy("1.2.3.4", 8080)).await,
            AuthDecision::Provide { .. }
        ));
    }

    #[tokio::test]
    async fn test_responder_reads_store() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_proxies(&ProxyList::from(vec![with_creds()]))
            .await
            .unwrap();
        let responder = ActiveProxyAuth::new(store.clone());
        let decision = responder.respond(&AuthChallenge::proxy("1.2.3.4", 8080)).await;
        assert!(matches!(decision, AuthDecision::Provide { .. }));
    }
}
