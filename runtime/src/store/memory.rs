//! In-process store, used by tests and the `--ephemeral` daemon mode.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::StateStore;
use crate::error::{GeomaskError, Result};

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a storage error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(GeomaskError::Storage("store is read-only".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check_writable()?;
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.values.lock().await.remove(key);
        Ok(())
    }

    async fn snapshot(&self) -> Result<Map<String, Value>> {
        Ok(self
            .values
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Feature, FeatureToggle, Proxy, ProxyList};

    #[tokio::test]
    async fn test_typed_helpers_defaults() {
        let store = MemoryStore::new();
        assert!(store.proxies().await.unwrap().is_empty());
        assert!(store.ua_override().await.unwrap().is_none());
        assert_eq!(
            store.toggle(Feature::Iframes).await.unwrap(),
            FeatureToggle::Enabled
        );
    }

    #[tokio::test]
    async fn test_proxies_roundtrip_through_json() {
        let store = MemoryStore::new();
        let list = ProxyList(vec![Proxy::new("1.2.3.4", 8080)]);
        store.set_proxies(&list).await.unwrap();
        assert_eq!(store.proxies().await.unwrap(), list);

        let raw = store.get("proxies").await.unwrap().unwrap();
        assert_eq!(raw[0]["isActive"], false);
    }

    #[tokio::test]
    async fn test_empty_ua_override_is_cleared() {
        let store = MemoryStore::new();
        store.set_ua_override(Some("UA/1.0")).await.unwrap();
        assert_eq!(store.ua_override().await.unwrap().as_deref(), Some("UA/1.0"));
        store.set_ua_override(Some("")).await.unwrap();
        assert!(store.ua_override().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_value() {
        let store = MemoryStore::new();
        store.set_toggle(Feature::WebRtc, FeatureToggle::Disabled).await.unwrap();
        store.fail_writes(true);
        assert!(store
            .set_toggle(Feature::WebRtc, FeatureToggle::Enabled)
            .await
            .is_err());
        assert_eq!(
            store.toggle(Feature::WebRtc).await.unwrap(),
            FeatureToggle::Disabled
        );
    }
}
