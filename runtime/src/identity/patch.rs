//! The identity patch value object.

use serde_json::{json, Map, Value};
use tracing::warn;

use super::script;
use super::ua::{self, UserAgentInfo};
use crate::model::{Locale, Platform, ProxyList};
use crate::store::{KEY_PROXIES, KEY_UA};

/// Value installed for one navigator property.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    /// A JSON-representable value.
    Json(Value),
    /// A page-side JavaScript expression, for values that need functions.
    Expr(String),
}

impl PatchValue {
    /// JavaScript source for the value.
    pub fn to_js(&self) -> String {
        match self {
            PatchValue::Json(v) => v.to_string(),
            PatchValue::Expr(src) => src.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyOverride {
    pub name: String,
    pub value: PatchValue,
}

/// Everything needed to present a spoofed identity inside a page.
///
/// Each override becomes a non-writable, non-configurable, enumerable data
/// property on a fresh `Object.create(navigator)`.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityPatch {
    pub user_agent: String,
    pub language: String,
    pub timezone: String,
    pub platform: Option<Platform>,
    pub overrides: Vec<PropertyOverride>,
}

impl IdentityPatch {
    /// Locate the active proxy in a full state snapshot and build its patch.
    ///
    /// The effective user-agent is the stored `ua` override, else
    /// `fallback_user_agent`. Returns `None` when no proxy is active.
    pub fn from_state(state: &Map<String, Value>, fallback_user_agent: &str) -> Option<Self> {
        let proxies: ProxyList = match state.get(KEY_PROXIES) {
            Some(v) => match serde_json::from_value(v.clone()) {
                Ok(list) => list,
                Err(e) => {
                    warn!("unreadable proxy list in state: {e}");
                    return None;
                }
            },
            None => ProxyList::default(),
        };

        let Some(active) = proxies.active() else {
            warn!("no active proxy found; identity patch skipped");
            return None;
        };

        let user_agent = state
            .get(KEY_UA)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback_user_agent);

        let fallback = Locale::fallback();
        let locale = Locale::new(
            active.language.clone().unwrap_or(fallback.language),
            active.timezone.clone().unwrap_or(fallback.timezone),
        );
        Some(Self::build(user_agent, &locale))
    }

    pub fn build(user_agent: &str, locale: &Locale) -> Self {
        let info = UserAgentInfo::parse(user_agent);
        let mut overrides = Vec::new();
        let mut push = |name: &str, value: PatchValue| {
            overrides.push(PropertyOverride {
                name: name.to_string(),
                value,
            })
        };

        push("userAgent", PatchValue::Json(json!(user_agent)));
        push("appVersion", PatchValue::Json(json!(ua::app_version(user_agent))));
        if let Some(platform) = info.platform {
            push("platform", PatchValue::Json(json!(platform.navigator_value())));
        }
        push("language", PatchValue::Json(json!(locale.language)));
        push("languages", PatchValue::Expr(frozen_array(&languages_for(&locale.language))));
        if info.is_chromium() {
            push("userAgentData", PatchValue::Expr(user_agent_data(user_agent, &info)));
        }

        for (name, value) in inert_properties() {
            push(name, PatchValue::Json(value));
        }
        push("geolocation", PatchValue::Expr(script::DENIED_GEOLOCATION.to_string()));
        push(
            "virtualKeyboard",
            PatchValue::Expr(
                "{ boundingRect: typeof DOMRect === 'function' ? new DOMRect(0, 0, 0, 0) : {}, overlaysContent: false, ongeometrychange: null }"
                    .to_string(),
            ),
        );

        Self {
            user_agent: user_agent.to_string(),
            language: locale.language.clone(),
            timezone: locale.timezone.clone(),
            platform: info.platform,
            overrides,
        }
    }

    pub fn get(&self, name: &str) -> Option<&PatchValue> {
        self.overrides
            .iter()
            .find(|o| o.name == name)
            .map(|o| &o.value)
    }

    /// Page source that applies this patch.
    pub fn apply_script(&self) -> String {
        script::render_apply(self)
    }

    /// Page source that undoes any previously applied patch.
    pub fn restore_script() -> String {
        script::render_restore()
    }
}

/// `fr-FR` becomes `["fr-FR", "fr"]`; a bare tag stays alone.
fn languages_for(language: &str) -> Vec<String> {
    let mut langs = vec![language.to_string()];
    if let Some((base, _)) = language.split_once('-') {
        if !base.is_empty() {
            langs.push(base.to_string());
        }
    }
    langs
}

fn frozen_array(items: &[String]) -> String {
    format!("Object.freeze({})", json!(items))
}

/// `userAgentData` with brand triplets and the high-entropy fields.
fn user_agent_data(user_agent: &str, info: &UserAgentInfo) -> String {
    let platform = info.hint_platform(user_agent);
    let brands = json!([
        { "brand": info.brand, "version": info.brand_major },
        { "brand": "Not A(Brand", "version": "8" },
        { "brand": "Chromium", "version": info.engine_major },
    ]);
    let full_version_list = json!([
        { "brand": info.brand, "version": info.brand_full },
        { "brand": "Not A(Brand", "version": "8.0.0.0" },
        { "brand": "Chromium", "version": info.engine_full },
    ]);
    let data = json!({
        "brands": brands,
        "mobile": info.mobile,
        "platform": platform,
    });
    let high_entropy = json!({
        "architecture": info.architecture,
        "bitness": "64",
        "model": "",
        "platformVersion": info.os_version.clone().unwrap_or_default(),
        "uaFullVersion": info.brand_full,
        "fullVersionList": full_version_list,
        "wow64": false,
    });
    format!("{}({data}, {high_entropy})", script::UA_DATA_FACTORY)
}

/// Capability surfaces replaced with low-entropy placeholders.
fn inert_properties() -> Vec<(&'static str, Value)> {
    vec![
        ("productSub", json!("20030107")),
        ("deviceMemory", json!(8)),
        ("hardwareConcurrency", json!(8)),
        ("maxTouchPoints", json!(0)),
        ("vendor", json!("Google Inc.")),
        ("vendorSub", json!("")),
        ("appCodeName", json!("Mozilla")),
        ("appName", json!("Netscape")),
        ("product", json!("Gecko")),
        ("onLine", json!(true)),
        ("pdfViewerEnabled", json!(true)),
        ("cookieEnabled", json!(true)),
        ("webdriver", json!(false)),
        ("doNotTrack", Value::Null),
        ("bluetooth", json!({})),
        ("clipboard", json!({})),
        ("credentials", json!({})),
        ("ink", json!({})),
        ("keyboard", json!({})),
        ("locks", json!({})),
        ("mediaCapabilities", json!({})),
        ("permissions", json!({})),
        ("plugins", json!({ "length": 0 })),
        ("scheduling", json!({})),
        ("storage", json!({})),
        ("wakeLock", json!({})),
        ("webkitPersistentStorage", json!({})),
        ("webkitTemporaryStorage", json!({})),
        ("windowControlsOverlay", json!({})),
        ("xr", json!({})),
        ("mediaDevices", json!({ "ondevicechange": null })),
        ("usb", json!({ "onconnect": null, "ondisconnect": null })),
        ("hid", json!({ "onconnect": null, "ondisconnect": null })),
        ("serial", json!({ "onconnect": null, "ondisconnect": null })),
        ("managed", json!({ "onmanagedconfigurationchange": null })),
        ("presentation", json!({ "defaultRequest": null, "receiver": null })),
        ("mediaSession", json!({ "metadata": null, "playbackState": "none" })),
        ("userActivation", json!({ "hasBeenActive": true, "isActive": true })),
        (
            "connection",
            json!({ "downlink": 10, "effectiveType": "4g", "onchange": null, "rtt": 50, "saveData": false }),
        ),
        (
            "mimeTypes",
            json!({
                "0": "MimeType",
                "1": "MimeType",
                "application/pdf": "MimeType",
                "text/pdf": "MimeType",
                "length": 2
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Proxy;

    const WIN_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.6367.91 Safari/537.36";
    const LINUX_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    fn state_with(proxies: Vec<Proxy>, ua: Option<&str>) -> Map<String, Value> {
        let mut state = Map::new();
        state.insert(KEY_PROXIES.into(), serde_json::to_value(proxies).unwrap());
        if let Some(ua) = ua {
            state.insert(KEY_UA.into(), json!(ua));
        }
        state
    }

    #[test]
    fn test_from_state_requires_active_proxy() {
        let state = state_with(vec![Proxy::new("1.2.3.4", 8080)], None);
        assert!(IdentityPatch::from_state(&state, WIN_UA).is_none());
        assert!(IdentityPatch::from_state(&Map::new(), WIN_UA).is_none());
    }

    #[test]
    fn test_from_state_prefers_ua_override() {
        let mut active = Proxy::new("1.2.3.4", 8080);
        active.is_active = true;
        active.language = Some("fr-FR".into());
        active.timezone = Some("Europe/Paris".into());
        let state = state_with(vec![active], Some(LINUX_UA));

        let patch = IdentityPatch::from_state(&state, WIN_UA).unwrap();
        assert_eq!(patch.user_agent, LINUX_UA);
        assert_eq!(patch.timezone, "Europe/Paris");
        // Linux agents keep the real navigator.platform.
        assert!(patch.platform.is_none());
        assert!(patch.get("platform").is_none());
    }

    #[test]
    fn test_build_core_properties() {
        let patch = IdentityPatch::build(WIN_UA, &Locale::new("de-DE", "Europe/Berlin"));
        assert_eq!(patch.get("userAgent"), Some(&PatchValue::Json(json!(WIN_UA))));
        assert_eq!(patch.get("platform"), Some(&PatchValue::Json(json!("Win32"))));
        assert_eq!(
            patch.get("languages").unwrap().to_js(),
            r#"Object.freeze(["de-DE","de"])"#
        );
        let app_version = patch.get("appVersion").unwrap().to_js();
        assert!(app_version.starts_with("\"5.0 (Windows NT 10.0"));
    }

    #[test]
    fn test_user_agent_data_carries_versions() {
        let patch = IdentityPatch::build(WIN_UA, &Locale::fallback());
        let src = patch.get("userAgentData").unwrap().to_js();
        assert!(src.contains(r#""platformVersion":"10.0""#));
        assert!(src.contains(r#""version":"124.0.6367.91""#));
        assert!(src.contains(r#""brand":"Google Chrome""#));
    }

    #[test]
    fn test_override_names_are_unique() {
        let patch = IdentityPatch::build(WIN_UA, &Locale::fallback());
        let mut names: Vec<_> = patch.overrides.iter().map(|o| o.name.as_str()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
