//! Getting page source into the page's own JavaScript realm.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;

/// How a script reaches the page realm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealmDelivery {
    /// The caller already evaluates in the main world (DevTools `Runtime.evaluate`).
    #[default]
    MainWorld,
    /// The caller runs in an isolated world sharing only the DOM.
    ///
    /// The source is set as an inline `onreset` handler on the root element
    /// and fired with a synthetic `reset` event, which makes the page realm
    /// compile and run it. The attribute is removed right after.
    DomEvent,
}

impl RealmDelivery {
    pub fn wrap(self, source: &str) -> String {
        match self {
            RealmDelivery::MainWorld => source.to_string(),
            RealmDelivery::DomEvent => format!(
                r#"(function () {{
    var root = document.documentElement;
    if (!root) {{ return; }}
    root.setAttribute("onreset", {code});
    try {{
        root.dispatchEvent(new CustomEvent("reset"));
    }} finally {{
        root.removeAttribute("onreset");
    }}
}})();
"#,
                code = json!(source)
            ),
        }
    }
}

impl FromStr for RealmDelivery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "main_world" => Ok(RealmDelivery::MainWorld),
            "dom_event" => Ok(RealmDelivery::DomEvent),
            other => Err(format!("unknown delivery '{other}' (expected main-world or dom-event)")),
        }
    }
}
