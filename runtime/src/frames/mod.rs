//! Frame suppressor: strip `<iframe>` elements from pages.
//!
//! Complements the network-level sub-frame block with a DOM-level pass:
//! one sweep over the document when injected, a `MutationObserver` that
//! strips frames from every added element, and a periodic sweep for frames
//! the observer missed. Pages whose top-level hostname is on the allow-list
//! are left alone. The observer and sweep stop on `pagehide` and whenever
//! the script is re-injected or torn down, so at most one of each exists
//! per document.

use serde_json::json;

use crate::model::FeatureToggle;

const OBSERVER_KEY: &str = "geomask.frames";

/// Period of the fallback sweep.
pub const SWEEP_INTERVAL_MS: u64 = 100;

const SUPPRESSOR_TEMPLATE: &str = r#"(function (removeFrames, allowed) {
    "use strict";
    var KEY = Symbol.for(__KEY__);
    try {
        if (window[KEY]) { window[KEY].disconnect(); delete window[KEY]; }
        if (!removeFrames) { return; }
        var host;
        try { host = window.top.location.hostname; } catch (_) { host = location.hostname; }
        if (allowed.indexOf(host) !== -1) {
            console.debug("frames allowed on " + host);
            return;
        }

        var strip = function (root) {
            if (root.tagName === "IFRAME") { root.remove(); return; }
            root.querySelectorAll("iframe").forEach(function (frame) { frame.remove(); });
        };
        var observer = new MutationObserver(function (mutations) {
            mutations.forEach(function (mutation) {
                mutation.addedNodes.forEach(function (node) {
                    if (node instanceof Element) { strip(node); }
                });
            });
        });
        observer.observe(document.documentElement || document, { childList: true, subtree: true });
        var sweep = setInterval(function () {
            if (document.documentElement) { strip(document.documentElement); }
        }, __SWEEP_MS__);

        var onHide = function () { observer.disconnect(); clearInterval(sweep); };
        window.addEventListener("pagehide", onHide, { once: true });
        Object.defineProperty(window, KEY, {
            value: {
                disconnect: function () {
                    observer.disconnect();
                    clearInterval(sweep);
                    window.removeEventListener("pagehide", onHide);
                }
            },
            configurable: true, enumerable: false, writable: true
        });

        if (document.documentElement) { strip(document.documentElement); }
    } catch (e) {
        try { console.debug("frame suppressor skipped", e); } catch (_) {}
    }
})(__ENABLED__, __ALLOWED__);
"#;

const TEARDOWN_TEMPLATE: &str = r#"(function () {
    "use strict";
    var KEY = Symbol.for(__KEY__);
    try {
        if (window[KEY]) { window[KEY].disconnect(); delete window[KEY]; }
    } catch (e) {
        try { console.debug("frame suppressor teardown skipped", e); } catch (_) {}
    }
})();
"#;

/// The suppressor, gated by the persisted `iframes` toggle and skipping
/// pages whose top-level hostname is in `allowed`.
pub fn suppressor_script(toggle: FeatureToggle, allowed: &[String]) -> String {
    SUPPRESSOR_TEMPLATE
        .replace("__KEY__", &json!(OBSERVER_KEY).to_string())
        .replace("__SWEEP_MS__", &SWEEP_INTERVAL_MS.to_string())
        .replace("__ENABLED__", if toggle.is_enabled() { "true" } else { "false" })
        .replace("__ALLOWED__", &json!(allowed).to_string())
}

/// Normalise a user-supplied entry to a bare hostname.
///
/// Accepts `example.com`, `Example.COM.` or a full URL.
pub fn allow_list_host(entry: &str) -> Option<String> {
    let entry = entry.trim();
    let host = match url::Url::parse(entry) {
        Ok(url) if url.has_host() => url.host_str()?.to_string(),
        _ => entry.split(['/', ':']).next()?.to_string(),
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    (!host.is_empty() && !host.contains(char::is_whitespace)).then_some(host)
}

/// Disconnects the observer left by [`suppressor_script`], if any.
pub fn teardown_script() -> String {
    TEARDOWN_TEMPLATE.replace("__KEY__", &json!(OBSERVER_KEY).to_string())
}
