//! WebRTC leak guard.
//!
//! While protected, every `RTCPeerConnection` is forced onto relay-only ICE
//! candidates, so no host or server-reflexive address (the real IP) is
//! gathered outside the proxy.

use serde_json::json;

const GUARD_KEY: &str = "geomask.webrtc";

const GUARD_TEMPLATE: &str = r#"(function () {
    "use strict";
    var KEY = Symbol.for(__KEY__);
    try {
        if (window[KEY]) { return; }
        var saved = {};
        ["RTCPeerConnection", "webkitRTCPeerConnection"].forEach(function (name) {
            var Native = window[name];
            if (typeof Native !== "function") { return; }
            saved[name] = Native;
            var Guarded = function RTCPeerConnection(config, constraints) {
                var cfg = Object.assign({}, config, { iceTransportPolicy: "relay" });
                return new Native(cfg, constraints);
            };
            Guarded.prototype = Native.prototype;
            Object.getOwnPropertyNames(Native).forEach(function (prop) {
                if (prop === "prototype") { return; }
                try { Object.defineProperty(Guarded, prop, Object.getOwnPropertyDescriptor(Native, prop)); } catch (_) {}
            });
            window[name] = Guarded;
        });
        Object.defineProperty(window, KEY, { value: saved, configurable: true, enumerable: false, writable: true });
    } catch (e) {
        try { console.debug("webrtc guard skipped", e); } catch (_) {}
    }
})();
"#;

const RELEASE_TEMPLATE: &str = r#"(function () {
    "use strict";
    var KEY = Symbol.for(__KEY__);
    try {
        var saved = window[KEY];
        if (!saved) { return; }
        Object.keys(saved).forEach(function (name) { window[name] = saved[name]; });
        delete window[KEY];
    } catch (e) {
        try { console.debug("webrtc release skipped", e); } catch (_) {}
    }
})();
"#;

pub fn guard_script() -> String {
    GUARD_TEMPLATE.replace("__KEY__", &json!(GUARD_KEY).to_string())
}

pub fn release_script() -> String {
    RELEASE_TEMPLATE.replace("__KEY__", &json!(GUARD_KEY).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_forces_relay() {
        let src = guard_script();
        assert!(src.contains(r#"iceTransportPolicy: "relay""#));
        assert!(src.contains(r#"Symbol.for("geomask.webrtc")"#));
        assert!(release_script().contains(r#"Symbol.for("geomask.webrtc")"#));
    }
}
