//! Render identity patches to page JavaScript.
//!
//! Every value reaches the page as a JSON literal, so no string escaping
//! happens here. The rendered source never throws: a failure before the
//! final swap leaves the page's own `navigator` untouched.

use super::patch::IdentityPatch;
use serde_json::json;

/// Global symbol holding the pre-patch navigator.
pub const NAVIGATOR_KEY: &str = "geomask.navigator";
/// Global symbol holding the timezone state and the original Intl/Date members.
pub const TIMEZONE_KEY: &str = "geomask.timezone";

/// Geolocation stub that denies every request.
pub const DENIED_GEOLOCATION: &str = r#"(function () {
    var denied = { code: 1, PERMISSION_DENIED: 1, message: "User denied Geolocation" };
    var fail = function (success, error) { if (typeof error === "function") { setTimeout(function () { error(denied); }, 0); } };
    return {
        getCurrentPosition: fail,
        watchPosition: function (success, error) { fail(success, error); return 0; },
        clearWatch: function () {}
    };
})()"#;

/// Builds `navigator.userAgentData` from low- and high-entropy fields.
pub const UA_DATA_FACTORY: &str = r#"(function (low, high) {
    var data = {
        brands: Object.freeze(low.brands),
        mobile: low.mobile,
        platform: low.platform,
        getHighEntropyValues: function (hints) {
            var out = { brands: low.brands, mobile: low.mobile, platform: low.platform };
            (hints || []).forEach(function (h) { if (h in high) { out[h] = high[h]; } });
            return Promise.resolve(out);
        },
        toJSON: function () { return { brands: low.brands, mobile: low.mobile, platform: low.platform }; }
    };
    return Object.freeze(data);
})"#;

const APPLY_TEMPLATE: &str = r#"(function () {
    "use strict";
    var NAV_KEY = Symbol.for(__NAV_KEY__);
    var TZ_KEY = Symbol.for(__TZ_KEY__);
    var timezone = __TIMEZONE__;
    try {
        var current = window.navigator;
        var spoofed = Object.create(current);
        var descriptors = {};
        var rTMPL = function (value) {
            return { value: value, configurable: false, enumerable: true, writable: false };
        };
__DESCRIPTORS__
        Object.defineProperties(spoofed, descriptors);

        var tz = window[TZ_KEY];
        if (!tz) {
            tz = {
                timezone: timezone,
                DateTimeFormat: Intl.DateTimeFormat,
                resolvedOptions: Intl.DateTimeFormat.prototype.resolvedOptions,
                toLocaleString: Date.prototype.toLocaleString,
                toLocaleDateString: Date.prototype.toLocaleDateString,
                toLocaleTimeString: Date.prototype.toLocaleTimeString,
                toString: Date.prototype.toString
            };
            var Native = tz.DateTimeFormat;
            var withZone = function (options) {
                var opts = Object.assign({}, options);
                if (opts.timeZone === undefined) { opts.timeZone = tz.timezone; }
                return opts;
            };
            var Patched = function DateTimeFormat(locales, options) {
                return new Native(locales, withZone(options));
            };
            Object.getOwnPropertyNames(Native).forEach(function (prop) {
                try { Object.defineProperty(Patched, prop, Object.getOwnPropertyDescriptor(Native, prop)); } catch (_) {}
            });
            Native.prototype.resolvedOptions = function resolvedOptions() {
                var resolved = tz.resolvedOptions.call(this);
                resolved.timeZone = tz.timezone;
                return resolved;
            };
            Date.prototype.toLocaleString = function toLocaleString(locales, options) {
                return tz.toLocaleString.call(this, locales, withZone(options));
            };
            Date.prototype.toLocaleDateString = function toLocaleDateString(locales, options) {
                return tz.toLocaleDateString.call(this, locales, withZone(options));
            };
            Date.prototype.toLocaleTimeString = function toLocaleTimeString(locales, options) {
                return tz.toLocaleTimeString.call(this, locales, withZone(options));
            };
            Date.prototype.toString = function toString() {
                if (isNaN(this.getTime())) { return "Invalid Date"; }
                var parts = {};
                new Native("en-US", {
                    timeZone: tz.timezone, weekday: "short", year: "numeric", month: "short",
                    day: "2-digit", hour: "2-digit", minute: "2-digit", second: "2-digit",
                    hourCycle: "h23", timeZoneName: "longOffset"
                }).formatToParts(this).forEach(function (p) { parts[p.type] = p.value; });
                var name = "";
                new Native("en-US", { timeZone: tz.timezone, timeZoneName: "long" })
                    .formatToParts(this).forEach(function (p) { if (p.type === "timeZoneName") { name = p.value; } });
                var offset = (parts.timeZoneName || "GMT").replace(":", "");
                if (offset === "GMT") { offset = "GMT+0000"; }
                return parts.weekday + " " + parts.month + " " + parts.day + " " + parts.year + " " +
                    parts.hour + ":" + parts.minute + ":" + parts.second + " " + offset + " (" + name + ")";
            };
            Intl.DateTimeFormat = Patched;
            Object.defineProperty(window, TZ_KEY, { value: tz, configurable: true, enumerable: false, writable: true });
        }
        tz.timezone = timezone;

        if (!(NAV_KEY in window)) {
            Object.defineProperty(window, NAV_KEY, { value: current, configurable: true, enumerable: false, writable: true });
        }
        Object.defineProperty(window, "navigator", {
            value: spoofed, configurable: true, enumerable: true, writable: true
        });
    } catch (e) {
        try { console.debug("identity patch skipped", e); } catch (_) {}
    }
})();
"#;

const RESTORE_TEMPLATE: &str = r#"(function () {
    "use strict";
    var NAV_KEY = Symbol.for(__NAV_KEY__);
    var TZ_KEY = Symbol.for(__TZ_KEY__);
    try {
        if (NAV_KEY in window) {
            Object.defineProperty(window, "navigator", {
                value: window[NAV_KEY], configurable: true, enumerable: true, writable: true
            });
            delete window[NAV_KEY];
        }
        var tz = window[TZ_KEY];
        if (tz) {
            Intl.DateTimeFormat = tz.DateTimeFormat;
            tz.DateTimeFormat.prototype.resolvedOptions = tz.resolvedOptions;
            Date.prototype.toLocaleString = tz.toLocaleString;
            Date.prototype.toLocaleDateString = tz.toLocaleDateString;
            Date.prototype.toLocaleTimeString = tz.toLocaleTimeString;
            Date.prototype.toString = tz.toString;
            delete window[TZ_KEY];
        }
    } catch (e) {
        try { console.debug("identity restore skipped", e); } catch (_) {}
    }
})();
"#;

pub(crate) fn render_apply(patch: &IdentityPatch) -> String {
    let descriptors: String = patch
        .overrides
        .iter()
        .map(|o| {
            format!(
                "        descriptors[{}] = rTMPL({});\n",
                json!(o.name),
                o.value.to_js()
            )
        })
        .collect();

    APPLY_TEMPLATE
        .replace("__NAV_KEY__", &json!(NAVIGATOR_KEY).to_string())
        .replace("__TZ_KEY__", &json!(TIMEZONE_KEY).to_string())
        .replace("__TIMEZONE__", &json!(patch.timezone).to_string())
        .replace("__DESCRIPTORS__\n", &descriptors)
}

pub(crate) fn render_restore() -> String {
    RESTORE_TEMPLATE
        .replace("__NAV_KEY__", &json!(NAVIGATOR_KEY).to_string())
        .replace("__TZ_KEY__", &json!(TIMEZONE_KEY).to_string())
}
