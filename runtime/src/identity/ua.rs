//! User-agent string analysis for navigator and client-hint values.

use regex::Regex;
use std::sync::LazyLock;

use crate::model::Platform;

static CHROME_MAJOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Chrome/(\d+)").unwrap());
static CHROME_FULL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Chrome/([\d.]+)").unwrap());
static EDGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Edg/(\d+)((?:\.\d+)*)").unwrap());
static OPERA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"OPR/(\d+)((?:\.\d+)*)").unwrap());
static FIREFOX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Firefox/(\d+)((?:\.\d+)*)").unwrap());
static OS_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Windows NT (\d+\.\d+)|Mac OS X (\d+(?:[_.]\d+)+)").unwrap());

/// Fields derived from a user-agent string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgentInfo {
    /// Brand reported first in `userAgentData.brands`.
    pub brand: String,
    pub brand_major: String,
    pub brand_full: String,
    /// Chromium engine version, empty for non-Chromium agents.
    pub engine_major: String,
    pub engine_full: String,
    pub os_version: Option<String>,
    pub platform: Option<Platform>,
    pub mobile: bool,
    pub architecture: &'static str,
}

impl UserAgentInfo {
    pub fn parse(user_agent: &str) -> Self {
        let engine_major = capture(&CHROME_MAJOR_RE, user_agent).unwrap_or_default();
        let engine_full = capture(&CHROME_FULL_RE, user_agent).unwrap_or_default();

        let (brand, brand_major, brand_full) = if let Some(c) = EDGE_RE.captures(user_agent) {
            ("Microsoft Edge", c[1].to_string(), format!("{}{}", &c[1], &c[2]))
        } else if let Some(c) = OPERA_RE.captures(user_agent) {
            ("Opera", c[1].to_string(), format!("{}{}", &c[1], &c[2]))
        } else if let Some(c) = FIREFOX_RE.captures(user_agent) {
            ("Firefox", c[1].to_string(), format!("{}{}", &c[1], &c[2]))
        } else if user_agent.contains("Safari/") && !user_agent.contains("Chrome/") {
            ("Safari", String::new(), String::new())
        } else {
            ("Google Chrome", engine_major.clone(), engine_full.clone())
        };

        let os_version = OS_VERSION_RE.captures(user_agent).and_then(|c| {
            c.get(1)
                .or_else(|| c.get(2))
                .map(|m| m.as_str().replace('_', "."))
        });

        let architecture = if user_agent.contains("arm64") || user_agent.contains("aarch64") {
            "arm"
        } else {
            "x86"
        };

        Self {
            brand: brand.to_string(),
            brand_major,
            brand_full,
            engine_major,
            engine_full,
            os_version,
            platform: Platform::from_user_agent(user_agent),
            mobile: user_agent.contains("Mobile"),
            architecture,
        }
    }

    /// `userAgentData.platform`, following the client-hint vocabulary.
    pub fn hint_platform(&self, user_agent: &str) -> &'static str {
        match self.platform {
            Some(p) => p.client_hint(),
            None if user_agent.contains("Android") => "Android",
            None if user_agent.contains("CrOS") => "Chrome OS",
            None if user_agent.contains("Linux") => "Linux",
            None => "Unknown",
        }
    }

    /// Whether the agent is Chromium-based and therefore exposes `userAgentData`.
    pub fn is_chromium(&self) -> bool {
        !self.engine_major.is_empty()
    }
}

/// `navigator.appVersion`: the user-agent without its leading product token.
pub fn app_version(user_agent: &str) -> &str {
    user_agent.strip_prefix("Mozilla/").unwrap_or(user_agent)
}

fn capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIN_CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.6367.91 Safari/537.36";
    const MAC_EDGE: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.2420.81";
    const MAC_SAFARI: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15";

    #[test]
    fn test_parse_windows_chrome() {
        let info = UserAgentInfo::parse(WIN_CHROME);
        assert_eq!(info.brand, "Google Chrome");
        assert_eq!(info.brand_major, "124");
        assert_eq!(info.engine_full, "124.0.6367.91");
        assert_eq!(info.os_version.as_deref(), Some("10.0"));
        assert_eq!(info.platform, Some(Platform::Windows));
        assert_eq!(info.hint_platform(WIN_CHROME), "Windows");
        assert!(!info.mobile);
    }

    #[test]
    fn test_parse_mac_edge() {
        let info = UserAgentInfo::parse(MAC_EDGE);
        assert_eq!(info.brand, "Microsoft Edge");
        assert_eq!(info.brand_major, "123");
        assert_eq!(info.brand_full, "123.0.2420.81");
        assert_eq!(info.engine_major, "123");
        assert_eq!(info.os_version.as_deref(), Some("10.15.7"));
        assert_eq!(info.hint_platform(MAC_EDGE), "macOS");
    }

    #[test]
    fn test_parse_safari_is_not_chromium() {
        let info = UserAgentInfo::parse(MAC_SAFARI);
        assert_eq!(info.brand, "Safari");
        assert!(!info.is_chromium());
        assert_eq!(info.os_version.as_deref(), Some("14.4.1"));
    }

    #[test]
    fn test_app_version_strips_product() {
        assert!(app_version(WIN_CHROME).starts_with("5.0 (Windows NT"));
        assert_eq!(app_version("curl/8.0"), "curl/8.0");
    }
}
