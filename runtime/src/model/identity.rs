//! Identity profile presented to web pages while headers are active.

use serde::{Deserialize, Serialize};

/// Language used when no locale can be derived for a proxy.
pub const FALLBACK_LANGUAGE: &str = "en";
/// Timezone used when no locale can be derived for a proxy.
pub const FALLBACK_TIMEZONE: &str = "UTC";

/// Language and timezone inferred for a proxy's location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    pub language: String,
    pub timezone: String,
}

impl Locale {
    pub fn new(language: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            timezone: timezone.into(),
        }
    }

    pub fn fallback() -> Self {
        Self::new(FALLBACK_LANGUAGE, FALLBACK_TIMEZONE)
    }
}

/// Operating-system family reported by `navigator.platform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Windows,
    MacIntel,
}

impl Platform {
    /// Page-side detection: `Windows` wins over `Mac`, anything else passes through.
    pub fn from_user_agent(user_agent: &str) -> Option<Self> {
        if user_agent.contains("Windows") {
            Some(Platform::Windows)
        } else if user_agent.contains("Mac") {
            Some(Platform::MacIntel)
        } else {
            None
        }
    }

    /// Header-side detection: `Mac` selects macOS, everything else is Windows.
    pub fn header_family(user_agent: &str) -> Self {
        if user_agent.contains("Mac") {
            Platform::MacIntel
        } else {
            Platform::Windows
        }
    }

    /// Value of `navigator.platform`.
    pub fn navigator_value(self) -> &'static str {
        match self {
            Platform::Windows => "Win32",
            Platform::MacIntel => "MacIntel",
        }
    }

    /// Value of the `sec-ch-ua-platform` client hint and `userAgentData.platform`.
    pub fn client_hint(self) -> &'static str {
        match self {
            Platform::Windows => "Windows",
            Platform::MacIntel => "macOS",
        }
    }
}

/// The {user-agent, language, timezone, platform} tuple shown to pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub user_agent: String,
    pub language: String,
    pub timezone: String,
    pub platform: Platform,
}

impl IdentityProfile {
    pub fn new(user_agent: impl Into<String>, locale: Locale) -> Self {
        let user_agent = user_agent.into();
        let platform = Platform::header_family(&user_agent);
        Self {
            user_agent,
            language: locale.language,
            timezone: locale.timezone,
            platform,
        }
    }

    pub fn locale(&self) -> Locale {
        Locale::new(self.language.clone(), self.timezone.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";
    const LINUX_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    #[test]
    fn test_page_platform_passes_through_unknown() {
        assert_eq!(Platform::from_user_agent(MAC_UA), Some(Platform::MacIntel));
        assert_eq!(Platform::from_user_agent(LINUX_UA), None);
    }

    #[test]
    fn test_header_family_defaults_to_windows() {
        assert_eq!(Platform::header_family(MAC_UA).client_hint(), "macOS");
        assert_eq!(Platform::header_family(LINUX_UA).client_hint(), "Windows");
    }

    #[test]
    fn test_profile_from_fallback_locale() {
        let profile = IdentityProfile::new(MAC_UA, Locale::fallback());
        assert_eq!(profile.language, "en");
        assert_eq!(profile.timezone, "UTC");
        assert_eq!(profile.platform, Platform::MacIntel);
    }
}
