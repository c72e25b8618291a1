//! Process-wide feature toggles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A protective feature the user can switch off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    #[serde(rename = "webRTC")]
    WebRtc,
    #[serde(rename = "iframes")]
    Iframes,
}

impl Feature {
    /// Persisted key for this toggle.
    pub fn key(self) -> &'static str {
        match self {
            Feature::WebRtc => "webRTC",
            Feature::Iframes => "iframes",
        }
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webrtc" => Ok(Feature::WebRtc),
            "iframes" | "frames" => Ok(Feature::Iframes),
            other => Err(format!("unknown feature: {other}")),
        }
    }
}

/// Stored state of a feature toggle. Missing means `Enabled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureToggle {
    #[default]
    Enabled,
    Disabled,
}

impl FeatureToggle {
    pub fn is_enabled(self) -> bool {
        self == FeatureToggle::Enabled
    }
}

impl fmt::Display for FeatureToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureToggle::Enabled => write!(f, "enabled"),
            FeatureToggle::Disabled => write!(f, "disabled"),
        }
    }
}

impl FromStr for FeatureToggle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enabled" | "on" | "true" => Ok(FeatureToggle::Enabled),
            "disabled" | "off" | "false" => Ok(FeatureToggle::Disabled),
            other => Err(format!("expected enabled|disabled, got {other}")),
        }
    }
}

/// Both toggles, as read together for icon and policy decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toggles {
    pub webrtc: FeatureToggle,
    pub iframes: FeatureToggle,
}
