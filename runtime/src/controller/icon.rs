//! Status indicator state.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IconState {
    #[default]
    Default,
    ActiveLow,
    ActiveMedium,
    ActiveFull,
}

impl IconState {
    pub fn as_str(self) -> &'static str {
        match self {
            IconState::Default => "default",
            IconState::ActiveLow => "active-low",
            IconState::ActiveMedium => "active-medium",
            IconState::ActiveFull => "active-full",
        }
    }
}

impl fmt::Display for IconState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the indicator depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IconInputs {
    pub proxy_active: bool,
    pub headers_active: bool,
    pub webrtc_protected: bool,
    pub iframes_blocked: bool,
    pub ua_override: bool,
}

/// Total over all 32 input combinations.
///
/// No active proxy is always `default`. With a proxy, full protection is
/// headers plus both toggles; headers alone, or any two of the remaining
/// protections, is medium; anything less is low.
pub fn compute(inputs: IconInputs) -> IconState {
    if !inputs.proxy_active {
        return IconState::Default;
    }
    if inputs.headers_active && inputs.webrtc_protected && inputs.iframes_blocked {
        return IconState::ActiveFull;
    }
    let extras = [inputs.webrtc_protected, inputs.iframes_blocked, inputs.ua_override]
        .iter()
        .filter(|on| **on)
        .count();
    if inputs.headers_active || extras >= 2 {
        IconState::ActiveMedium
    } else {
        IconState::ActiveLow
    }
}
