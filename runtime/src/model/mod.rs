//! Data model: proxies, identity profiles and feature toggles.

pub mod identity;
pub mod proxy;
pub mod toggle;

pub use identity::{IdentityProfile, Locale, Platform};
pub use proxy::{Proxy, ProxyKey, ProxyList};
pub use toggle::{Feature, FeatureToggle, Toggles};
