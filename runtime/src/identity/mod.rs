//! Page-context identity spoofing.
//!
//! An [`IdentityPatch`] describes the navigator view a page should see.
//! It renders to page JavaScript that replaces `window.navigator` with a
//! delegating copy and pins `Intl`/`Date` to the spoofed timezone, plus a
//! matching restore script. [`RealmDelivery`] decides how that source
//! reaches the page's own realm.

pub mod delivery;
pub mod patch;
pub mod script;
pub mod ua;
pub mod webrtc;

pub use delivery::RealmDelivery;
pub use patch::{IdentityPatch, PatchValue, PropertyOverride};
pub use ua::UserAgentInfo;
