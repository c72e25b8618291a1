//! IP geolocation: infer language and timezone for a proxy host.

pub mod lookup;

pub use lookup::{resolve_locale, FixedGeoLocator, GeoLocator, HttpGeoLocator, DEFAULT_GEO_URL};
