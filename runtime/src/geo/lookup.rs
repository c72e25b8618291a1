//! Geolocation lookups and the bounded resolve-with-fallback policy.

use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{GeomaskError, Result};
use crate::model::Locale;

/// Default endpoint; `{host}` is replaced by the proxy's IP address.
pub const DEFAULT_GEO_URL: &str = "https://ipapi.co/{host}/json/";

/// Resolves a proxy host to the locale of its apparent location.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<Locale>;
}

/// Resolve a locale, never failing and never waiting longer than `timeout`.
///
/// Lookup errors and expiry both fall back to [`Locale::fallback`].
pub async fn resolve_locale(locator: &dyn GeoLocator, host: &str, timeout: Duration) -> Locale {
    match tokio::time::timeout(timeout, locator.lookup(host)).await {
        Ok(Ok(locale)) => {
            debug!("geolocated {host}: {} / {}", locale.language, locale.timezone);
            locale
        }
        Ok(Err(e)) => {
            warn!("{e}; using fallback locale for {host}");
            Locale::fallback()
        }
        Err(_) => {
            warn!(
                "geolocation for {host} timed out after {}ms; using fallback locale",
                timeout.as_millis()
            );
            Locale::fallback()
        }
    }
}

/// Response body of an ipapi-style service.
#[derive(Debug, Deserialize)]
struct GeoResponse {
    #[serde(default)]
    languages: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// HTTP geolocation client.
pub struct HttpGeoLocator {
    client: reqwest::Client,
    url_template: String,
}

impl HttpGeoLocator {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url_template: url_template.into(),
        }
    }

    /// Lookups are keyed by IP; hostnames are resolved first.
    async fn to_ip(host: &str) -> Result<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let mut addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| GeomaskError::GeolocationLookup(format!("resolving {host}: {e}")))?;
        addrs
            .next()
            .map(|a| a.ip())
            .ok_or_else(|| GeomaskError::GeolocationLookup(format!("{host} has no addresses")))
    }
}

#[async_trait]
impl GeoLocator for HttpGeoLocator {
    async fn lookup(&self, host: &str) -> Result<Locale> {
        let ip = Self::to_ip(host).await?;
        let url = self.url_template.replace("{host}", &ip.to_string());

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GeomaskError::GeolocationLookup(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GeomaskError::GeolocationLookup(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        let body: GeoResponse = response
            .json()
            .await
            .map_err(|e| GeomaskError::GeolocationLookup(format!("invalid response: {e}")))?;

        if body.error {
            return Err(GeomaskError::GeolocationLookup(
                body.reason.unwrap_or_else(|| "service reported an error".into()),
            ));
        }

        let language = body
            .languages
            .as_deref()
            .and_then(|l| l.split(',').map(str::trim).find(|s| !s.is_empty()))
            .map(str::to_string);
        match (language, body.timezone.filter(|t| !t.is_empty())) {
            (Some(language), Some(timezone)) => Ok(Locale::new(language, timezone)),
            _ => Err(GeomaskError::GeolocationLookup(format!(
                "no language/timezone for {ip}"
            ))),
        }
    }
}

/// Locator with a fixed answer, for offline operation and tests.
pub struct FixedGeoLocator {
    answer: Option<Locale>,
}

impl FixedGeoLocator {
    pub fn new(locale: Locale) -> Self {
        Self {
            answer: Some(locale),
        }
    }

    /// A locator whose every lookup fails.
    pub fn failing() -> Self {
        Self { answer: None }
    }
}

#[async_trait]
impl GeoLocator for FixedGeoLocator {
    async fn lookup(&self, host: &str) -> Result<Locale> {
        self.answer
            .clone()
            .ok_or_else(|| GeomaskError::GeolocationLookup(format!("no answer for {host}")))
    }
}
