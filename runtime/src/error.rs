//! Error taxonomy shared by the controller, store and hosts.

use thiserror::Error;

/// Errors surfaced by controller operations.
#[derive(Debug, Error)]
pub enum GeomaskError {
    /// The system-level proxy route could not be set or cleared.
    #[error("proxy configuration failed: {0}")]
    ProxyConfig(String),

    /// An operation was attempted in a state that does not allow it.
    #[error("{0}")]
    Precondition(String),

    /// Resolving language/timezone for a proxy host failed.
    #[error("geolocation lookup failed: {0}")]
    GeolocationLookup(String),

    /// A persisted-store read or write failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A browser host call other than route-setting failed.
    #[error("browser host error: {0}")]
    Host(String),

    /// An inbound message could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl GeomaskError {
    /// Stable machine-readable code, used in daemon responses.
    pub fn code(&self) -> &'static str {
        match self {
            GeomaskError::ProxyConfig(_) => "proxy_config",
            GeomaskError::Precondition(_) => "precondition",
            GeomaskError::GeolocationLookup(_) => "geolocation",
            GeomaskError::Storage(_) => "storage",
            GeomaskError::Host(_) => "host",
            GeomaskError::Protocol(_) => "protocol",
        }
    }
}

impl From<rusqlite::Error> for GeomaskError {
    fn from(e: rusqlite::Error) -> Self {
        GeomaskError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for GeomaskError {
    fn from(e: serde_json::Error) -> Self {
        GeomaskError::Storage(format!("invalid stored value: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, GeomaskError>;
