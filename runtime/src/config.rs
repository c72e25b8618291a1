//! Runtime configuration: environment variables, then CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::{ControllerConfig, DEFAULT_USER_AGENT};
use crate::geo::DEFAULT_GEO_URL;
use crate::host::ChromiumOptions;
use crate::identity::RealmDelivery;

pub const DEFAULT_GEO_TIMEOUT_MS: u64 = 5000;

/// State directory: `GEOMASK_HOME`, else `~/.geomask`.
pub fn geomask_home() -> PathBuf {
    if let Ok(p) = std::env::var("GEOMASK_HOME") {
        return PathBuf::from(p);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".geomask")
}

/// Daemon socket: `GEOMASK_SOCKET`, else `<home>/geomask.sock`.
pub fn socket_path() -> PathBuf {
    match std::env::var("GEOMASK_SOCKET") {
        Ok(p) => PathBuf::from(p),
        Err(_) => geomask_home().join("geomask.sock"),
    }
}

/// Find a Chromium binary: `GEOMASK_CHROMIUM_PATH`, then the usual names on `PATH`.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("GEOMASK_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub home: PathBuf,
    pub socket: PathBuf,
    pub geo_url: String,
    pub geo_timeout: Duration,
    pub chromium: Option<PathBuf>,
    pub headless: bool,
    pub no_sandbox: bool,
    pub default_user_agent: String,
    /// How page scripts reach the page realm.
    pub delivery: RealmDelivery,
    /// Manage state without launching a browser.
    pub no_browser: bool,
    /// Keep state in memory instead of `state.db`.
    pub ephemeral: bool,
    pub log_json: bool,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let home = geomask_home();
        let geo_timeout = std::env::var("GEOMASK_GEO_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_GEO_TIMEOUT_MS);
        Self {
            socket: socket_path(),
            geo_url: std::env::var("GEOMASK_GEO_URL").unwrap_or_else(|_| DEFAULT_GEO_URL.to_string()),
            geo_timeout: Duration::from_millis(geo_timeout),
            chromium: find_chromium(),
            headless: std::env::var("GEOMASK_HEADLESS").is_ok_and(|v| is_truthy(&v)),
            no_sandbox: std::env::var("GEOMASK_NO_SANDBOX").is_ok_and(|v| is_truthy(&v)),
            default_user_agent: DEFAULT_USER_AGENT.to_string(),
            delivery: std::env::var("GEOMASK_DELIVERY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            no_browser: false,
            ephemeral: false,
            log_json: false,
            home,
        }
    }

    pub fn state_db(&self) -> PathBuf {
        self.home.join("state.db")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.home.join("audit.jsonl")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.home.join("geomask.pid")
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            default_user_agent: self.default_user_agent.clone(),
            geo_timeout: self.geo_timeout,
            delivery: self.delivery,
        }
    }

    pub fn chromium_options(&self) -> ChromiumOptions {
        ChromiumOptions {
            executable: self.chromium.clone(),
            headless: self.headless,
            no_sandbox: self.no_sandbox,
        }
    }

    pub fn with_socket(mut self, socket: Option<&Path>) -> Self {
        if let Some(socket) = socket {
            self.socket = socket.to_path_buf();
        }
        self
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" Yes "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn test_paths_live_under_home() {
        let mut config = RuntimeConfig::from_env();
        config.home = PathBuf::from("/srv/geomask");
        assert_eq!(config.state_db(), PathBuf::from("/srv/geomask/state.db"));
        assert_eq!(config.audit_log(), PathBuf::from("/srv/geomask/audit.jsonl"));
        assert_eq!(config.pid_file(), PathBuf::from("/srv/geomask/geomask.pid"));
    }

    #[test]
    fn test_controller_config_carries_timeout() {
        let mut config = RuntimeConfig::from_env();
        config.geo_timeout = Duration::from_millis(250);
        assert_eq!(config.controller().geo_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_delivery_reaches_controller() {
        let mut config = RuntimeConfig::from_env();
        config.delivery = RealmDelivery::DomEvent;
        assert_eq!(config.controller().delivery, RealmDelivery::DomEvent);
        config.no_sandbox = true;
        assert!(config.chromium_options().no_sandbox);
    }
}
