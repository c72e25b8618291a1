//! Start the geomask daemon.

use crate::audit::AuditLogger;
use crate::cli::output::{self, Styled};
use crate::config::RuntimeConfig;
use crate::controller::{ActiveProxyAuth, Controller, PendingProxy};
use crate::geo::HttpGeoLocator;
use crate::host::{BrowserHost, ChromiumHost, RecordingHost};
use crate::server::Server;
use crate::store::{MemoryStore, SqliteStore, StateStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Returns the PID of a live daemon, removing a stale PID file.
pub fn check_already_running(config: &RuntimeConfig) -> Option<i32> {
    let pid_path = config.pid_file();
    let pid: i32 = std::fs::read_to_string(&pid_path).ok()?.trim().parse().ok()?;

    #[cfg(unix)]
    {
        let output = std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output();
        if matches!(output, Ok(o) if o.status.success()) {
            return Some(pid);
        }
    }

    let _ = std::fs::remove_file(&pid_path);
    None
}

pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("geomask_runtime=info".parse().expect("static directive"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Open state, launch the browser, reset activation, then serve until signalled.
pub async fn run(config: RuntimeConfig) -> Result<()> {
    let s = Styled::new();

    if let Some(pid) = check_already_running(&config) {
        eprintln!("  {} geomask is already running (PID {pid}).", s.warn_sym());
        eprintln!("  Use 'geomask stop' first.");
        std::process::exit(1);
    }
    std::fs::create_dir_all(&config.home)
        .with_context(|| format!("failed to create {}", config.home.display()))?;

    init_tracing(config.log_json);
    info!("starting geomask v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn StateStore> = if config.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::open(&config.state_db()).context("failed to open state store")?)
    };
    let geo = Arc::new(HttpGeoLocator::new(config.geo_url.clone()));

    let pending = Arc::new(PendingProxy::default());
    let chromium = if config.no_browser {
        None
    } else {
        let auth = Arc::new(ActiveProxyAuth::new(Arc::clone(&store)).with_pending(Arc::clone(&pending)));
        let host = ChromiumHost::launch(config.chromium_options(), auth)
            .await
            .context("failed to launch Chromium (set GEOMASK_CHROMIUM_PATH or use --no-browser)")?;
        Some(Arc::new(host))
    };
    let host: Arc<dyn BrowserHost> = match &chromium {
        Some(host) => Arc::clone(host) as Arc<dyn BrowserHost>,
        None => Arc::new(RecordingHost::new()),
    };

    let mut controller =
        Controller::new(Arc::clone(&store), host, geo, config.controller()).with_pending(pending);
    match AuditLogger::open(&config.audit_log()) {
        Ok(audit) => controller = controller.with_audit(audit),
        Err(e) => warn!("audit log disabled: {e:#}"),
    }
    let controller = Arc::new(controller);

    // no route survives a restart
    controller
        .deactivate_all_proxies()
        .await
        .context("failed to reset proxy state")?;

    let pid_path = config.pid_file();
    std::fs::write(&pid_path, std::process::id().to_string())
        .context("failed to write PID file")?;

    if !output::is_quiet() {
        eprintln!(
            "  {} geomask v{} started (PID {})",
            s.ok_sym(),
            env!("CARGO_PKG_VERSION"),
            std::process::id()
        );
        eprintln!("  Listening on {}", config.socket.display());
    }

    let server = Server::new(&config.socket, Arc::clone(&controller));
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("received shutdown signal");
        shutdown.notify_one();
    });

    let result = server.start().await;

    if let Some(host) = chromium {
        host.shutdown().await;
    }
    let _ = std::fs::remove_file(&pid_path);

    if !output::is_quiet() {
        eprintln!("  {} geomask stopped.", s.ok_sym());
    }
    result
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("SIGTERM handler unavailable: {e}"),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}
