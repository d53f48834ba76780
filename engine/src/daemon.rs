//! Daemon runtime
//! Signal handling, HTTP server wiring, and pidfile management

use crate::adapters::http::{build_router, serve_on_tcp, serve_on_unix_socket, AuthConfig};
use crate::config::Entry;
use crate::domain::{DomainError, Result};
use crate::supervisor::Supervisor;
use std::sync::Arc;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tracing::{error, info, warn};

/// Long-running daemon wrapper around a supervisor.
pub struct Daemon {
    supervisor: Arc<Supervisor>,
}

impl Daemon {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Load configuration, bring up the HTTP servers, and run until a
    /// shutdown signal or a remote shutdown request arrives.
    pub async fn run(&self) -> Result<()> {
        self.supervisor.load().await?;
        let shutdown = self.supervisor.shutdown_token();

        self.write_pidfile();
        self.start_http_servers();

        let mut sigterm = unix_signal(SignalKind::terminate())
            .map_err(|e| DomainError::Failed(format!("cannot install SIGTERM handler: {e}")))?;
        let mut sigint = unix_signal(SignalKind::interrupt())
            .map_err(|e| DomainError::Failed(format!("cannot install SIGINT handler: {e}")))?;
        let mut sighup = unix_signal(SignalKind::hangup())
            .map_err(|e| DomainError::Failed(format!("cannot install SIGHUP handler: {e}")))?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown token fired, exiting");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    let _ = self.supervisor.shutdown().await;
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    let _ = self.supervisor.shutdown().await;
                    break;
                }
                _ = sighup.recv() => {
                    info!("received SIGHUP, reloading configuration");
                    match self.supervisor.reload_config().await {
                        Ok(diff) => info!(
                            added = ?diff.added,
                            changed = ?diff.changed,
                            removed = ?diff.removed,
                            "reload complete"
                        ),
                        Err(e) => error!(error = %e, "reload failed"),
                    }
                }
            }
        }

        self.remove_pidfile();
        Ok(())
    }

    fn start_http_servers(&self) {
        let shutdown = self.supervisor.shutdown_token();

        if let Some(entry) = self.supervisor.server_entry("inet_http_server") {
            let port = entry.get_string("port", "");
            if !port.is_empty() {
                let addr = if port.contains(':') {
                    port
                } else {
                    format!("0.0.0.0:{port}")
                };
                let router = build_router(self.supervisor.clone(), auth_from_entry(&entry));
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_on_tcp(&addr, router, shutdown).await {
                        error!(error = %e, "inet HTTP server failed");
                    }
                });
            }
        }

        if let Some(entry) = self.supervisor.server_entry("unix_http_server") {
            let file = entry.get_string("file", "");
            if !file.is_empty() {
                let router = build_router(self.supervisor.clone(), auth_from_entry(&entry));
                tokio::spawn(async move {
                    if let Err(e) = serve_on_unix_socket(&file, router, shutdown).await {
                        error!(error = %e, "unix HTTP server failed");
                    }
                });
            }
        }
    }

    fn write_pidfile(&self) {
        let pidfile = self.supervisor.supervisord_setting("pidfile", "");
        if pidfile.is_empty() {
            return;
        }
        if let Err(e) = std::fs::write(&pidfile, std::process::id().to_string()) {
            warn!(pidfile = %pidfile, error = %e, "failed to write pidfile");
        }
    }

    fn remove_pidfile(&self) {
        let pidfile = self.supervisor.supervisord_setting("pidfile", "");
        if !pidfile.is_empty() {
            let _ = std::fs::remove_file(&pidfile);
        }
    }
}

fn auth_from_entry(entry: &Entry) -> Option<AuthConfig> {
    let username = entry.get_string("username", "");
    if username.is_empty() {
        return None;
    }
    Some(AuthConfig {
        username,
        password: entry.get_string("password", ""),
    })
}
