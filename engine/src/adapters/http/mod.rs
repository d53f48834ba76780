//! HTTP driving adapter
//!
//! Exposes the supervisor operation surface as JSON over HTTP (TCP or Unix
//! socket), with optional basic authentication from the server section.

pub mod handlers;

use crate::supervisor::Supervisor;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use base64::Engine;
use sha1::{Digest, Sha1};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Credentials from `[inet_http_server]` / `[unix_http_server]`.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl AuthConfig {
    /// Verify a password against the configured one, which is either
    /// plaintext or `{SHA}<hex>` of its SHA-1.
    fn verify(&self, username: &str, password: &str) -> bool {
        if username != self.username {
            return false;
        }
        match self.password.strip_prefix("{SHA}") {
            Some(expected_hex) => {
                let digest = Sha1::digest(password.as_bytes());
                let given_hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
                expected_hex.eq_ignore_ascii_case(&given_hex)
            }
            None => self.password == password,
        }
    }
}

/// Build the API router. `auth` guards every route when present.
pub fn build_router(supervisor: Arc<Supervisor>, auth: Option<AuthConfig>) -> Router {
    let mut router = Router::new()
        .route("/program/list", get(handlers::list_programs))
        .route("/program/info/{name}", get(handlers::program_info))
        .route("/program/start/{name}", post(handlers::start_program))
        .route("/program/stop/{name}", post(handlers::stop_program))
        .route(
            "/program/startProcessGroup/{group}",
            post(handlers::start_process_group),
        )
        .route(
            "/program/stopProcessGroup/{group}",
            post(handlers::stop_process_group),
        )
        .route("/program/startAll", post(handlers::start_all))
        .route("/program/stopAll", post(handlers::stop_all))
        .route("/program/signal/{sig}/{name}", post(handlers::signal_program))
        .route("/program/signalAll/{sig}", post(handlers::signal_all))
        .route("/program/log/{name}/{device}", get(handlers::tail_program_log))
        .route("/program/clearLogs/{name}", post(handlers::clear_program_logs))
        .route("/program/stdin/{name}", post(handlers::send_stdin))
        .route("/supervisor/info", get(handlers::supervisor_info))
        .route("/supervisor/reload", post(handlers::reload))
        .route("/supervisor/shutdown", post(handlers::shutdown))
        .route("/supervisor/log", get(handlers::read_supervisor_log));

    if let Some(auth) = auth {
        router = router.route_layer(middleware::from_fn_with_state(Arc::new(auth), basic_auth));
    }
    router.with_state(supervisor)
}

/// HTTP basic authentication gate.
async fn basic_auth(
    State(auth): State<Arc<AuthConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|b64| base64::engine::general_purpose::STANDARD.decode(b64).ok())
        .and_then(|raw| String::from_utf8(raw).ok())
        .and_then(|creds| {
            creds
                .split_once(':')
                .map(|(user, pass)| auth.verify(user, pass))
        })
        .unwrap_or(false);

    if !authorized {
        warn!("rejected HTTP request with missing or bad credentials");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}

/// Serve on a TCP address until the shutdown token fires.
pub async fn serve_on_tcp(
    addr: &str,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "HTTP API listening on TCP");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Serve on a Unix socket until the shutdown token fires. A stale socket
/// file from a previous run is removed first.
pub async fn serve_on_unix_socket(
    socket_path: &str,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = Path::new(socket_path);
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let listener = tokio::net::UnixListener::bind(socket_path)?;
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o700))?;
    }
    info!(socket = socket_path, "HTTP API listening on Unix socket");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    let _ = std::fs::remove_file(path);
    Ok(())
}
