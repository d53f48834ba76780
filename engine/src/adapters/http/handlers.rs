//! HTTP API handlers
//! JSON handlers over the supervisor operation surface; errors carry the
//! numeric fault code of the established Supervisor API

use crate::domain::DomainError;
use crate::process::ProcessInfo;
use crate::supervisor::Supervisor;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared application state
pub type AppState = Arc<Supervisor>;

/// Error payload: fault code plus a human-readable message.
#[derive(Debug, Serialize)]
pub struct FaultResponse {
    pub code: i32,
    pub message: String,
}

pub struct ApiError(DomainError);

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DomainError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        let body = FaultResponse {
            code: self.0.fault_code().0,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

fn ok() -> Json<SuccessResponse> {
    Json(SuccessResponse { success: true })
}

#[derive(Serialize)]
pub struct SupervisorInfo {
    pub version: String,
    pub identification: String,
    pub pid: u32,
    pub statecode: i32,
    pub statename: String,
}

#[derive(Serialize)]
pub struct ReloadResponse {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_log_length")]
    pub length: i64,
}

fn default_log_length() -> i64 {
    4096
}

#[derive(Serialize)]
pub struct TailResponse {
    pub log: String,
    pub offset: i64,
    pub overflow: bool,
}

// ===== Program handlers =====

/// GET /program/list
pub async fn list_programs(State(sup): State<AppState>) -> Json<Vec<ProcessInfo>> {
    Json(sup.get_all_process_info())
}

/// GET /program/info/{name}
pub async fn program_info(
    State(sup): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProcessInfo>, ApiError> {
    Ok(Json(sup.get_process_info(&name)?))
}

/// POST /program/start/{name}
pub async fn start_program(
    State(sup): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    info!(program = %name, "HTTP start request");
    sup.start_process(&name, true).await?;
    Ok(ok())
}

/// POST /program/stop/{name}
pub async fn stop_program(
    State(sup): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    info!(program = %name, "HTTP stop request");
    sup.stop_process(&name, true).await?;
    Ok(ok())
}

/// POST /program/startProcessGroup/{group}
pub async fn start_process_group(
    State(sup): State<AppState>,
    Path(group): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(sup.start_process_group(&group, true).await?))
}

/// POST /program/stopProcessGroup/{group}
pub async fn stop_process_group(
    State(sup): State<AppState>,
    Path(group): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(sup.stop_process_group(&group, true).await?))
}

/// POST /program/startAll
pub async fn start_all(State(sup): State<AppState>) -> Result<Json<SuccessResponse>, ApiError> {
    sup.start_all_processes(true).await?;
    Ok(ok())
}

/// POST /program/stopAll
pub async fn stop_all(State(sup): State<AppState>) -> Result<Json<SuccessResponse>, ApiError> {
    sup.stop_all_processes(true).await?;
    Ok(ok())
}

/// POST /program/signal/{sig}/{name}
pub async fn signal_program(
    State(sup): State<AppState>,
    Path((sig, name)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>, ApiError> {
    sup.signal_process(&name, &sig)?;
    Ok(ok())
}

/// POST /program/signalAll/{sig}
pub async fn signal_all(
    State(sup): State<AppState>,
    Path(sig): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    sup.signal_all_processes(&sig)?;
    Ok(ok())
}

/// GET /program/log/{name}/{device}  (device: stdout | stderr)
pub async fn tail_program_log(
    State(sup): State<AppState>,
    Path((name, device)): Path<(String, String)>,
    Query(query): Query<LogQuery>,
) -> Result<Json<TailResponse>, ApiError> {
    debug!(program = %name, device = %device, "HTTP log tail");
    let (log, offset, overflow) = match device.as_str() {
        "stdout" => sup.tail_process_stdout_log(&name, query.offset, query.length)?,
        "stderr" => sup.tail_process_stderr_log(&name, query.offset, query.length)?,
        other => {
            return Err(DomainError::BadArguments(format!("unknown log device '{other}'")).into())
        }
    };
    Ok(Json(TailResponse {
        log,
        offset,
        overflow,
    }))
}

/// POST /program/clearLogs/{name}
pub async fn clear_program_logs(
    State(sup): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    sup.clear_process_logs(&name)?;
    Ok(ok())
}

/// POST /program/stdin/{name}
pub async fn send_stdin(
    State(sup): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> Result<Json<SuccessResponse>, ApiError> {
    sup.send_process_stdin(&name, &body).await?;
    Ok(ok())
}

// ===== Supervisor handlers =====

/// GET /supervisor/info
pub async fn supervisor_info(State(sup): State<AppState>) -> Json<SupervisorInfo> {
    let state = sup.get_state();
    Json(SupervisorInfo {
        version: sup.get_version().to_string(),
        identification: sup.get_identification(),
        pid: sup.get_pid(),
        statecode: state.statecode,
        statename: state.statename,
    })
}

/// POST /supervisor/reload
pub async fn reload(State(sup): State<AppState>) -> Result<Json<ReloadResponse>, ApiError> {
    info!("HTTP reload request");
    let diff = sup.reload_config().await?;
    Ok(Json(ReloadResponse {
        added: diff.added,
        changed: diff.changed,
        removed: diff.removed,
    }))
}

/// POST /supervisor/shutdown
pub async fn shutdown(State(sup): State<AppState>) -> Result<Json<SuccessResponse>, ApiError> {
    info!("HTTP shutdown request");
    sup.shutdown().await?;
    Ok(ok())
}

/// GET /supervisor/log
pub async fn read_supervisor_log(
    State(sup): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<String, ApiError> {
    Ok(sup.read_log(query.offset, query.length)?)
}
