use std::collections::HashMap;
use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::Json;
use proximity_common::{App, AppId, Error, Resources};
use proximity_core::{Action, DeployRequest};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

fn parse_app_id(id: &str) -> Result<AppId, ApiError> {
    AppId::from_str(id)
        .map_err(|_| ApiError(Error::Validation(format!("invalid app id {id:?}"))))
}

pub async fn list_apps(State(state): State<AppState>) -> Result<Json<Vec<App>>, ApiError> {
    Ok(Json(state.services.store.list_apps().await.map_err(ApiError)?))
}

pub async fn get_app(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<App>, ApiError> {
    let app_id = parse_app_id(&id)?;
    Ok(Json(state.services.store.get_app(app_id).await.map_err(ApiError)?))
}

#[derive(Deserialize)]
pub struct CreateAppRequest {
    pub catalog_id: String,
    pub hostname: String,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default, rename = "config")]
    pub resources: Option<Resources>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
}

#[derive(Serialize)]
pub struct CreateAppResponse {
    pub id: AppId,
}

pub async fn create_app(
    State(state): State<AppState>,
    Json(req): Json<CreateAppRequest>,
) -> Result<Json<CreateAppResponse>, ApiError> {
    let mut catalog_app = state.catalog.get(&req.catalog_id).await.map_err(ApiError)?;
    if let Some(ports) = req.ports {
        catalog_app.declared_ports = ports;
    }
    let placement = state.resolve_placement(req.node).await.map_err(ApiError)?;

    let resources = req.resources.unwrap_or_default();
    let id = state
        .services
        .pipeline
        .deploy(DeployRequest {
            catalog_app,
            host_id: placement.host_id,
            node: placement.node,
            hostname: req.hostname,
            resources,
            env: req.environment,
            storage: placement.storage,
            template: placement.template,
        })
        .await
        .map_err(ApiError)?;

    Ok(Json(CreateAppResponse { id }))
}

#[derive(Deserialize)]
pub struct AppActionRequest {
    pub action: String,
}

pub async fn app_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AppActionRequest>,
) -> Result<(), ApiError> {
    let app_id = parse_app_id(&id)?;
    let action = match req.action.as_str() {
        "start" => Action::Start,
        "stop" => Action::Stop,
        "restart" => Action::Restart,
        other => return Err(ApiError(Error::Validation(format!("unknown action {other:?}")))),
    };
    state.services.lifecycle.action(app_id, action).await.map_err(ApiError)?;
    Ok(())
}

#[derive(Deserialize)]
pub struct CloneAppRequest {
    pub new_hostname: String,
}

pub async fn clone_app(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CloneAppRequest>,
) -> Result<Json<CreateAppResponse>, ApiError> {
    let app_id = parse_app_id(&id)?;
    let placement = state.resolve_placement(None).await.map_err(ApiError)?;

    let id = state
        .services
        .lifecycle
        .clone_app(app_id, req.new_hostname, placement.storage)
        .await
        .map_err(ApiError)?;

    Ok(Json(CreateAppResponse { id }))
}

#[derive(Serialize, Clone)]
pub struct LogEntryResponse {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "level")]
    pub step: String,
    pub message: String,
}

#[derive(Deserialize)]
pub struct LogsQuery {
    tail: Option<usize>,
}

pub async fn app_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<LogEntryResponse>>, ApiError> {
    let app_id = parse_app_id(&id)?;
    let app = state.services.store.get_app(app_id).await.map_err(ApiError)?;

    let entries: Vec<LogEntryResponse> = app
        .deployment_log
        .into_iter()
        .map(|e| LogEntryResponse {
            timestamp: e.timestamp,
            step: e.step,
            message: e.message,
        })
        .collect();

    let entries = match query.tail {
        Some(n) if n < entries.len() => entries[entries.len() - n..].to_vec(),
        _ => entries,
    };

    Ok(Json(entries))
}

#[derive(Serialize)]
pub struct AppStatsResponse {
    pub status: proximity_common::AppStatus,
    pub cpu: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    pub uptime_s: u64,
}

pub async fn app_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AppStatsResponse>, ApiError> {
    let app_id = parse_app_id(&id)?;
    let app = state.services.store.get_app(app_id).await.map_err(ApiError)?;
    let vmid = app.vmid.ok_or_else(|| ApiError(Error::Validation(format!("app {app_id} has no vmid"))))?;

    let proxmox = state.services.pool.client_for(app.host_id).await.map_err(ApiError)?;
    let status = proxmox
        .lxc_status(&app.node_name, vmid)
        .await
        .map_err(Error::from)
        .map_err(ApiError)?;

    let status_label = if status.running {
        proximity_common::AppStatus::Running
    } else {
        proximity_common::AppStatus::Stopped
    };

    Ok(Json(AppStatsResponse {
        status: status_label,
        cpu: status.cpu,
        memory_used: status.mem_used,
        memory_total: status.mem_total,
        uptime_s: status.uptime_s,
    }))
}
