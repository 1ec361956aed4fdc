use std::str::FromStr;

use axum::extract::{Path, State};
use axum::Json;
use proximity_common::{AppId, Backup, BackupId, Error};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

fn parse_app_id(id: &str) -> Result<AppId, ApiError> {
    AppId::from_str(id).map_err(|_| ApiError(Error::Validation(format!("invalid app id {id:?}"))))
}

fn parse_backup_id(id: &str) -> Result<BackupId, ApiError> {
    BackupId::from_str(id).map_err(|_| ApiError(Error::Validation(format!("invalid backup id {id:?}"))))
}

pub async fn list_backups(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Backup>>, ApiError> {
    let app_id = parse_app_id(&id)?;
    Ok(Json(
        state.services.store.list_backups_for_app(app_id).await.map_err(ApiError)?,
    ))
}

#[derive(Deserialize)]
pub struct CreateBackupRequest {
    pub storage: String,
}

pub async fn create_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CreateBackupRequest>,
) -> Result<Json<Backup>, ApiError> {
    let app_id = parse_app_id(&id)?;
    let backup = state.services.lifecycle.backup(app_id, &req.storage).await.map_err(ApiError)?;
    Ok(Json(backup))
}

pub async fn restore_backup(
    State(state): State<AppState>,
    Path((id, bid)): Path<(String, String)>,
) -> Result<(), ApiError> {
    let app_id = parse_app_id(&id)?;
    let backup_id = parse_backup_id(&bid)?;
    state.services.lifecycle.restore(app_id, backup_id).await.map_err(ApiError)?;
    Ok(())
}

pub async fn delete_backup(
    State(state): State<AppState>,
    Path((_id, bid)): Path<(String, String)>,
) -> Result<(), ApiError> {
    let backup_id = parse_backup_id(&bid)?;
    state.services.store.delete_backup(backup_id).await.map_err(ApiError)?;
    Ok(())
}
