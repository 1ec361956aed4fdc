use axum::extract::{Path, Query, State};
use axum::Json;
use proximity_common::CatalogApp;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct CatalogListResponse {
    total: usize,
    applications: Vec<CatalogApp>,
}

pub async fn list_catalog(State(state): State<AppState>) -> Json<CatalogListResponse> {
    let applications = state.catalog.list().await;
    Json(CatalogListResponse {
        total: applications.len(),
        applications,
    })
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
}

pub async fn search_catalog(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Json<CatalogListResponse> {
    let applications = state.catalog.search(&query.q).await;
    Json(CatalogListResponse {
        total: applications.len(),
        applications,
    })
}

pub async fn get_catalog_app(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CatalogApp>, ApiError> {
    Ok(Json(state.catalog.get(&id).await?))
}

pub async fn reload_catalog(State(state): State<AppState>) -> Result<Json<CatalogListResponse>, ApiError> {
    state.catalog.reload().await?;
    let applications = state.catalog.list().await;
    Ok(Json(CatalogListResponse {
        total: applications.len(),
        applications,
    }))
}
