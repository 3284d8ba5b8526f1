//! Master data catalog handlers, one pair of routes per catalog kind

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::handlers::IdInput;
use crate::middleware::CurrentUser;
use crate::response::ApiResponse;
use crate::services::catalog::{CatalogEntry, CatalogEntryInput, CatalogKind};
use crate::services::unit::{Unit, UnitCatalog};
use crate::services::CatalogService;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    pub name: Option<String>,
}

pub async fn list_entries(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(kind): Path<String>,
    Query(query): Query<CatalogQuery>,
) -> AppResult<Json<Vec<CatalogEntry>>> {
    let kind = CatalogKind::from_slug(&kind)?;
    let entries = CatalogService::new(state.db)
        .list(kind, query.name.as_deref())
        .await?;
    Ok(Json(entries))
}

pub async fn create_entry(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(kind): Path<String>,
    Json(input): Json<CatalogEntryInput>,
) -> AppResult<ApiResponse<CatalogEntry>> {
    let kind = CatalogKind::from_slug(&kind)?;
    let entry = CatalogService::new(state.db).create(kind, input).await?;
    tracing::info!("{} {} saved by {}", kind.slug(), entry.name, current_user.0.name);
    Ok(ApiResponse::created(format!("{} {} saved", kind.slug(), entry.name), entry))
}

pub async fn unit_detail(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Json<Unit>> {
    let mut conn = state.db.acquire().await?;
    Ok(Json(UnitCatalog::get_by_id(&mut conn, input.id).await?))
}

/// Exact lookup; names are matched uppercased
pub async fn unit_by_name(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(name): Path<String>,
) -> AppResult<Json<Unit>> {
    let mut conn = state.db.acquire().await?;
    UnitCatalog::get_by_name(&mut conn, &name)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("unit {}", name)))
}
