//! Production handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use shared::{ListWindowRequest, NextNumber};

use crate::error::AppResult;
use crate::handlers::{document_response, list_request, pdf, IdInput};
use crate::middleware::CurrentUser;
use crate::response::ApiResponse;
use crate::services::document::DocumentOutcome;
use crate::services::production::{
    ModifyProductionInput, ProductionDetail, ProductionInput, ProductionSummary,
};
use crate::services::ProductionService;
use crate::AppState;

fn productions(state: &AppState) -> ProductionService {
    ProductionService::new(state.db.clone(), state.audit.clone(), state.renderer.clone())
}

pub async fn create_production(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ProductionInput>,
) -> AppResult<ApiResponse<DocumentOutcome>> {
    let outcome = productions(&state).create(input, &current_user.0).await?;
    Ok(document_response(
        StatusCode::CREATED,
        format!("production number {} created by {}", outcome.number, current_user.0.name),
        outcome,
    ))
}

pub async fn next_production_number(
    State(state): State<AppState>,
    _current_user: CurrentUser,
) -> AppResult<Json<NextNumber>> {
    Ok(Json(productions(&state).next_number().await?))
}

pub async fn list_productions(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path((params, val)): Path<(String, String)>,
    Json(body): Json<ListWindowRequest>,
) -> AppResult<Json<Vec<ProductionSummary>>> {
    let (filter, window) = list_request(&params, &val, &body)?;
    Ok(Json(productions(&state).list(&filter, &window).await?))
}

pub async fn production_detail(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Json<ProductionDetail>> {
    Ok(Json(productions(&state).detail(input.id).await?))
}

pub async fn modify_production(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ModifyProductionInput>,
) -> AppResult<ApiResponse<DocumentOutcome>> {
    let outcome = productions(&state).modify(input, &current_user.0).await?;
    Ok(document_response(
        StatusCode::OK,
        format!("production number {} modified by {}", outcome.number, current_user.0.name),
        outcome,
    ))
}

pub async fn delete_production(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<ApiResponse<()>> {
    let actor = current_user.admin()?;
    let logs = productions(&state).delete(input.id, actor).await?;
    Ok(ApiResponse::ok(
        format!("production id {} deleted by {}", input.id, actor.name),
        (),
    )
    .with_logs(logs))
}

pub async fn print_production(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Response> {
    let (name, bytes) = productions(&state).print(input.id).await?;
    Ok(pdf(&name, bytes))
}
