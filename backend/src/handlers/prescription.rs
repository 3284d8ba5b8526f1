//! Prescription handlers
//!
//! Printing returns a ZIP of the prescription and its e-tickets.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use shared::{ListWindowRequest, NextNumber};

use crate::error::AppResult;
use crate::handlers::{attachment, document_response, list_request, IdInput};
use crate::middleware::CurrentUser;
use crate::response::ApiResponse;
use crate::services::document::DocumentOutcome;
use crate::services::prescription::{
    ModifyPrescriptionInput, PrescriptionDetail, PrescriptionInput, PrescriptionSummary,
    ZIP_FILE_NAME,
};
use crate::services::PrescriptionService;
use crate::AppState;

fn prescriptions(state: &AppState) -> PrescriptionService {
    PrescriptionService::new(state.db.clone(), state.audit.clone(), state.renderer.clone())
}

pub async fn create_prescription(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<PrescriptionInput>,
) -> AppResult<ApiResponse<DocumentOutcome>> {
    let outcome = prescriptions(&state).create(input, &current_user.0).await?;
    Ok(document_response(
        StatusCode::CREATED,
        format!("prescription number {} created by {}", outcome.number, current_user.0.name),
        outcome,
    ))
}

pub async fn next_prescription_number(
    State(state): State<AppState>,
    _current_user: CurrentUser,
) -> AppResult<Json<NextNumber>> {
    Ok(Json(prescriptions(&state).next_number().await?))
}

pub async fn list_prescriptions(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path((params, val)): Path<(String, String)>,
    Json(body): Json<ListWindowRequest>,
) -> AppResult<Json<Vec<PrescriptionSummary>>> {
    let (filter, window) = list_request(&params, &val, &body)?;
    Ok(Json(prescriptions(&state).list(&filter, &window).await?))
}

pub async fn prescription_detail(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Json<PrescriptionDetail>> {
    Ok(Json(prescriptions(&state).detail(input.id).await?))
}

pub async fn modify_prescription(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ModifyPrescriptionInput>,
) -> AppResult<ApiResponse<DocumentOutcome>> {
    let outcome = prescriptions(&state).modify(input, &current_user.0).await?;
    Ok(document_response(
        StatusCode::OK,
        format!("prescription number {} modified by {}", outcome.number, current_user.0.name),
        outcome,
    ))
}

pub async fn delete_prescription(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<ApiResponse<()>> {
    let actor = current_user.admin()?;
    let logs = prescriptions(&state).delete(input.id, actor).await?;
    Ok(ApiResponse::ok(
        format!("prescription id {} deleted by {}", input.id, actor.name),
        (),
    )
    .with_logs(logs))
}

pub async fn print_prescription(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Response> {
    let bytes = prescriptions(&state).print(input.id).await?;
    Ok(attachment("application/zip", ZIP_FILE_NAME, bytes))
}
