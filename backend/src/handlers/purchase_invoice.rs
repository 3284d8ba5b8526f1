//! Purchase invoice handlers

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
use crate::services::purchase_invoice::{
    ModifyPurchaseInvoiceInput, PurchaseInvoiceDetail, PurchaseInvoiceInput, PurchaseInvoiceSummary,
};
use crate::services::PurchaseInvoiceService;
use crate::AppState;

fn invoices(state: &AppState) -> PurchaseInvoiceService {
    PurchaseInvoiceService::new(state.db.clone(), state.audit.clone(), state.renderer.clone())
}

pub async fn create_purchase_invoice(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<PurchaseInvoiceInput>,
) -> AppResult<ApiResponse<DocumentOutcome>> {
    let outcome = invoices(&state).create(input, &current_user.0).await?;
    Ok(document_response(
        StatusCode::CREATED,
        format!("purchase invoice number {} created by {}", outcome.number, current_user.0.name),
        outcome,
    ))
}

pub async fn next_purchase_invoice_number(
    State(state): State<AppState>,
    _current_user: CurrentUser,
) -> AppResult<Json<NextNumber>> {
    Ok(Json(invoices(&state).next_number().await?))
}

pub async fn list_purchase_invoices(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path((params, val)): Path<(String, String)>,
    Json(body): Json<ListWindowRequest>,
) -> AppResult<Json<Vec<PurchaseInvoiceSummary>>> {
    let (filter, window) = list_request(&params, &val, &body)?;
    Ok(Json(invoices(&state).list(&filter, &window).await?))
}

pub async fn purchase_invoice_detail(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Json<PurchaseInvoiceDetail>> {
    Ok(Json(invoices(&state).detail(input.id).await?))
}

pub async fn modify_purchase_invoice(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ModifyPurchaseInvoiceInput>,
) -> AppResult<ApiResponse<DocumentOutcome>> {
    let outcome = invoices(&state).modify(input, &current_user.0).await?;
    Ok(document_response(
        StatusCode::OK,
        format!("purchase invoice number {} modified by {}", outcome.number, current_user.0.name),
        outcome,
    ))
}

pub async fn delete_purchase_invoice(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<ApiResponse<()>> {
    let actor = current_user.admin()?;
    let logs = invoices(&state).delete(input.id, actor).await?;
    Ok(ApiResponse::ok(
        format!("purchase invoice id {} deleted by {}", input.id, actor.name),
        (),
    )
    .with_logs(logs))
}

pub async fn print_purchase_invoice(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Response> {
    let (name, bytes) = invoices(&state).print(input.id).await?;
    Ok(pdf(&name, bytes))
}
