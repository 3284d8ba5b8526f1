//! Sales invoice handlers

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
use crate::services::sales_invoice::{
    ModifySalesInvoiceInput, SalesInvoiceDetail, SalesInvoiceInput, SalesInvoiceSummary,
};
use crate::services::SalesInvoiceService;
use crate::AppState;

fn invoices(state: &AppState) -> SalesInvoiceService {
    SalesInvoiceService::new(state.db.clone(), state.audit.clone(), state.renderer.clone())
}

pub async fn create_sales_invoice(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<SalesInvoiceInput>,
) -> AppResult<ApiResponse<DocumentOutcome>> {
    let outcome = invoices(&state).create(input, &current_user.0).await?;
    Ok(document_response(
        StatusCode::CREATED,
        format!("invoice number {} created by {}", outcome.number, current_user.0.name),
        outcome,
    ))
}

pub async fn next_sales_invoice_number(
    State(state): State<AppState>,
    _current_user: CurrentUser,
) -> AppResult<Json<NextNumber>> {
    Ok(Json(invoices(&state).next_number().await?))
}

pub async fn list_sales_invoices(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path((params, val)): Path<(String, String)>,
    Json(body): Json<ListWindowRequest>,
) -> AppResult<Json<Vec<SalesInvoiceSummary>>> {
    let (filter, window) = list_request(&params, &val, &body)?;
    Ok(Json(invoices(&state).list(&filter, &window).await?))
}

pub async fn sales_invoice_detail(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Json<SalesInvoiceDetail>> {
    Ok(Json(invoices(&state).detail(input.id).await?))
}

pub async fn modify_sales_invoice(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ModifySalesInvoiceInput>,
) -> AppResult<ApiResponse<DocumentOutcome>> {
    let outcome = invoices(&state).modify(input, &current_user.0).await?;
    Ok(document_response(
        StatusCode::OK,
        format!("invoice number {} modified by {}", outcome.number, current_user.0.name),
        outcome,
    ))
}

pub async fn delete_sales_invoice(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<ApiResponse<()>> {
    let actor = current_user.admin()?;
    let logs = invoices(&state).delete(input.id, actor).await?;
    Ok(ApiResponse::ok(
        format!("invoice id {} deleted by {}", input.id, actor.name),
        (),
    )
    .with_logs(logs))
}

pub async fn print_sales_invoice(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Response> {
    let (name, bytes) = invoices(&state).print(input.id).await?;
    Ok(pdf(&name, bytes))
}

pub async fn print_sales_receipt(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Response> {
    let (name, bytes) = invoices(&state).print_receipt(input.id).await?;
    Ok(pdf(&name, bytes))
}
