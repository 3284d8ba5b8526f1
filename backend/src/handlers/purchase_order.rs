//! Purchase order handlers

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
use crate::services::purchase_order::{
    ModifyPurchaseOrderInput, PurchaseOrderDetail, PurchaseOrderInput, PurchaseOrderSummary,
};
use crate::services::PurchaseOrderService;
use crate::AppState;

fn orders(state: &AppState) -> PurchaseOrderService {
    PurchaseOrderService::new(state.db.clone(), state.audit.clone(), state.renderer.clone())
}

pub async fn create_purchase_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<PurchaseOrderInput>,
) -> AppResult<ApiResponse<DocumentOutcome>> {
    let outcome = orders(&state).create(input, &current_user.0).await?;
    Ok(document_response(
        StatusCode::CREATED,
        format!("purchase order number {} created by {}", outcome.number, current_user.0.name),
        outcome,
    ))
}

pub async fn next_purchase_order_number(
    State(state): State<AppState>,
    _current_user: CurrentUser,
) -> AppResult<Json<NextNumber>> {
    Ok(Json(orders(&state).next_number().await?))
}

pub async fn list_purchase_orders(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path((params, val)): Path<(String, String)>,
    Json(body): Json<ListWindowRequest>,
) -> AppResult<Json<Vec<PurchaseOrderSummary>>> {
    let (filter, window) = list_request(&params, &val, &body)?;
    Ok(Json(orders(&state).list(&filter, &window).await?))
}

pub async fn purchase_order_detail(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Json<PurchaseOrderDetail>> {
    Ok(Json(orders(&state).detail(input.id).await?))
}

pub async fn modify_purchase_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ModifyPurchaseOrderInput>,
) -> AppResult<ApiResponse<DocumentOutcome>> {
    let outcome = orders(&state).modify(input, &current_user.0).await?;
    Ok(document_response(
        StatusCode::OK,
        format!("purchase order number {} modified by {}", outcome.number, current_user.0.name),
        outcome,
    ))
}

pub async fn delete_purchase_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<ApiResponse<()>> {
    let actor = current_user.admin()?;
    let logs = orders(&state).delete(input.id, actor).await?;
    Ok(ApiResponse::ok(
        format!("purchase order id {} deleted by {}", input.id, actor.name),
        (),
    )
    .with_logs(logs))
}

pub async fn print_purchase_order(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Response> {
    let (name, bytes) = orders(&state).print(input.id).await?;
    Ok(pdf(&name, bytes))
}
