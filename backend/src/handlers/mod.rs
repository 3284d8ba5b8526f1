//! HTTP handlers
//!
//! Handlers stay thin: parse, call the service, wrap the result in an
//! [`ApiResponse`](crate::response::ApiResponse).

pub mod catalog;
pub mod health;
pub mod medicine;
pub mod prescription;
pub mod production;
pub mod purchase_invoice;
pub mod purchase_order;
pub mod recipe;
pub mod sales_invoice;
pub mod user;

pub use health::{health_check, root};

use axum::{
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        StatusCode,
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use shared::{DateWindow, ListFilter, ListWindowRequest};
use validator::Validate;

use crate::error::AppResult;
use crate::response::ApiResponse;
use crate::services::document::DocumentOutcome;

/// `{id}` body of detail, print and delete endpoints
#[derive(Debug, Deserialize)]
pub struct IdInput {
    pub id: i32,
}

/// Parse the `{params}/{val}` selector and the date window body of a list
/// endpoint
pub fn list_request(
    params: &str,
    val: &str,
    body: &ListWindowRequest,
) -> AppResult<(ListFilter, DateWindow)> {
    body.validate()?;
    let filter = ListFilter::parse(params, val)?;
    let window = body.window()?;
    Ok((filter, window))
}

/// Stream bytes as a downloadable attachment
pub fn attachment(content_type: &'static str, file_name: &str, bytes: Vec<u8>) -> Response {
    (
        [
            (CONTENT_TYPE, content_type.to_string()),
            (CONTENT_DISPOSITION, format!("attachment; filename={}", file_name)),
        ],
        bytes,
    )
        .into_response()
}

pub fn pdf(file_name: &str, bytes: Vec<u8>) -> Response {
    attachment("application/pdf", file_name, bytes)
}

/// Envelope for a committed document command; failed side effects surface
/// as log references
pub fn document_response(
    status: StatusCode,
    message: String,
    mut outcome: DocumentOutcome,
) -> ApiResponse<DocumentOutcome> {
    let logs = std::mem::take(&mut outcome.logs);
    ApiResponse::success(status, message, outcome).with_logs(logs)
}
