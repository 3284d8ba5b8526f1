//! JSON response envelope shared by success and failure paths

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// `{success, code, message, log?, error?, result?}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// 200 with a result
    pub fn ok(message: impl Into<String>, result: T) -> Self {
        Self::success(StatusCode::OK, message, result)
    }

    /// 201 with a result
    pub fn created(message: impl Into<String>, result: T) -> Self {
        Self::success(StatusCode::CREATED, message, result)
    }

    pub fn success(status: StatusCode, message: impl Into<String>, result: T) -> Self {
        Self {
            success: true,
            code: status.as_u16(),
            message: message.into(),
            log: None,
            error: None,
            result: Some(result),
        }
    }

    /// Attach error-log references for side effects that failed after the
    /// business write succeeded
    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        if !logs.is_empty() {
            self.log = Some(format!("please contact administrator! log: {}", logs.join(", ")));
        }
        self
    }
}

impl ApiResponse<()> {
    pub fn failure(
        status: StatusCode,
        message: String,
        code: &str,
        log: Option<String>,
    ) -> Self {
        Self {
            success: false,
            code: status.as_u16(),
            message,
            log,
            error: Some(code.to_string()),
            result: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::created("done", 5)).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["code"], 201);
        assert_eq!(body["result"], 5);
        assert!(body.get("error").is_none());
        assert!(body.get("log").is_none());
    }

    #[test]
    fn test_failure_envelope_shape() {
        let resp = ApiResponse::failure(
            StatusCode::BAD_REQUEST,
            "stock for AMOX500 is not enough".to_string(),
            "INSUFFICIENT_STOCK",
            None,
        );
        let body = serde_json::to_value(resp).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], 400);
        assert_eq!(body["error"], "INSUFFICIENT_STOCK");
        assert!(body.get("result").is_none());
    }

    #[test]
    fn test_logs_are_attached_only_when_present() {
        let resp = ApiResponse::ok("ok", ()).with_logs(vec![]);
        assert!(resp.log.is_none());
        let resp = ApiResponse::ok("ok", ()).with_logs(vec!["a.log".to_string()]);
        assert!(resp.log.unwrap().contains("a.log"));
    }
}
