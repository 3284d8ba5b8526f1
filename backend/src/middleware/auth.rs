//! Authentication middleware
//!
//! Bearer tokens are validated against the token table on every request; the
//! resolved [`AuthUser`] travels in the request extensions.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::services::auth::{AuthService, AuthUser};
use crate::AppState;

/// Reject requests without a live token of a single active session
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(&request) {
        Some(token) => token.to_string(),
        None => {
            return AppError::Unauthorized("missing or invalid Authorization header".to_string())
                .into_response()
        }
    };

    let auth = AuthService::new(state.db.clone(), &state.config);
    let user = match auth.authorize(&token, false).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    request.extensions_mut().insert(user);
    next.run(request).await
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extractor for the authenticated user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

impl CurrentUser {
    /// The user, or `NotAdmin` for routes that need an administrator
    pub fn admin(&self) -> Result<&AuthUser, AppError> {
        self.0.require_admin()?;
        Ok(&self.0)
    }
}

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("authentication required".to_string()))
    }
}
