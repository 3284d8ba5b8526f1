//! User and session handlers

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::AppResult;
use crate::handlers::IdInput;
use crate::middleware::CurrentUser;
use crate::response::ApiResponse;
use crate::services::auth::{LoginInput, LoginResponse};
use crate::services::user::{
    ChangeAdminInput, ModifyUserInput, RegisterUserInput, RemoveUserInput, User,
};
use crate::services::{AuthService, UserService};
use crate::AppState;

fn users(state: &AppState) -> UserService {
    UserService::new(state.db.clone(), state.audit.clone())
}

fn auth(state: &AppState) -> AuthService {
    AuthService::new(state.db.clone(), &state.config)
}

pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginInput>,
) -> AppResult<Json<LoginResponse>> {
    let token = auth(&state).login(input).await?;
    Ok(Json(token))
}

pub async fn logout(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> AppResult<ApiResponse<()>> {
    auth(&state).logout(&current_user.0).await?;
    Ok(ApiResponse::ok(format!("{} logged out", current_user.0.name), ()))
}

/// Admin only, re-checked against the admin's own password
pub async fn register(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<RegisterUserInput>,
) -> AppResult<ApiResponse<User>> {
    auth(&state)
        .verify_admin_password(&current_user.0, &input.admin_password)
        .await?;
    let user = users(&state).register(input, &current_user.0).await?;
    Ok(ApiResponse::created(
        format!("{} registered by {}", user.name, current_user.0.name),
        user,
    ))
}

pub async fn list_users(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((params, val)): Path<(String, String)>,
) -> AppResult<Json<Vec<User>>> {
    current_user.admin()?;
    let list = users(&state).list(&params, &val).await?;
    Ok(Json(list))
}

pub async fn current_user(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> AppResult<Json<User>> {
    let user = users(&state).get_by_id(current_user.0.id).await?;
    Ok(Json(user))
}

pub async fn user_detail(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Json<User>> {
    current_user.admin()?;
    let user = users(&state).get_by_id(input.id).await?;
    Ok(Json(user))
}

pub async fn modify_user(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ModifyUserInput>,
) -> AppResult<ApiResponse<User>> {
    auth(&state)
        .verify_admin_password(&current_user.0, &input.new_data.admin_password)
        .await?;
    let user = users(&state).modify(input, &current_user.0).await?;
    Ok(ApiResponse::ok(
        format!("{} modified by {}", user.name, current_user.0.name),
        user,
    ))
}

pub async fn set_admin(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ChangeAdminInput>,
) -> AppResult<ApiResponse<User>> {
    auth(&state)
        .verify_admin_password(&current_user.0, &input.admin_password)
        .await?;
    let user = users(&state).set_admin(input, &current_user.0).await?;
    Ok(ApiResponse::ok(
        format!("{} admin status set to {}", user.name, user.admin),
        user,
    ))
}

pub async fn delete_user(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<RemoveUserInput>,
) -> AppResult<ApiResponse<()>> {
    auth(&state)
        .verify_admin_password(&current_user.0, &input.admin_password)
        .await?;
    users(&state).delete(input.id, &current_user.0).await?;
    Ok(ApiResponse::ok(
        format!("user id {} deleted by {}", input.id, current_user.0.name),
        (),
    ))
}
