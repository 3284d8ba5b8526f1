//! Compounded-drug recipe handlers

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::response::ApiResponse;
use crate::services::recipe::{ModifyRecipeInput, Recipe, RecipeInput, RecipeMedicineInput};
use crate::services::RecipeService;
use crate::AppState;

fn recipes(state: &AppState) -> RecipeService {
    RecipeService::new(state.db.clone(), state.audit.clone())
}

pub async fn create_recipe(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<RecipeInput>,
) -> AppResult<ApiResponse<Recipe>> {
    let recipe = recipes(&state).create(input, &current_user.0).await?;
    Ok(ApiResponse::created(
        format!("{} created by {}", recipe.medicine_name, current_user.0.name),
        recipe,
    ))
}

/// `all` lists every recipe, anything else is a medicine name
pub async fn list_recipes(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(val): Path<String>,
) -> AppResult<Json<Vec<Recipe>>> {
    let service = recipes(&state);
    let list = if val == "all" {
        service.list().await?
    } else {
        vec![service.detail_by_name(&val).await?]
    };
    Ok(Json(list))
}

pub async fn recipe_detail(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<RecipeMedicineInput>,
) -> AppResult<Json<Recipe>> {
    Ok(Json(recipes(&state).detail(input.medicine_id).await?))
}

pub async fn modify_recipe(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ModifyRecipeInput>,
) -> AppResult<ApiResponse<Recipe>> {
    let recipe = recipes(&state).modify(input, &current_user.0).await?;
    Ok(ApiResponse::ok(
        format!("{} modified by {}", recipe.medicine_name, current_user.0.name),
        recipe,
    ))
}

pub async fn delete_recipe(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<RecipeMedicineInput>,
) -> AppResult<ApiResponse<()>> {
    let actor = current_user.admin()?;
    recipes(&state).delete(input.medicine_id, actor).await?;
    Ok(ApiResponse::ok(
        format!("recipe of medicine id {} deleted by {}", input.medicine_id, actor.name),
        (),
    ))
}
