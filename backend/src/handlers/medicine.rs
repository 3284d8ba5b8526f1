//! Medicine registry handlers

use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};

use crate::error::AppResult;
use crate::handlers::{attachment, IdInput};
use crate::middleware::CurrentUser;
use crate::response::ApiResponse;
use crate::services::medicine::{
    Medicine, MedicineInput, ModifyMedicineInput, StockCheck, StockCheckInput, UpdateStockInput,
};
use crate::services::MedicineService;
use crate::AppState;

fn medicines(state: &AppState) -> MedicineService {
    MedicineService::new(state.db.clone(), state.audit.clone())
}

pub async fn create_medicine(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<MedicineInput>,
) -> AppResult<ApiResponse<Medicine>> {
    let actor = current_user.admin()?;
    let medicine = medicines(&state).create(input, actor).await?;
    Ok(ApiResponse::created(
        format!("{} created by {}", medicine.name, actor.name),
        medicine,
    ))
}

pub async fn list_medicines(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path((params, val)): Path<(String, String)>,
) -> AppResult<Json<Vec<Medicine>>> {
    let list = medicines(&state).list(&params, &val).await?;
    Ok(Json(list))
}

pub async fn medicine_detail(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<Json<Medicine>> {
    let medicine = medicines(&state).get_by_id(input.id).await?;
    Ok(Json(medicine))
}

pub async fn modify_medicine(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ModifyMedicineInput>,
) -> AppResult<ApiResponse<Medicine>> {
    let actor = current_user.admin()?;
    let medicine = medicines(&state).modify(input, actor).await?;
    Ok(ApiResponse::ok(
        format!("{} modified by {}", medicine.name, actor.name),
        medicine,
    ))
}

/// Stock opname: overwrite the balance with a counted quantity
pub async fn update_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<UpdateStockInput>,
) -> AppResult<ApiResponse<Medicine>> {
    let actor = current_user.admin()?;
    let medicine = medicines(&state).update_stock(input, actor).await?;
    Ok(ApiResponse::ok(
        format!("stock of {} set to {}", medicine.name, medicine.qty),
        medicine,
    ))
}

pub async fn check_stock(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(input): Json<StockCheckInput>,
) -> AppResult<Json<StockCheck>> {
    Ok(Json(medicines(&state).check_stock(input).await?))
}

pub async fn delete_medicine(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<IdInput>,
) -> AppResult<ApiResponse<()>> {
    let actor = current_user.admin()?;
    medicines(&state).soft_delete(input.id, actor).await?;
    Ok(ApiResponse::ok(
        format!("medicine id {} deleted by {}", input.id, actor.name),
        (),
    ))
}

pub async fn export_medicines(
    State(state): State<AppState>,
    _current_user: CurrentUser,
) -> AppResult<Response> {
    let bytes = medicines(&state).export_csv().await?;
    Ok(attachment("text/csv", "medicines.csv", bytes))
}
