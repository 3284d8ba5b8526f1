//! Route definitions for the pharmacy API

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Routes mounted under `/api/v1`
pub fn api_routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .merge(user_routes())
        .merge(medicine_routes())
        .merge(catalog_routes())
        .merge(recipe_routes())
        .merge(sales_invoice_routes())
        .merge(purchase_invoice_routes())
        .merge(purchase_order_routes())
        .merge(prescription_routes())
        .merge(production_routes())
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/user/login", post(handlers::user::login))
        .merge(protected)
}

fn user_routes() -> Router<AppState> {
    use handlers::user::*;
    Router::new()
        .route("/user/register", post(register))
        .route("/user/current", get(current_user))
        .route("/user/logout", get(logout))
        .route("/user/detail", post(user_detail))
        .route("/user/modify", patch(modify_user))
        .route("/user/admin", patch(set_admin))
        .route("/user", axum::routing::delete(delete_user))
        .route("/user/:params/:val", get(list_users))
}

fn medicine_routes() -> Router<AppState> {
    use handlers::medicine::*;
    Router::new()
        .route(
            "/medicine",
            post(create_medicine)
                .patch(modify_medicine)
                .delete(delete_medicine),
        )
        .route("/medicine/detail", post(medicine_detail))
        .route("/medicine/stock", patch(update_stock))
        .route("/medicine/stock/check", post(check_stock))
        .route("/medicine/export", get(export_medicines))
        .route("/medicine/:params/:val", get(list_medicines))
}

fn catalog_routes() -> Router<AppState> {
    use handlers::catalog::*;
    Router::new()
        .route("/catalog/:kind", get(list_entries).post(create_entry))
        .route("/unit/detail", post(unit_detail))
        .route("/unit/:name", get(unit_by_name))
}

fn recipe_routes() -> Router<AppState> {
    use handlers::recipe::*;
    Router::new()
        .route(
            "/main-doctor-prescription-item",
            post(create_recipe).patch(modify_recipe).delete(delete_recipe),
        )
        .route("/main-doctor-prescription-item/detail", post(recipe_detail))
        .route("/main-doctor-prescription-item/:val", get(list_recipes))
}

fn sales_invoice_routes() -> Router<AppState> {
    use handlers::sales_invoice::*;
    Router::new()
        .route(
            "/invoice",
            get(next_sales_invoice_number)
                .post(create_sales_invoice)
                .patch(modify_sales_invoice)
                .delete(delete_sales_invoice),
        )
        .route("/invoice/detail", post(sales_invoice_detail))
        .route("/invoice/print", post(print_sales_invoice))
        .route("/invoice/receipt", post(print_sales_receipt))
        .route("/invoice/:params/:val", post(list_sales_invoices))
}

fn purchase_invoice_routes() -> Router<AppState> {
    use handlers::purchase_invoice::*;
    Router::new()
        .route(
            "/invoice/purchase",
            get(next_purchase_invoice_number)
                .post(create_purchase_invoice)
                .patch(modify_purchase_invoice)
                .delete(delete_purchase_invoice),
        )
        .route("/invoice/purchase/detail", post(purchase_invoice_detail))
        .route("/invoice/purchase/print", post(print_purchase_invoice))
        .route("/invoice/purchase/:params/:val", post(list_purchase_invoices))
}

fn purchase_order_routes() -> Router<AppState> {
    use handlers::purchase_order::*;
    Router::new()
        .route(
            "/invoice/purchase-order",
            get(next_purchase_order_number)
                .post(create_purchase_order)
                .patch(modify_purchase_order)
                .delete(delete_purchase_order),
        )
        .route("/invoice/purchase-order/detail", post(purchase_order_detail))
        .route("/invoice/purchase-order/print", post(print_purchase_order))
        .route("/invoice/purchase-order/:params/:val", post(list_purchase_orders))
}

fn prescription_routes() -> Router<AppState> {
    use handlers::prescription::*;
    Router::new()
        .route(
            "/prescription",
            get(next_prescription_number)
                .post(create_prescription)
                .patch(modify_prescription)
                .delete(delete_prescription),
        )
        .route("/prescription/detail", post(prescription_detail))
        .route("/prescription/print", post(print_prescription))
        .route("/prescription/:params/:val", post(list_prescriptions))
}

fn production_routes() -> Router<AppState> {
    use handlers::production::*;
    Router::new()
        .route(
            "/production",
            get(next_production_number)
                .post(create_production)
                .patch(modify_production)
                .delete(delete_production),
        )
        .route("/production/detail", post(production_detail))
        .route("/production/print", post(print_production))
        .route("/production/:params/:val", post(list_productions))
}
