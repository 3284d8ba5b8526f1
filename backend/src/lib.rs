//! Pharmacy point-of-sale backend
//!
//! Medicine stock and the documents that move it: purchase orders, purchase
//! invoices, sales invoices, prescriptions and production runs.

use std::sync::Arc;

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    routing::get,
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod error_log;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod services;

pub use config::Config;

use services::audit::AuditLog;
use services::renderer::DocumentRenderer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Arc<Config>,
    pub audit: AuditLog,
    pub renderer: Arc<dyn DocumentRenderer>,
}

/// `Access-Control-Allow-Origin: *` with the methods and headers the
/// clients send
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
            Method::DELETE,
            Method::PATCH,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}
