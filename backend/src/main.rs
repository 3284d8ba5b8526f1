//! Pharmacy POS - Backend Server

use std::{net::SocketAddr, sync::Arc, time::Duration};

use pharmacy_backend::{
    create_app, error_log,
    services::{audit::AuditLog, renderer::PdfRenderer, UserService},
    AppState, Config,
};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pharmacy_server=debug,pharmacy_backend=debug,tower_http=debug,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!("Starting pharmacy server");
    tracing::info!("Environment: {}", config.environment);

    let log_dir = config.storage.log_dir();
    error_log::init(&log_dir);

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database.url)
        .await?;
    tracing::info!("Database connection established");

    if config.environment == "development" {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    let audit = AuditLog::new(&log_dir);
    if !config.admin.initial_password.is_empty() {
        let created = UserService::new(db_pool.clone(), audit.clone())
            .ensure_initial_admin(&config.admin.initial_name, &config.admin.initial_password)
            .await?;
        if created {
            tracing::info!("initial admin {} created", config.admin.initial_name);
        }
    }

    let renderer = PdfRenderer::new(&config.storage.pdf_dir(), config.company.clone());
    let state = AppState {
        db: db_pool,
        config: Arc::new(config.clone()),
        audit,
        renderer: Arc::new(renderer),
    };

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
