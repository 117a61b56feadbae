//! Demo server: settings from env (and `.env`), PostgreSQL when `DATABASE_URL` is set,
//! otherwise the in-memory store; mounts the Nobix api plus health/version.

use axum::Router;
use nobix_api::{
    common_routes, cors_layer, create_tables, domain, ensure_database_exists, routes::BODY_LIMIT, AppState,
    MemoryStore, PgStore, Settings, Store,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nobix_api=info".parse()?))
        .init();

    let settings = Settings::from_env();
    tracing::info!(mode = ?settings.mode, debug = settings.debug, "starting");

    let models = Arc::new(domain::models()?);
    let schemas = Arc::new(domain::schemas()?);

    let store: Arc<dyn Store> = match &settings.database_url {
        Some(url) => {
            ensure_database_exists(url).await?;
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await?;
            create_tables(&pool, &models).await?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new(models.clone()))
        }
    };

    let state = AppState::new(store, models, schemas, settings.debug);
    let api = domain::api(&settings.api_prefix, state)?;

    // the body limit wraps cors: `Cors` needs a `Default` response body
    let app = api.attach(Router::new().merge(common_routes())).layer(
        ServiceBuilder::new()
            .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
            .layer(cors_layer()),
    );

    let listener = TcpListener::bind(&settings.bind).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
