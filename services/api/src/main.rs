use anyhow::Result;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod expiry;
mod middleware;
mod models;
mod routes;
mod state;
mod ws;

use common::database::{DatabaseConfig, init_pool, run_migrations};
use tokio::net::TcpListener;
use voting::{MemoryStore, PgSessionStore, SessionEngine, SessionStore, VotingConfig};

use crate::{
    config::{AppConfig, StorageBackend},
    middleware::JwtConfig,
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .init();

    info!("Starting API service");

    let app_config = AppConfig::load()?;
    let voting_config = VotingConfig::load()?;
    let jwt_config = JwtConfig::from_env().map_err(anyhow::Error::msg)?;
    let decoding_key = jwt_config.decoding_key().map_err(anyhow::Error::msg)?;

    let store: Arc<dyn SessionStore> = match app_config.storage {
        StorageBackend::Postgres => {
            let db_config = DatabaseConfig::from_env()?;
            let pool = init_pool(&db_config).await?;

            // Check database connectivity
            if common::database::health_check(&pool).await? {
                info!("Database connection successful");
            } else {
                anyhow::bail!("Failed to connect to database");
            }

            run_migrations(&pool).await?;
            Arc::new(PgSessionStore::new(pool))
        }
        StorageBackend::Memory => {
            info!("Using in-memory session store");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = SessionEngine::new(store, voting_config);

    let resumed = engine.resume_timers().await?;
    if resumed > 0 {
        info!("Resumed {} round timers", resumed);
    }

    let mut scheduler =
        expiry::start_expiry_job(engine.clone(), &app_config.expiry_schedule).await?;

    let app_state = AppState {
        engine,
        decoding_key: Arc::new(decoding_key),
    };

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = TcpListener::bind(&app_config.bind_address).await?;
    info!("API service listening on {}", app_config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down API service");
        })
        .await?;

    scheduler.shutdown().await?;

    Ok(())
}
