use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use servicebook::config::{AppConfig, DataSource};
use servicebook::db;
use servicebook::handlers;
use servicebook::services::backend::agent::AgentBackend;
use servicebook::services::backend::local::LocalBackend;
use servicebook::services::backend::BookingBackend;
use servicebook::services::query_cache::QueryClient;
use servicebook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let backend: Arc<dyn BookingBackend> = match config.data_source {
        DataSource::Agent => {
            tracing::info!("using agent data source (url: {})", config.agent_url);
            Arc::new(AgentBackend::new(
                config.agent_url.clone(),
                Duration::from_secs(config.agent_timeout_secs),
            )?)
        }
        DataSource::Local => {
            tracing::info!("using local data source (db: {})", config.database_url);
            let conn = db::init_db(&config.database_url)?;
            Arc::new(LocalBackend::new(
                Arc::new(Mutex::new(conn)),
                config.customer_id.clone(),
            ))
        }
    };

    let queries = Arc::new(QueryClient::new(
        backend,
        Duration::from_secs(config.query_stale_secs),
    ));
    let state = Arc::new(AppState::new(config.clone(), queries));

    let sweeper = Arc::clone(&state);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            sweeper.flows.sweep();
        }
    });

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
