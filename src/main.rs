use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sentiment_server::api::{self, AppState};
use sentiment_server::config::Settings;
use sentiment_server::db::SentimentStore;
use sentiment_server::models::{ModelManager, PretrainedLoader};
use sentiment_server::pipeline::AnalysisPipeline;
use sentiment_server::rate_limit::{spawn_eviction, RateLimiter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;

    let store = SentimentStore::connect(&settings.database_url, settings.db_max_connections).await?;
    info!(url = %settings.database_url, "database ready");

    // Models load on the first request, not here.
    let models = Arc::new(ModelManager::new(Arc::new(PretrainedLoader::from_settings(&settings))));
    let pipeline = Arc::new(AnalysisPipeline::new(
        models,
        store.clone(),
        settings.labels.clone(),
        settings.limits,
    ));

    let limiter = Arc::new(RateLimiter::new(settings.rate_limit, settings.rate_window));
    spawn_eviction(limiter.clone());

    let state = Arc::new(AppState::new(pipeline, limiter).with_forwarded_for(settings.trust_forwarded_for));
    let app = api::router(state, &settings.static_dir);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    store.close().await;
    Ok(())
}
