mod audit;
mod auth;
mod config;
mod dispatch;
mod error;
mod intake;
mod rate_limit;
mod routes;

use std::sync::Arc;

use config::HubConfig;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; deployments inject the environment directly.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ambulink_hub=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(HubConfig::from_env()?);
    tracing::info!("Starting ambulink-hub with config: {:?}", config);

    let state = AppState::from_config(config);
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("ambulink-hub listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
