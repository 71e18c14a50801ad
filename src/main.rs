use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sparrow_rides::{
    config::AppConfig,
    handlers::create_router,
    services::payment_service::PaymentOperations,
    state::AppState,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sparrow_rides=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let bind_addr = config.bind_addr.clone();
    let sweep_every = Duration::from_secs(config.expiry_sweep_secs);

    let app_state = Arc::new(AppState::new(config).await?);
    tracing::info!(
        "Loaded {} promo codes, checkout sweep every {:?}",
        app_state.config.promo_codes.len(),
        sweep_every
    );

    let sweeper = app_state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper.payment_service.expire_stale_checkouts(Utc::now()).await {
                tracing::error!("Checkout expiry sweep failed: {}", e);
            }
        }
    });

    let app = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("sparrow-rides listening on {}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
