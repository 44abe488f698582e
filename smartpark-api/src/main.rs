use anyhow::Context;
use smartpark_api::{app, metrics, state::AppState, worker};
use smartpark_core::{MockPaymentGateway, PaymentGateway};
use smartpark_store::app_config::{Config, GatewayMode};
use smartpark_store::{connect_store, PaynowGateway, RedisClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "smartpark_api=debug,smartpark_reservation=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting SmartPark API on port {}", config.server.port);

    let store = connect_store(&config.store).await.context("Failed to open document store")?;

    let redis = match &config.redis.url {
        Some(url) => Some(Arc::new(
            RedisClient::new(url).await.context("Failed to connect to Redis")?,
        )),
        None => {
            tracing::warn!("redis.url not set, rate limiting disabled");
            None
        }
    };

    let gateway: Arc<dyn PaymentGateway> = match config.paynow.mode {
        GatewayMode::Live => Arc::new(
            PaynowGateway::new(config.paynow.clone()).context("Failed to build Paynow client")?,
        ),
        GatewayMode::Mock => {
            tracing::warn!("Using mock payment gateway");
            Arc::new(MockPaymentGateway::new())
        }
    };

    metrics::register_metrics();

    let app_state = AppState::new(&config, store, gateway, redis);
    worker::start_expiry_worker(app_state.sweeper.clone());

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
