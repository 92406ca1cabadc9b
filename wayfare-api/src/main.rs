use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wayfare_api::{app, AppState, AuthConfig};
use wayfare_api::metrics::Metrics;
use wayfare_api::middleware::rate_limit::RateLimitState;
use wayfare_core::clock::SystemClock;
use wayfare_delivery::{DeliveryEngine, ExpirySweeper};
use wayfare_store::{
    Config, DbClient, EventBus, PostgresDeliveryRepository, PostgresTripRepository,
    PostgresUserDirectory,
};
use wayfare_trip::{BookingEngine, TripLifecycleEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "wayfare_api=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!("Starting Wayfare API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url)
        .await
        .context("failed to connect to Postgres")?;
    db.migrate().await.context("failed to run migrations")?;

    let trips = Arc::new(PostgresTripRepository::new(db.pool.clone()));
    let requests = Arc::new(PostgresDeliveryRepository::new(db.pool.clone()));
    let users = Arc::new(PostgresUserDirectory::new(db.pool.clone()));
    let clock = Arc::new(SystemClock);

    let lifecycle = Arc::new(TripLifecycleEngine::new(
        trips.clone(),
        users.clone(),
        clock.clone(),
        config.booking_rules.clone(),
    ));
    let booking = Arc::new(BookingEngine::new(
        trips.clone(),
        users.clone(),
        clock.clone(),
        config.booking_rules.clone(),
    ));
    let deliveries = Arc::new(DeliveryEngine::new(
        requests.clone(),
        trips.clone(),
        users.clone(),
        clock.clone(),
        config.delivery_rules.clone(),
    ));
    let sweeper = Arc::new(ExpirySweeper::new(requests.clone(), clock.clone()));

    let state = AppState {
        lifecycle,
        booking,
        deliveries,
        sweeper,
        users,
        clock,
        events: EventBus::new(100),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
        metrics: Arc::new(Metrics::new()),
        rate_limit: RateLimitState::new(
            config.server.rate_limit_requests,
            Duration::from_secs(config.server.rate_limit_window_seconds),
        ),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app(state))
        .await
        .context("server error")?;
    Ok(())
}
