use std::sync::Arc;
use std::net::SocketAddr;
use anyhow::Context;
use flashtix_api::{app, state::{AppState, AuthConfig}};
use flashtix_core::TicketStore;
use flashtix_reservation::{Reconciler, ReservationConfig, ReservationCoordinator};
use flashtix_store::{app_config::Config, DbClient, PgTicketStore, RedisLeaseStore};
use tokio::sync::{broadcast, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flashtix_api=debug,flashtix_reservation=debug,flashtix_store=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting FlashTix API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let settings = match db.fetch_reservation_settings(config.reservation.clone()).await {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Could not read reservation settings overrides, using file config: {}", e);
            config.reservation.clone()
        }
    };
    let deadline = settings.store_deadline();

    // Redis
    let leases = RedisLeaseStore::new(&config.redis.url, deadline)
        .await
        .context("Failed to connect to Redis")?;

    let tickets: Arc<dyn TicketStore> = Arc::new(PgTicketStore::new(db.pool.clone(), deadline));
    let (seat_events, _) = broadcast::channel(256);

    let reservation_config = ReservationConfig {
        hold: settings.hold(),
        reconcile_batch_size: settings.reconcile_batch_size,
    };
    tracing::info!("Seat hold window: {:?}", reservation_config.hold);

    let coordinator = Arc::new(
        ReservationCoordinator::new(Arc::new(leases), tickets.clone(), reservation_config)
            .with_events(seat_events.clone()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = Reconciler::new(coordinator.clone(), settings.reconcile_interval()).spawn(shutdown_rx);

    let app_state = AppState {
        coordinator,
        tickets,
        seat_events,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = reconciler.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
