use axum::Router;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use boxoffice::api::AppState;
use boxoffice::config::Config;
use boxoffice::db;
use boxoffice::jobs::hold_expirer;
use boxoffice::store::{InventoryStore, PgInventoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxoffice=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting BoxOffice server...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let store: Arc<dyn InventoryStore> = Arc::new(PgInventoryStore::new(pool));

    // Schedule the expiry sweep
    let scheduler = JobScheduler::new().await?;
    let sweep_store = store.clone();
    let sweep_batch = config.sweep_batch_size;
    let sweep_job = Job::new_repeated_async(
        Duration::from_secs(config.sweep_interval_seconds),
        move |_id, _scheduler| {
            let store = sweep_store.clone();
            Box::pin(async move {
                match hold_expirer::sweep_expired_holds(store.as_ref(), Utc::now(), sweep_batch)
                    .await
                {
                    Ok(stats) => tracing::debug!(?stats, "Scheduled sweep finished"),
                    Err(err) => tracing::error!(error = %err, "Scheduled sweep failed"),
                }
            })
        },
    )?;
    scheduler.add(sweep_job).await?;
    scheduler.start().await?;
    tracing::info!(
        interval_seconds = config.sweep_interval_seconds,
        "Expiry sweep scheduled"
    );

    // Build application state
    let state = AppState {
        store,
        config: config.clone(),
    };

    // Build router
    let app = Router::new()
        .merge(boxoffice::api::health::router())
        .merge(boxoffice::api::reservations::router())
        .merge(boxoffice::api::payments::router())
        .merge(boxoffice::api::tiers::router())
        .merge(boxoffice::api::operations::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, cleaning up...");
}
