use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use inventory_service::api;
use inventory_service::cache::{AdvisoryCache, DisabledCache, RedisReservationCache, ReservationCache};
use inventory_service::config::Args;
use inventory_service::engine::InventoryEngine;
use inventory_service::postgres::{self, PgLedger};
use inventory_service::sweeper::ExpirySweeper;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    // Run migrations first
    postgres::run_migrations(&args.database_url)?;

    let ledger = PgLedger::connect(&args.database_url, args.db_pool_size).await?;

    let cache: Arc<dyn ReservationCache> = if args.cache_disabled {
        warn!("Reservation cache disabled");
        Arc::new(DisabledCache)
    } else {
        Arc::new(RedisReservationCache::connect(&args.redis_url).await?)
    };
    let cache = AdvisoryCache::new(cache, args.cache_timeout());

    let engine = Arc::new(InventoryEngine::new(ledger, cache, args.engine_config()));
    engine.health_check().await?;

    let cancel = CancellationToken::new();
    let sweeper = ExpirySweeper::new(engine.clone(), args.expiry_interval());
    let sweeper_cancel = cancel.clone();
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(sweeper_cancel).await;
    });

    let app = api::create_router(api::AppState::new(engine.clone()));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Inventory service web server started on port {}", args.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    sweeper_handle.await?;
    info!("Inventory service stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Shutdown signal received (ctrl-c)"),
        _ = terminate => info!("Shutdown signal received (SIGTERM)"),
    }
}
