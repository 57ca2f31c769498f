use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::info;

use wall_service::repository::{PgIdentityProvider, PgVerificationCodes, PgWallStore};
use wall_service::services::VerificationService;
use wall_service::workers::{
    start_counter_reconciler, start_verification_purger, CounterReconciler,
};
use wall_service::{logging, Config, WallServices};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();

    info!("Starting wall-service");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        env = %config.app.env,
        max_attempts = config.counters.max_attempts,
        "Configuration loaded"
    );

    let db_config = config.db_pool_config();
    db_config.log_config();
    let pg_pool = db_pool::create_pool(&db_config)
        .await
        .context("Failed to connect to database")?;
    info!("Database pool created and verified");

    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let store = Arc::new(PgWallStore::new(
        pg_pool.clone(),
        config.database.statement_timeout_ms,
    ));
    let identity = Arc::new(PgIdentityProvider::new(pg_pool.clone()));
    let codes = Arc::new(PgVerificationCodes::new(pg_pool.clone()));

    // Operations exposed to the request layer
    let _services = WallServices::new(store.clone(), identity, config.retry_policy());
    let verification = Arc::new(VerificationService::new(
        codes,
        config.verification_code_ttl(),
    ));
    info!("Wall services initialized");

    let mut join_set = JoinSet::new();

    let reconciler = Arc::new(CounterReconciler::new(
        store,
        config.jobs.reconcile_batch_size,
    ));
    join_set.spawn(start_counter_reconciler(reconciler, config.reconciler()));

    join_set.spawn(start_verification_purger(
        verification,
        config.verification_purge_interval(),
    ));
    info!("Background jobs started");

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
        _ = async {
            while let Some(result) = join_set.join_next().await {
                if let Err(e) = result {
                    tracing::error!("Background job panicked: {:#}", e);
                }
            }
            // every job returned (all disabled); keep serving until shutdown
            std::future::pending::<()>().await
        } => {}
    }

    join_set.shutdown().await;
    pg_pool.close().await;
    info!("wall-service shut down");
    Ok(())
}
