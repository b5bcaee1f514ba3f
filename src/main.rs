//! Courier outbound webhook delivery service.
//!
//! Entry point for the standalone delivery daemon. Connects to
//! PostgreSQL, ensures the schema exists, then runs the discovery and
//! dispatch workers until a shutdown signal arrives.

mod config;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use courier_core::{storage::Storage, Clock, RealClock};
use courier_delivery::{
    client::ClientConfig,
    discovery::{DiscoveryConfig, DiscoveryWorker},
    dispatcher::{Dispatcher, DispatcherConfig},
    store::{DeliveryStore, PostgresDeliveryStore},
    DeliveryClient,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting courier webhook delivery service");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        discovery_interval_secs = config.discovery_interval_secs,
        dispatch_interval_secs = config.dispatch_interval_secs,
        "configuration loaded"
    );

    let pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    run_migrations(&pool).await?;
    info!("database schema ready");

    let storage = Arc::new(Storage::new(pool.clone()));
    let store: Arc<dyn DeliveryStore> = Arc::new(PostgresDeliveryStore::new(storage));
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let shutdown = CancellationToken::new();

    let discovery = DiscoveryWorker::new(
        store.clone(),
        DiscoveryConfig {
            interval: config.discovery_interval(),
            lookback: ChronoDuration::hours(config.lookback_hours),
        },
        clock.clone(),
        shutdown.clone(),
    );

    let client = DeliveryClient::new(ClientConfig::default())
        .context("failed to initialize delivery client")?;
    let dispatcher = Dispatcher::new(
        store,
        client,
        DispatcherConfig {
            interval: config.dispatch_interval(),
            batch_size: config.dispatch_batch_size,
            ..DispatcherConfig::default()
        },
        clock,
        shutdown.clone(),
    );

    let discovery_handle = tokio::spawn(discovery.run());
    let dispatch_handle = tokio::spawn(dispatcher.run());
    info!("courier is delivering webhooks");

    shutdown_signal().await;
    info!("shutdown signal received, stopping workers");
    shutdown.cancel();

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let workers = async {
        if let Err(e) = discovery_handle.await {
            error!(error = %e, "discovery worker panicked");
        }
        if let Err(e) = dispatch_handle.await {
            error!(error = %e, "dispatch worker panicked");
        }
    };
    tokio::select! {
        () = workers => info!("workers stopped"),
        () = tokio::time::sleep(grace) => info!("shutdown grace period expired"),
    }

    pool.close().await;
    info!("database connections closed, shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,courier=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;
                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Ensures the delivery schema exists.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS webhook_destinations (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            org_id UUID NOT NULL,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            event_types TEXT[] NOT NULL DEFAULT '{}',
            auth_type TEXT NOT NULL DEFAULT 'none',
            auth_config JSONB,
            signing_secret TEXT,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            batch_size INTEGER NOT NULL DEFAULT 100,
            timeout_ms INTEGER NOT NULL DEFAULT 30000,
            retry_max INTEGER NOT NULL DEFAULT 3,
            retry_backoff_ms INTEGER NOT NULL DEFAULT 60000,
            created_by UUID,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE(org_id, name)
        )
        ",
    )
    .execute(pool)
    .await
    .context("failed to create webhook_destinations table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS activity_events (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            org_id UUID NOT NULL,
            event_type TEXT NOT NULL,
            event_category TEXT NOT NULL,
            employee_id UUID,
            session_id UUID,
            client_name TEXT,
            client_version TEXT,
            content TEXT,
            payload JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await
    .context("failed to create activity_events table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS webhook_deliveries (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            destination_id UUID NOT NULL REFERENCES webhook_destinations(id),
            event_id UUID NOT NULL REFERENCES activity_events(id),
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt_at TIMESTAMPTZ,
            next_retry_at TIMESTAMPTZ,
            response_status INTEGER,
            response_body TEXT,
            error_message TEXT,
            delivered_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE(destination_id, event_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("failed to create webhook_deliveries table")?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_due
        ON webhook_deliveries(status, next_retry_at)
        WHERE status = 'pending'
        ",
    )
    .execute(pool)
    .await
    .context("failed to create webhook_deliveries due index")?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_activity_events_org_created
        ON activity_events(org_id, created_at)
        ",
    )
    .execute(pool)
    .await
    .context("failed to create activity_events org index")?;

    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received CTRL+C signal"),
        _ = terminate => info!("received SIGTERM signal"),
    }
}
