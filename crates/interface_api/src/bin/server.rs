//! Clinic Ledger - API Server Binary
//!
//! # Usage
//!
//! ```bash
//! # In-memory ledger, UTC calendar days
//! cargo run --bin clinic-ledger-api
//!
//! # PostgreSQL, Manila calendar days, rollups on a background worker
//! API_DATABASE_URL=postgres://... API_CLINIC_TIMEZONE=Asia/Manila \
//!     API_ANALYTICS_MODE=queued cargo run --bin clinic-ledger-api
//! ```
//!
//! # Environment Variables
//!
//! * `API_HOST` - Server host (default: 0.0.0.0)
//! * `API_PORT` - Server port (default: 8080)
//! * `API_JWT_SECRET` - JWT signing secret (required in production)
//! * `API_DATABASE_URL` - PostgreSQL connection string; in-memory store if unset
//! * `API_LOG_LEVEL` - trace, debug, info, warn, error (default: info)
//! * `API_LOG_JSON` - emit JSON log lines (default: false)
//! * `API_CLINIC_TIMEZONE` - IANA zone for daily analytics (default: UTC)
//! * `API_ANALYTICS_MODE` - `inline` or `queued` (default: inline)
//! * `API_REQUEST_TIMEOUT_SECS` - per-request timeout (default: 30)

use anyhow::{anyhow, Context};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use domain_billing::BillingService;
use infra_db::{create_pool, run_migrations, PgLedgerStore, PgMasterData};
use interface_api::{config::ApiConfig, create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ApiConfig::from_env().context("invalid API_ configuration")?;
    init_tracing(&config);

    tracing::info!(
        host = %config.host,
        port = %config.port,
        timezone = %config.clinic_timezone,
        analytics_mode = %config.analytics_mode,
        "Starting clinic ledger API server"
    );

    let state = build_state(config.clone()).await?;
    let app = create_router(state);

    let addr: SocketAddr = config.server_addr().parse()?;
    tracing::info!(%addr, "Server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wires the billing service to PostgreSQL or, without a database URL, to
/// the in-memory store
async fn build_state(config: ApiConfig) -> anyhow::Result<AppState> {
    let Some(db_config) = config.database_config() else {
        tracing::warn!("API_DATABASE_URL not set; using the in-memory ledger");
        let (state, _master) = AppState::in_memory(config).map_err(|e| anyhow!(e))?;
        return Ok(state);
    };

    let settings = config.billing_settings().map_err(|e| anyhow!(e))?;

    tracing::info!("Connecting to database...");
    let pool = create_pool(db_config).await.context("database connection failed")?;
    run_migrations(&pool).await.context("migrations failed")?;
    tracing::info!("Database ready");

    let store = Arc::new(PgLedgerStore::new(pool.clone()));
    let master = Arc::new(PgMasterData::new(pool));
    let (billing, worker) = BillingService::new(store, master, settings);
    if worker.is_some() {
        tracing::info!("Analytics worker started");
    }

    Ok(AppState::new(billing, config))
}

fn init_tracing(config: &ApiConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Waits for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
