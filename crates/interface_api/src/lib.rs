//! HTTP API Layer
//!
//! This crate provides the REST API for the clinic billing ledger using Axum.
//!
//! # Architecture
//!
//! - **Handlers**: bills, settlement, analytics and audit-log endpoints
//! - **Middleware**: bearer-token authentication and per-request audit logging
//! - **DTOs**: request/response shapes and their validation
//! - **Error Handling**: [`error::ApiError`] maps domain errors to status codes
//!
//! Accepted writes run on a detached task and finish even if the client
//! disconnects or the request times out.
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_api::{create_router, AppState};
//!
//! let app = create_router(AppState::new(billing, config));
//! axum::serve(listener, app).await?;
//! ```

pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use domain_billing::{BillingService, InMemoryLedgerStore, InMemoryMasterData};

use crate::config::ApiConfig;
use crate::handlers::{analytics, audit, bills, health};
use crate::middleware::{audit_middleware, auth_middleware};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(billing: BillingService, config: ApiConfig) -> Self {
        Self {
            billing: Arc::new(billing),
            config,
        }
    }

    /// State backed by the in-memory store
    ///
    /// Used when no database URL is configured. The master data handle is
    /// returned so callers can seed documents and catalog services.
    pub fn in_memory(config: ApiConfig) -> Result<(Self, Arc<InMemoryMasterData>), String> {
        let settings = config.billing_settings()?;
        let master = Arc::new(InMemoryMasterData::new());
        let (billing, _worker) =
            BillingService::new(Arc::new(InMemoryLedgerStore::new()), master.clone(), settings);
        Ok((Self::new(billing, config), master))
    }
}

/// Creates the main API router
///
/// `/health` and `/health/ready` are public; everything under `/api/v1`
/// requires a bearer token.
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check));

    let bill_routes = Router::new()
        .route("/", post(bills::create_bill).get(bills::list_bills))
        .route("/:id", get(bills::get_bill).patch(bills::update_bill))
        .route("/:id/payments", get(bills::list_payments).post(bills::settle_payment))
        .route("/:id/archive", post(bills::archive_bill));

    let analytics_routes = Router::new()
        .route("/daily", get(analytics::daily_range))
        .route("/daily/:date", get(analytics::day))
        .route("/daily/:date/rebuild", post(analytics::rebuild_daily))
        .route("/rebuild", post(analytics::rebuild_range))
        .route("/services/:name", get(analytics::service_range))
        .route("/trend", get(analytics::trend))
        .route("/forecast", get(analytics::forecast));

    let audit_routes = Router::new()
        .route("/", delete(audit::batch_delete))
        .route("/:subject/:id", get(audit::history).delete(audit::delete_one));

    // auth is the outer layer so the audit line sees the principal
    let api_routes = Router::new()
        .nest("/bills", bill_routes)
        .nest("/analytics", analytics_routes)
        .nest("/audit-logs", audit_routes)
        .layer(axum_middleware::from_fn(audit_middleware))
        .layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
