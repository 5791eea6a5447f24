//! Analytics handlers

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::NaiveDate;

use domain_billing::{
    DailySalesAnalytics, DayRollup, Forecast, Principal, RevenueTrend, ServiceRevenuePoint,
};

use crate::auth::require_admin;
use crate::dto::analytics::*;
use crate::error::ApiError;
use crate::handlers::run_detached;
use crate::AppState;

/// Replays one day's rollup
pub async fn rebuild_daily(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<DailySalesAnalytics>, ApiError> {
    let billing = state.billing.clone();
    let daily = run_detached(state.config.request_timeout(), async move {
        billing.rebuild_daily_analytics(date).await
    })
    .await?;
    Ok(Json(daily))
}

/// Replays every day of `?from&to`; admin only
pub async fn rebuild_range(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<Vec<DailySalesAnalytics>>, ApiError> {
    require_admin(&principal, "rebuilding analytics")?;

    let billing = state.billing.clone();
    let rebuilt = run_detached(state.config.request_timeout(), async move {
        billing.rebuild_analytics_range(range.from, range.to).await
    })
    .await?;
    tracing::info!(from = %range.from, to = %range.to, days = rebuilt.len(), "Analytics range rebuilt");
    Ok(Json(rebuilt))
}

pub async fn daily_range(
    State(state): State<AppState>,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<Vec<DailySalesAnalytics>>, ApiError> {
    Ok(Json(state.billing.daily_analytics(range.from, range.to).await?))
}

/// One day with its service and category breakdowns
pub async fn day(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<DayRollup>, ApiError> {
    Ok(Json(state.billing.day_analytics(date).await?))
}

pub async fn service_range(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<Vec<ServiceRevenuePoint>>, ApiError> {
    Ok(Json(
        state
            .billing
            .service_analytics(&service_name, range.from, range.to)
            .await?,
    ))
}

pub async fn trend(
    State(state): State<AppState>,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<RevenueTrend>, ApiError> {
    Ok(Json(state.billing.revenue_trend(range.from, range.to).await?))
}

/// Clinic or per-service revenue forecast
pub async fn forecast(
    State(state): State<AppState>,
    Query(query): Query<ForecastQuery>,
) -> Result<Json<Forecast>, ApiError> {
    let forecast = match &query.service {
        Some(service) => {
            state
                .billing
                .service_revenue_forecast(service, query.from, query.to, query.horizon_days)
                .await?
        }
        None => {
            state
                .billing
                .revenue_forecast(query.from, query.to, query.horizon_days)
                .await?
        }
    };
    Ok(Json(forecast))
}
