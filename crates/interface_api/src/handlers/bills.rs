//! Bill handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use core_kernel::BillId;
use domain_billing::{
    Bill, BillWithServices, CreateBillCommand, Page, PaymentHistory, Principal, SettlePaymentCommand,
    SettlementOutcome, UpdateBillCommand,
};

use crate::auth::require_admin;
use crate::dto::bills::*;
use crate::error::ApiError;
use crate::handlers::run_detached;
use crate::AppState;

/// Creates a bill for a medical documentation record
#[instrument(skip_all, fields(user = %principal.id))]
pub async fn create_bill(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<CreateBillRequest>,
) -> Result<(StatusCode, Json<BillWithServices>), ApiError> {
    request.validate()?;
    let command = CreateBillCommand::from(request);

    let billing = state.billing.clone();
    let created = run_detached(state.config.request_timeout(), async move {
        billing.create_bill(command, &principal).await
    })
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Edits a bill's lines, discount, fee or notes
#[instrument(skip_all, fields(bill_id = %id, user = %principal.id))]
pub async fn update_bill(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateBillRequest>,
) -> Result<Json<BillWithServices>, ApiError> {
    request.validate()?;
    let command = UpdateBillCommand::from(request);

    let billing = state.billing.clone();
    let updated = run_detached(state.config.request_timeout(), async move {
        billing.update_bill(BillId::from(id), command, &principal).await
    })
    .await?;

    Ok(Json(updated))
}

pub async fn get_bill(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BillWithServices>, ApiError> {
    Ok(Json(state.billing.get_bill(BillId::from(id)).await?))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PaymentHistory>>, ApiError> {
    Ok(Json(state.billing.bill_payments(BillId::from(id)).await?))
}

/// Lists bills newest first, one keyset page at a time
pub async fn list_bills(
    State(state): State<AppState>,
    Query(query): Query<ListBillsQuery>,
) -> Result<Json<Page<Bill>>, ApiError> {
    let page = state
        .billing
        .list_bills(&query.filter(), &query.page_request())
        .await?;
    Ok(Json(page))
}

/// Applies one payment increment
#[instrument(skip_all, fields(bill_id = %id, user = %principal.id))]
pub async fn settle_payment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(request): Json<SettlePaymentRequest>,
) -> Result<(StatusCode, Json<SettlementOutcome>), ApiError> {
    request.validate()?;
    let command = SettlePaymentCommand::from(request);

    let billing = state.billing.clone();
    let outcome = run_detached(state.config.request_timeout(), async move {
        billing.settle_payment(BillId::from(id), command, &principal).await
    })
    .await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Archives a bill (admin only)
#[instrument(skip_all, fields(bill_id = %id, user = %principal.id))]
pub async fn archive_bill(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<ArchiveResponse>, ApiError> {
    require_admin(&principal, "archiving a bill")?;

    let billing = state.billing.clone();
    let bill = run_detached(state.config.request_timeout(), async move {
        billing.archive_bill(BillId::from(id), &principal).await
    })
    .await?;

    Ok(Json(ArchiveResponse {
        id: bill.id.into(),
        is_archived: bill.is_archived,
        archived_at: bill.archived_at,
    }))
}
