//! Bill, line item and payment queries
//!
//! Every function takes an executor so the same SQL runs against the pool
//! for reads and against an open transaction inside a unit of work.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgExecutor;
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::str::FromStr;
use uuid::Uuid;

use core_kernel::{BillId, BilledServiceId, DocumentId, Money, PaymentHistoryId, Rate, ServiceId};
use domain_billing::pagination::Seek;
use domain_billing::{
    Bill, BillFilter, BillTotals, BilledService, Direction, DiscountKind, PaymentHistory,
    SeniorPwdDiscount,
};

use crate::error::DatabaseError;

const BILL_COLUMNS: &str = "id, medical_documentation_id, total_amount, amount_paid, balance, \
    payment_status, is_senior_pwd_discount_applied, discount_kind, discount_rate, \
    discount_id_number, consultation_fee, notes, last_updated_by_name, last_updated_by_role, \
    is_archived, archived_at, created_at, updated_at";

const LINE_COLUMNS: &str = "id, bill_id, service_id, service_name, service_category, \
    service_price_at_time, quantity, subtotal, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, bill_id, amount_paid, payment_method, notes, \
    recorded_by_name, recorded_by_role, created_at";

/// Database row for a bill
#[derive(Debug, Clone, FromRow)]
pub struct BillRow {
    pub id: Uuid,
    pub medical_documentation_id: Uuid,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub balance: Decimal,
    pub payment_status: String,
    pub is_senior_pwd_discount_applied: bool,
    pub discount_kind: Option<String>,
    pub discount_rate: Decimal,
    pub discount_id_number: Option<String>,
    pub consultation_fee: Decimal,
    pub notes: Option<String>,
    pub last_updated_by_name: Option<String>,
    pub last_updated_by_role: Option<String>,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BillRow> for Bill {
    type Error = DatabaseError;

    /// Balance and status are re-derived from the two stored amounts; the
    /// stored copies exist for filtering.
    fn try_from(row: BillRow) -> Result<Self, Self::Error> {
        let discount = if row.is_senior_pwd_discount_applied {
            let kind = row
                .discount_kind
                .as_deref()
                .map(DiscountKind::from_str)
                .transpose()
                .map_err(DatabaseError::SerializationError)?
                .unwrap_or(DiscountKind::Senior);
            Some(SeniorPwdDiscount {
                kind,
                rate: Rate::from_percentage(row.discount_rate),
                id_number: row.discount_id_number.unwrap_or_default(),
            })
        } else {
            None
        };

        Ok(Bill {
            id: BillId::from(row.id),
            medical_documentation_id: DocumentId::from(row.medical_documentation_id),
            totals: BillTotals::new(Money::new(row.total_amount), Money::new(row.amount_paid)),
            discount,
            consultation_fee: Money::new(row.consultation_fee),
            notes: row.notes,
            last_updated_by_name: row.last_updated_by_name,
            last_updated_by_role: row.last_updated_by_role,
            is_archived: row.is_archived,
            archived_at: row.archived_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database row for a line item
#[derive(Debug, Clone, FromRow)]
pub struct BilledServiceRow {
    pub id: Uuid,
    pub bill_id: Uuid,
    pub service_id: Option<Uuid>,
    pub service_name: String,
    pub service_category: String,
    pub service_price_at_time: Decimal,
    pub quantity: i32,
    pub subtotal: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BilledServiceRow> for BilledService {
    fn from(row: BilledServiceRow) -> Self {
        BilledService {
            id: BilledServiceId::from(row.id),
            bill_id: BillId::from(row.bill_id),
            service_id: row.service_id.map(ServiceId::from),
            service_name: row.service_name,
            service_category: row.service_category,
            service_price_at_time: Money::new(row.service_price_at_time),
            quantity: row.quantity,
            subtotal: Money::new(row.subtotal),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Database row for one payment increment
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub bill_id: Uuid,
    pub amount_paid: Decimal,
    pub payment_method: String,
    pub notes: Option<String>,
    pub recorded_by_name: String,
    pub recorded_by_role: String,
    pub created_at: DateTime<Utc>,
}

impl From<PaymentRow> for PaymentHistory {
    fn from(row: PaymentRow) -> Self {
        PaymentHistory {
            id: PaymentHistoryId::from(row.id),
            bill_id: BillId::from(row.bill_id),
            amount_paid: Money::new(row.amount_paid),
            payment_method: row.payment_method,
            notes: row.notes,
            recorded_by_name: row.recorded_by_name,
            recorded_by_role: row.recorded_by_role,
            created_at: row.created_at,
        }
    }
}

/// Loads a bill, optionally taking its row lock
pub async fn find_bill<'e>(
    db: impl PgExecutor<'e>,
    id: BillId,
    for_update: bool,
) -> Result<Option<Bill>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM bills WHERE id = $1{}",
        BILL_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, BillRow>(&sql)
        .bind(Uuid::from(id))
        .fetch_optional(db)
        .await?
        .map(Bill::try_from)
        .transpose()
}

pub async fn bill_for_document<'e>(
    db: impl PgExecutor<'e>,
    document_id: DocumentId,
) -> Result<Option<BillId>, DatabaseError> {
    let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM bills WHERE medical_documentation_id = $1")
        .bind(Uuid::from(document_id))
        .fetch_optional(db)
        .await?;
    Ok(id.map(BillId::from))
}

pub async fn insert_bill<'e>(db: impl PgExecutor<'e>, bill: &Bill) -> Result<(), DatabaseError> {
    let sql = format!(
        "INSERT INTO bills ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        BILL_COLUMNS
    );
    sqlx::query(&sql)
        .bind(Uuid::from(bill.id))
        .bind(Uuid::from(bill.medical_documentation_id))
        .bind(bill.total_amount().amount())
        .bind(bill.amount_paid().amount())
        .bind(bill.balance().amount())
        .bind(bill.payment_status().as_str())
        .bind(bill.is_senior_pwd_discount_applied())
        .bind(bill.discount.as_ref().map(|d| d.kind.as_str()))
        .bind(bill.discount_rate())
        .bind(bill.discount.as_ref().map(|d| d.id_number.as_str()))
        .bind(bill.consultation_fee.amount())
        .bind(bill.notes.as_deref())
        .bind(bill.last_updated_by_name.as_deref())
        .bind(bill.last_updated_by_role.as_deref())
        .bind(bill.is_archived)
        .bind(bill.archived_at)
        .bind(bill.created_at)
        .bind(bill.updated_at)
        .execute(db)
        .await?;
    Ok(())
}

/// Writes every mutable column of a bill
pub async fn update_bill<'e>(db: impl PgExecutor<'e>, bill: &Bill) -> Result<(), DatabaseError> {
    let result = sqlx::query(
        r#"
        UPDATE bills SET
            total_amount = $2,
            amount_paid = $3,
            balance = $4,
            payment_status = $5,
            is_senior_pwd_discount_applied = $6,
            discount_kind = $7,
            discount_rate = $8,
            discount_id_number = $9,
            consultation_fee = $10,
            notes = $11,
            last_updated_by_name = $12,
            last_updated_by_role = $13,
            is_archived = $14,
            archived_at = $15,
            updated_at = $16
        WHERE id = $1
        "#,
    )
    .bind(Uuid::from(bill.id))
    .bind(bill.total_amount().amount())
    .bind(bill.amount_paid().amount())
    .bind(bill.balance().amount())
    .bind(bill.payment_status().as_str())
    .bind(bill.is_senior_pwd_discount_applied())
    .bind(bill.discount.as_ref().map(|d| d.kind.as_str()))
    .bind(bill.discount_rate())
    .bind(bill.discount.as_ref().map(|d| d.id_number.as_str()))
    .bind(bill.consultation_fee.amount())
    .bind(bill.notes.as_deref())
    .bind(bill.last_updated_by_name.as_deref())
    .bind(bill.last_updated_by_role.as_deref())
    .bind(bill.is_archived)
    .bind(bill.archived_at)
    .bind(bill.updated_at)
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("Bill", bill.id));
    }
    Ok(())
}

/// Filtered bills for one keyset seek, in seek order
pub async fn seek_bills<'e>(
    db: impl PgExecutor<'e>,
    filter: &BillFilter,
    seek: &Seek,
) -> Result<Vec<Bill>, DatabaseError> {
    let mut query: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT {} FROM bills WHERE TRUE", BILL_COLUMNS));

    if !filter.include_archived {
        query.push(" AND is_archived = FALSE");
    }
    if let Some(status) = filter.payment_status {
        query.push(" AND payment_status = ").push_bind(status.as_str());
    }
    if let Some(from) = filter.created_from {
        query.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
        query.push(" AND created_at < ").push_bind(to);
    }
    if let Some(anchor) = seek.anchor {
        let comparison = match seek.direction {
            Direction::Next => " AND (created_at, id) < (",
            Direction::Prev => " AND (created_at, id) > (",
        };
        query
            .push(comparison)
            .push_bind(anchor.created_at)
            .push(", ")
            .push_bind(anchor.id)
            .push(")");
    }
    query.push(match seek.direction {
        Direction::Next => " ORDER BY created_at DESC, id DESC",
        Direction::Prev => " ORDER BY created_at ASC, id ASC",
    });
    query.push(" LIMIT ").push_bind(seek.fetch_size() as i64);

    query
        .build_query_as::<BillRow>()
        .fetch_all(db)
        .await?
        .into_iter()
        .map(Bill::try_from)
        .collect()
}

/// Bills created in `[start, end)`, oldest first
pub async fn bills_created_between<'e>(
    db: impl PgExecutor<'e>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Bill>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM bills WHERE created_at >= $1 AND created_at < $2 ORDER BY created_at, id",
        BILL_COLUMNS
    );
    sqlx::query_as::<_, BillRow>(&sql)
        .bind(start)
        .bind(end)
        .fetch_all(db)
        .await?
        .into_iter()
        .map(Bill::try_from)
        .collect()
}

pub async fn billed_services_of<'e>(
    db: impl PgExecutor<'e>,
    bill_id: BillId,
) -> Result<Vec<BilledService>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM billed_services WHERE bill_id = $1 ORDER BY created_at, id",
        LINE_COLUMNS
    );
    let rows = sqlx::query_as::<_, BilledServiceRow>(&sql)
        .bind(Uuid::from(bill_id))
        .fetch_all(db)
        .await?;
    Ok(rows.into_iter().map(BilledService::from).collect())
}

/// Line items of several bills at once
pub async fn billed_services_of_bills<'e>(
    db: impl PgExecutor<'e>,
    bill_ids: &[Uuid],
) -> Result<Vec<BilledService>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM billed_services WHERE bill_id = ANY($1) ORDER BY created_at, id",
        LINE_COLUMNS
    );
    let rows = sqlx::query_as::<_, BilledServiceRow>(&sql)
        .bind(bill_ids)
        .fetch_all(db)
        .await?;
    Ok(rows.into_iter().map(BilledService::from).collect())
}

pub async fn find_billed_service<'e>(
    db: impl PgExecutor<'e>,
    id: BilledServiceId,
) -> Result<Option<BilledService>, DatabaseError> {
    let sql = format!("SELECT {} FROM billed_services WHERE id = $1", LINE_COLUMNS);
    let row = sqlx::query_as::<_, BilledServiceRow>(&sql)
        .bind(Uuid::from(id))
        .fetch_optional(db)
        .await?;
    Ok(row.map(BilledService::from))
}

pub async fn insert_billed_service<'e>(
    db: impl PgExecutor<'e>,
    line: &BilledService,
) -> Result<(), DatabaseError> {
    let sql = format!(
        "INSERT INTO billed_services ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        LINE_COLUMNS
    );
    sqlx::query(&sql)
        .bind(Uuid::from(line.id))
        .bind(Uuid::from(line.bill_id))
        .bind(line.service_id.map(Uuid::from))
        .bind(&line.service_name)
        .bind(&line.service_category)
        .bind(line.service_price_at_time.amount())
        .bind(line.quantity)
        .bind(line.subtotal.amount())
        .bind(line.created_at)
        .bind(line.updated_at)
        .execute(db)
        .await?;
    Ok(())
}

/// Writes a line's quantity and subtotal; the price snapshot never changes
pub async fn update_billed_service<'e>(
    db: impl PgExecutor<'e>,
    line: &BilledService,
) -> Result<(), DatabaseError> {
    let result = sqlx::query(
        "UPDATE billed_services SET quantity = $2, subtotal = $3, updated_at = $4 WHERE id = $1",
    )
    .bind(Uuid::from(line.id))
    .bind(line.quantity)
    .bind(line.subtotal.amount())
    .bind(line.updated_at)
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("BilledService", line.id));
    }
    Ok(())
}

pub async fn delete_billed_service<'e>(
    db: impl PgExecutor<'e>,
    id: BilledServiceId,
) -> Result<(), DatabaseError> {
    let result = sqlx::query("DELETE FROM billed_services WHERE id = $1")
        .bind(Uuid::from(id))
        .execute(db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("BilledService", id));
    }
    Ok(())
}

pub async fn insert_payment<'e>(
    db: impl PgExecutor<'e>,
    payment: &PaymentHistory,
) -> Result<(), DatabaseError> {
    let sql = format!(
        "INSERT INTO payment_history ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        PAYMENT_COLUMNS
    );
    sqlx::query(&sql)
        .bind(Uuid::from(payment.id))
        .bind(Uuid::from(payment.bill_id))
        .bind(payment.amount_paid.amount())
        .bind(&payment.payment_method)
        .bind(payment.notes.as_deref())
        .bind(&payment.recorded_by_name)
        .bind(&payment.recorded_by_role)
        .bind(payment.created_at)
        .execute(db)
        .await?;
    Ok(())
}

/// A bill's payments, oldest first
pub async fn payments_of<'e>(
    db: impl PgExecutor<'e>,
    bill_id: BillId,
) -> Result<Vec<PaymentHistory>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM payment_history WHERE bill_id = $1 ORDER BY created_at, id",
        PAYMENT_COLUMNS
    );
    let rows = sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(Uuid::from(bill_id))
        .fetch_all(db)
        .await?;
    Ok(rows.into_iter().map(PaymentHistory::from).collect())
}

/// Sum of payment increments recorded in `[start, end)`
pub async fn payments_total_between<'e>(
    db: impl PgExecutor<'e>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Money, DatabaseError> {
    let total = sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(amount_paid), 0) FROM payment_history WHERE created_at >= $1 AND created_at < $2",
    )
    .bind(start)
    .bind(end)
    .fetch_one(db)
    .await?;
    Ok(Money::new(total))
}
