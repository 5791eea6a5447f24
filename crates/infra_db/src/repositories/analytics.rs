//! Daily rollup queries

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;
use uuid::Uuid;

use core_kernel::{CategoryAnalyticsId, DailyAnalyticsId, Money, ServiceAnalyticsId, ServiceId};
use domain_billing::{CategoryDailyAnalytics, DailySalesAnalytics, ServiceDailyAnalytics, ServiceRevenuePoint};

use crate::error::DatabaseError;

const DAILY_COLUMNS: &str = "id, date, total_revenue, total_bills, paid_bills, partially_paid_bills, \
    unpaid_bills, average_bill_amount, created_at, updated_at";

const SERVICE_COLUMNS: &str = "id, daily_analytics_id, service_id, service_name, service_category, \
    quantity_sold, total_revenue, average_price, created_at, updated_at";

const CATEGORY_COLUMNS: &str = "id, daily_analytics_id, category, quantity_sold, total_revenue, \
    average_price, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct DailyRow {
    pub id: Uuid,
    pub date: NaiveDate,
    pub total_revenue: Decimal,
    pub total_bills: i64,
    pub paid_bills: i64,
    pub partially_paid_bills: i64,
    pub unpaid_bills: i64,
    pub average_bill_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DailyRow> for DailySalesAnalytics {
    fn from(row: DailyRow) -> Self {
        DailySalesAnalytics {
            id: DailyAnalyticsId::from(row.id),
            date: row.date,
            total_revenue: Money::new(row.total_revenue),
            total_bills: row.total_bills,
            paid_bills: row.paid_bills,
            partially_paid_bills: row.partially_paid_bills,
            unpaid_bills: row.unpaid_bills,
            average_bill_amount: Money::new(row.average_bill_amount),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ServiceRow {
    pub id: Uuid,
    pub daily_analytics_id: Uuid,
    pub service_id: Option<Uuid>,
    pub service_name: String,
    pub service_category: String,
    pub quantity_sold: i64,
    pub total_revenue: Decimal,
    pub average_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ServiceRow> for ServiceDailyAnalytics {
    fn from(row: ServiceRow) -> Self {
        ServiceDailyAnalytics {
            id: ServiceAnalyticsId::from(row.id),
            daily_analytics_id: DailyAnalyticsId::from(row.daily_analytics_id),
            service_id: row.service_id.map(ServiceId::from),
            service_name: row.service_name,
            service_category: row.service_category,
            quantity_sold: row.quantity_sold,
            total_revenue: Money::new(row.total_revenue),
            average_price: Money::new(row.average_price),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CategoryRow {
    pub id: Uuid,
    pub daily_analytics_id: Uuid,
    pub category: String,
    pub quantity_sold: i64,
    pub total_revenue: Decimal,
    pub average_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CategoryRow> for CategoryDailyAnalytics {
    fn from(row: CategoryRow) -> Self {
        CategoryDailyAnalytics {
            id: CategoryAnalyticsId::from(row.id),
            daily_analytics_id: DailyAnalyticsId::from(row.daily_analytics_id),
            category: row.category,
            quantity_sold: row.quantity_sold,
            total_revenue: Money::new(row.total_revenue),
            average_price: Money::new(row.average_price),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ServiceHistoryRow {
    pub date: NaiveDate,
    pub service_id: Option<Uuid>,
    pub service_name: String,
    pub quantity_sold: i64,
    pub total_revenue: Decimal,
    pub average_price: Decimal,
}

impl From<ServiceHistoryRow> for ServiceRevenuePoint {
    fn from(row: ServiceHistoryRow) -> Self {
        ServiceRevenuePoint {
            date: row.date,
            service_id: row.service_id.map(ServiceId::from),
            service_name: row.service_name,
            quantity_sold: row.quantity_sold,
            total_revenue: Money::new(row.total_revenue),
            average_price: Money::new(row.average_price),
        }
    }
}

/// First key of the advisory lock taken while rebuilding a day
const ROLLUP_LOCK_NAMESPACE: i32 = 0x524c_5550;

/// Waits for the transaction-scoped advisory lock of one rollup date
///
/// Released when the enclosing transaction commits or rolls back.
pub async fn lock_rollup_day<'e>(db: impl PgExecutor<'e>, date: NaiveDate) -> Result<(), DatabaseError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
        .bind(ROLLUP_LOCK_NAMESPACE)
        .bind(date.num_days_from_ce())
        .execute(db)
        .await?;
    Ok(())
}

pub async fn find_daily<'e>(
    db: impl PgExecutor<'e>,
    date: NaiveDate,
) -> Result<Option<DailySalesAnalytics>, DatabaseError> {
    let sql = format!("SELECT {} FROM daily_sales_analytics WHERE date = $1", DAILY_COLUMNS);
    let row = sqlx::query_as::<_, DailyRow>(&sql)
        .bind(date)
        .fetch_optional(db)
        .await?;
    Ok(row.map(DailySalesAnalytics::from))
}

pub async fn services_of_day<'e>(
    db: impl PgExecutor<'e>,
    daily_id: DailyAnalyticsId,
) -> Result<Vec<ServiceDailyAnalytics>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM service_daily_analytics WHERE daily_analytics_id = $1 ORDER BY service_name",
        SERVICE_COLUMNS
    );
    let rows = sqlx::query_as::<_, ServiceRow>(&sql)
        .bind(Uuid::from(daily_id))
        .fetch_all(db)
        .await?;
    Ok(rows.into_iter().map(ServiceDailyAnalytics::from).collect())
}

pub async fn categories_of_day<'e>(
    db: impl PgExecutor<'e>,
    daily_id: DailyAnalyticsId,
) -> Result<Vec<CategoryDailyAnalytics>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM category_daily_analytics WHERE daily_analytics_id = $1 ORDER BY category",
        CATEGORY_COLUMNS
    );
    let rows = sqlx::query_as::<_, CategoryRow>(&sql)
        .bind(Uuid::from(daily_id))
        .fetch_all(db)
        .await?;
    Ok(rows.into_iter().map(CategoryDailyAnalytics::from).collect())
}

/// Inserts or refreshes the row for the day, returning the stored id
///
/// An existing row keeps its id and `created_at`.
pub async fn upsert_daily<'e>(
    db: impl PgExecutor<'e>,
    daily: &DailySalesAnalytics,
) -> Result<DailyAnalyticsId, DatabaseError> {
    let sql = format!(
        r#"
        INSERT INTO daily_sales_analytics ({})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (date) DO UPDATE SET
            total_revenue = EXCLUDED.total_revenue,
            total_bills = EXCLUDED.total_bills,
            paid_bills = EXCLUDED.paid_bills,
            partially_paid_bills = EXCLUDED.partially_paid_bills,
            unpaid_bills = EXCLUDED.unpaid_bills,
            average_bill_amount = EXCLUDED.average_bill_amount,
            updated_at = EXCLUDED.updated_at
        RETURNING id
        "#,
        DAILY_COLUMNS
    );
    let id = sqlx::query_scalar::<_, Uuid>(&sql)
        .bind(Uuid::from(daily.id))
        .bind(daily.date)
        .bind(daily.total_revenue.amount())
        .bind(daily.total_bills)
        .bind(daily.paid_bills)
        .bind(daily.partially_paid_bills)
        .bind(daily.unpaid_bills)
        .bind(daily.average_bill_amount.amount())
        .bind(daily.created_at)
        .bind(daily.updated_at)
        .fetch_one(db)
        .await?;
    Ok(DailyAnalyticsId::from(id))
}

pub async fn upsert_service<'e>(
    db: impl PgExecutor<'e>,
    daily_id: DailyAnalyticsId,
    row: &ServiceDailyAnalytics,
) -> Result<(), DatabaseError> {
    let sql = format!(
        r#"
        INSERT INTO service_daily_analytics ({})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (daily_analytics_id, service_name) DO UPDATE SET
            service_id = EXCLUDED.service_id,
            service_category = EXCLUDED.service_category,
            quantity_sold = EXCLUDED.quantity_sold,
            total_revenue = EXCLUDED.total_revenue,
            average_price = EXCLUDED.average_price,
            updated_at = EXCLUDED.updated_at
        "#,
        SERVICE_COLUMNS
    );
    sqlx::query(&sql)
        .bind(Uuid::from(row.id))
        .bind(Uuid::from(daily_id))
        .bind(row.service_id.map(Uuid::from))
        .bind(&row.service_name)
        .bind(&row.service_category)
        .bind(row.quantity_sold)
        .bind(row.total_revenue.amount())
        .bind(row.average_price.amount())
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn upsert_category<'e>(
    db: impl PgExecutor<'e>,
    daily_id: DailyAnalyticsId,
    row: &CategoryDailyAnalytics,
) -> Result<(), DatabaseError> {
    let sql = format!(
        r#"
        INSERT INTO category_daily_analytics ({})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (daily_analytics_id, category) DO UPDATE SET
            quantity_sold = EXCLUDED.quantity_sold,
            total_revenue = EXCLUDED.total_revenue,
            average_price = EXCLUDED.average_price,
            updated_at = EXCLUDED.updated_at
        "#,
        CATEGORY_COLUMNS
    );
    sqlx::query(&sql)
        .bind(Uuid::from(row.id))
        .bind(Uuid::from(daily_id))
        .bind(&row.category)
        .bind(row.quantity_sold)
        .bind(row.total_revenue.amount())
        .bind(row.average_price.amount())
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(db)
        .await?;
    Ok(())
}

/// Removes service rows of the day whose name is not in `keep`
pub async fn delete_services_except<'e>(
    db: impl PgExecutor<'e>,
    daily_id: DailyAnalyticsId,
    keep: &[String],
) -> Result<u64, DatabaseError> {
    let result = sqlx::query(
        "DELETE FROM service_daily_analytics WHERE daily_analytics_id = $1 AND NOT (service_name = ANY($2))",
    )
    .bind(Uuid::from(daily_id))
    .bind(keep)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

/// Removes category rows of the day whose category is not in `keep`
pub async fn delete_categories_except<'e>(
    db: impl PgExecutor<'e>,
    daily_id: DailyAnalyticsId,
    keep: &[String],
) -> Result<u64, DatabaseError> {
    let result = sqlx::query(
        "DELETE FROM category_daily_analytics WHERE daily_analytics_id = $1 AND NOT (category = ANY($2))",
    )
    .bind(Uuid::from(daily_id))
    .bind(keep)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

/// Daily rows in `[start, end]`, oldest first
pub async fn daily_between<'e>(
    db: impl PgExecutor<'e>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<DailySalesAnalytics>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM daily_sales_analytics WHERE date BETWEEN $1 AND $2 ORDER BY date",
        DAILY_COLUMNS
    );
    let rows = sqlx::query_as::<_, DailyRow>(&sql)
        .bind(start)
        .bind(end)
        .fetch_all(db)
        .await?;
    Ok(rows.into_iter().map(DailySalesAnalytics::from).collect())
}

/// One service's rows in `[start, end]`, oldest first
pub async fn service_between<'e>(
    db: impl PgExecutor<'e>,
    service_name: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<ServiceRevenuePoint>, DatabaseError> {
    let rows = sqlx::query_as::<_, ServiceHistoryRow>(
        r#"
        SELECT d.date, s.service_id, s.service_name, s.quantity_sold, s.total_revenue, s.average_price
        FROM service_daily_analytics s
        JOIN daily_sales_analytics d ON d.id = s.daily_analytics_id
        WHERE s.service_name = $1 AND d.date BETWEEN $2 AND $3
        ORDER BY d.date
        "#,
    )
    .bind(service_name)
    .bind(start)
    .bind(end)
    .fetch_all(db)
    .await?;
    Ok(rows.into_iter().map(ServiceRevenuePoint::from).collect())
}
