//! Daily sales rollups
//!
//! Rollups are derived data: [`AnalyticsRollupEngine::rebuild_day`] replays
//! one clinic-local day from bills, line items and payments and overwrites
//! whatever was stored for that day. Replaying twice with no writes in
//! between leaves the stored rows untouched, ids and timestamps included.
//!
//! Revenue is cash received: a bill created on day D and paid on day D+1
//! contributes its payment to D+1.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use core_kernel::{
    CategoryAnalyticsId, ClinicTimezone, DailyAnalyticsId, DateRange, Money, ServiceAnalyticsId,
    ServiceId,
};

use crate::bill::BillWithServices;
use crate::error::BillingError;
use crate::forecast::{self, Forecast, RevenuePoint, RevenueTrend};
use crate::ports::LedgerStore;

/// Longest forecast horizon accepted
pub const MAX_FORECAST_HORIZON_DAYS: u32 = 90;

/// One day's sales summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySalesAnalytics {
    pub id: DailyAnalyticsId,
    pub date: NaiveDate,
    pub total_revenue: Money,
    pub total_bills: i64,
    pub paid_bills: i64,
    pub partially_paid_bills: i64,
    pub unpaid_bills: i64,
    pub average_bill_amount: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One service's sales on one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDailyAnalytics {
    pub id: ServiceAnalyticsId,
    pub daily_analytics_id: DailyAnalyticsId,
    pub service_id: Option<ServiceId>,
    pub service_name: String,
    pub service_category: String,
    pub quantity_sold: i64,
    pub total_revenue: Money,
    pub average_price: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One category's sales on one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDailyAnalytics {
    pub id: CategoryAnalyticsId,
    pub daily_analytics_id: DailyAnalyticsId,
    pub category: String,
    pub quantity_sold: i64,
    pub total_revenue: Money,
    pub average_price: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A service's figures on one date, for range queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRevenuePoint {
    pub date: NaiveDate,
    pub service_id: Option<ServiceId>,
    pub service_name: String,
    pub quantity_sold: i64,
    pub total_revenue: Money,
    pub average_price: Money,
}

/// Everything stored for one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRollup {
    pub daily: DailySalesAnalytics,
    pub services: Vec<ServiceDailyAnalytics>,
    pub categories: Vec<CategoryDailyAnalytics>,
}

/// Per-service totals before they are given storage identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFigures {
    pub service_id: Option<ServiceId>,
    pub service_name: String,
    pub service_category: String,
    pub quantity_sold: i64,
    pub total_revenue: Money,
}

impl ServiceFigures {
    pub fn average_price(&self) -> Money {
        average(self.total_revenue, self.quantity_sold)
    }
}

/// Per-category totals before they are given storage identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryFigures {
    pub category: String,
    pub quantity_sold: i64,
    pub total_revenue: Money,
}

impl CategoryFigures {
    pub fn average_price(&self) -> Money {
        average(self.total_revenue, self.quantity_sold)
    }
}

fn average(total: Money, count: i64) -> Money {
    if count <= 0 {
        return Money::zero();
    }
    total.divide(Decimal::from(count)).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ServiceKey {
    Id(ServiceId),
    Name(String),
}

/// The computed figures of one day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayFigures {
    pub date: NaiveDate,
    pub total_revenue: Money,
    pub total_bills: i64,
    pub paid_bills: i64,
    pub partially_paid_bills: i64,
    pub unpaid_bills: i64,
    pub average_bill_amount: Money,
    pub services: Vec<ServiceFigures>,
    pub categories: Vec<CategoryFigures>,
}

impl DayFigures {
    /// Computes a day's figures from the bills created on it and the payments
    /// received on it
    pub fn compute(date: NaiveDate, bills: &[BillWithServices], payments_total: Money) -> Self {
        let mut paid_bills = 0;
        let mut partially_paid_bills = 0;
        let mut unpaid_bills = 0;

        for entry in bills {
            let bill = &entry.bill;
            if bill.amount_paid() >= bill.total_amount() {
                paid_bills += 1;
            } else if bill.amount_paid().is_positive() {
                partially_paid_bills += 1;
            } else if bill.amount_paid().is_zero() {
                unpaid_bills += 1;
            }
        }

        let total_bills = bills.len() as i64;
        let billed: Money = bills.iter().map(|b| b.bill.total_amount()).sum();

        Self {
            date,
            total_revenue: payments_total,
            total_bills,
            paid_bills,
            partially_paid_bills,
            unpaid_bills,
            average_bill_amount: average(billed, total_bills),
            services: group_services(bills),
            categories: group_categories(bills),
        }
    }
}

fn group_services(bills: &[BillWithServices]) -> Vec<ServiceFigures> {
    let mut by_key: BTreeMap<ServiceKey, ServiceFigures> = BTreeMap::new();

    for line in bills.iter().flat_map(|b| b.services.iter()) {
        let key = match line.service_id {
            Some(id) => ServiceKey::Id(id),
            None => ServiceKey::Name(line.service_name.clone()),
        };
        let figures = by_key.entry(key).or_insert_with(|| ServiceFigures {
            service_id: line.service_id,
            service_name: line.service_name.clone(),
            service_category: line.service_category.clone(),
            quantity_sold: 0,
            total_revenue: Money::zero(),
        });
        figures.quantity_sold += i64::from(line.quantity);
        figures.total_revenue = figures.total_revenue + line.subtotal;
    }

    // Stored rows are unique per service name within a day
    let mut by_name: BTreeMap<String, ServiceFigures> = BTreeMap::new();
    for figures in by_key.into_values() {
        match by_name.get_mut(&figures.service_name) {
            Some(existing) => {
                existing.quantity_sold += figures.quantity_sold;
                existing.total_revenue = existing.total_revenue + figures.total_revenue;
                if existing.service_id.is_none() {
                    existing.service_id = figures.service_id;
                }
            }
            None => {
                by_name.insert(figures.service_name.clone(), figures);
            }
        }
    }

    by_name.into_values().collect()
}

fn group_categories(bills: &[BillWithServices]) -> Vec<CategoryFigures> {
    let mut by_category: BTreeMap<String, CategoryFigures> = BTreeMap::new();

    for line in bills.iter().flat_map(|b| b.services.iter()) {
        let figures = by_category
            .entry(line.service_category.clone())
            .or_insert_with(|| CategoryFigures {
                category: line.service_category.clone(),
                quantity_sold: 0,
                total_revenue: Money::zero(),
            });
        figures.quantity_sold += i64::from(line.quantity);
        figures.total_revenue = figures.total_revenue + line.subtotal;
    }

    by_category.into_values().collect()
}

impl DayRollup {
    /// Gives computed figures storage identity
    ///
    /// Rows that already exist keep their id and `created_at`; `updated_at`
    /// moves only when a value differs from what is stored.
    pub fn reconcile(figures: DayFigures, existing: Option<&DayRollup>, now: DateTime<Utc>) -> Self {
        let previous = existing.map(|r| &r.daily);

        let mut daily = DailySalesAnalytics {
            id: previous.map(|d| d.id).unwrap_or_else(DailyAnalyticsId::new_v7),
            date: figures.date,
            total_revenue: figures.total_revenue,
            total_bills: figures.total_bills,
            paid_bills: figures.paid_bills,
            partially_paid_bills: figures.partially_paid_bills,
            unpaid_bills: figures.unpaid_bills,
            average_bill_amount: figures.average_bill_amount,
            created_at: previous.map(|d| d.created_at).unwrap_or(now),
            updated_at: now,
        };
        if let Some(previous) = previous {
            if same_daily_values(previous, &daily) {
                daily.updated_at = previous.updated_at;
            }
        }

        let daily_id = daily.id;
        let services = figures
            .services
            .into_iter()
            .map(|f| {
                let stored = existing.and_then(|r| {
                    r.services.iter().find(|s| s.service_name == f.service_name)
                });
                let mut row = ServiceDailyAnalytics {
                    id: stored.map(|s| s.id).unwrap_or_else(ServiceAnalyticsId::new_v7),
                    daily_analytics_id: daily_id,
                    average_price: f.average_price(),
                    service_id: f.service_id,
                    service_name: f.service_name,
                    service_category: f.service_category,
                    quantity_sold: f.quantity_sold,
                    total_revenue: f.total_revenue,
                    created_at: stored.map(|s| s.created_at).unwrap_or(now),
                    updated_at: now,
                };
                if let Some(stored) = stored {
                    if same_service_values(stored, &row) {
                        row.updated_at = stored.updated_at;
                    }
                }
                row
            })
            .collect();

        let categories = figures
            .categories
            .into_iter()
            .map(|f| {
                let stored = existing.and_then(|r| r.categories.iter().find(|c| c.category == f.category));
                let mut row = CategoryDailyAnalytics {
                    id: stored.map(|c| c.id).unwrap_or_else(CategoryAnalyticsId::new_v7),
                    daily_analytics_id: daily_id,
                    average_price: f.average_price(),
                    category: f.category,
                    quantity_sold: f.quantity_sold,
                    total_revenue: f.total_revenue,
                    created_at: stored.map(|c| c.created_at).unwrap_or(now),
                    updated_at: now,
                };
                if let Some(stored) = stored {
                    if same_category_values(stored, &row) {
                        row.updated_at = stored.updated_at;
                    }
                }
                row
            })
            .collect();

        Self {
            daily,
            services,
            categories,
        }
    }
}

fn same_daily_values(a: &DailySalesAnalytics, b: &DailySalesAnalytics) -> bool {
    a.total_revenue == b.total_revenue
        && a.total_bills == b.total_bills
        && a.paid_bills == b.paid_bills
        && a.partially_paid_bills == b.partially_paid_bills
        && a.unpaid_bills == b.unpaid_bills
        && a.average_bill_amount == b.average_bill_amount
}

fn same_service_values(a: &ServiceDailyAnalytics, b: &ServiceDailyAnalytics) -> bool {
    a.service_id == b.service_id
        && a.service_category == b.service_category
        && a.quantity_sold == b.quantity_sold
        && a.total_revenue == b.total_revenue
        && a.average_price == b.average_price
}

fn same_category_values(a: &CategoryDailyAnalytics, b: &CategoryDailyAnalytics) -> bool {
    a.quantity_sold == b.quantity_sold
        && a.total_revenue == b.total_revenue
        && a.average_price == b.average_price
}

/// Longest range a single rebuild request may replay
pub const MAX_REBUILD_DAYS: i64 = 366;

/// Rebuilds and reads daily rollups
#[derive(Clone)]
pub struct AnalyticsRollupEngine {
    store: Arc<dyn LedgerStore>,
    timezone: ClinicTimezone,
}

impl AnalyticsRollupEngine {
    pub fn new(store: Arc<dyn LedgerStore>, timezone: ClinicTimezone) -> Self {
        Self { store, timezone }
    }

    pub fn timezone(&self) -> ClinicTimezone {
        self.timezone
    }

    /// The clinic-local date of a UTC instant
    pub fn clinic_date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.timezone.local_date(at)
    }

    /// Replays one clinic-local day and stores the result
    #[instrument(skip(self), fields(timezone = self.timezone.name()))]
    pub async fn rebuild_day(&self, date: NaiveDate) -> Result<DailySalesAnalytics, BillingError> {
        let window = self.timezone.day_window(date)?;

        // held until commit or drop; a concurrent rebuild of `date` waits here
        let mut rollup_tx = self.store.begin_rollup(date).await?;

        let bills = rollup_tx.bills_created_in(&window).await?;
        let payments_total = rollup_tx.payments_total_in(&window).await?;
        let figures = DayFigures::compute(date, &bills, payments_total);

        let existing = rollup_tx.stored_rollup().await?;
        let rollup = DayRollup::reconcile(figures, existing.as_ref(), Utc::now());

        if existing.as_ref() == Some(&rollup) {
            debug!(%date, "Rollup unchanged");
            return Ok(rollup.daily);
        }

        let saved = rollup_tx.save(&rollup).await?;
        rollup_tx.commit().await?;
        info!(
            %date,
            total_revenue = %saved.daily.total_revenue,
            total_bills = saved.daily.total_bills,
            services = saved.services.len(),
            categories = saved.categories.len(),
            "Daily analytics rebuilt"
        );
        Ok(saved.daily)
    }

    /// Rebuilds every day in the range, oldest first
    ///
    /// Ranges longer than [`MAX_REBUILD_DAYS`] are rejected.
    #[instrument(skip(self, range), fields(start = %range.start, end = %range.end))]
    pub async fn rebuild_range(&self, range: &DateRange) -> Result<Vec<DailySalesAnalytics>, BillingError> {
        if range.days() > MAX_REBUILD_DAYS {
            return Err(BillingError::validation(format!(
                "rebuild range covers {} days; at most {} allowed",
                range.days(),
                MAX_REBUILD_DAYS
            )));
        }
        let mut rebuilt = Vec::with_capacity(range.days().max(0) as usize);
        for date in range.iter() {
            rebuilt.push(self.rebuild_day(date).await?);
        }
        Ok(rebuilt)
    }

    /// Stored daily rows in the range, oldest first
    pub async fn daily_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailySalesAnalytics>, BillingError> {
        let range = DateRange::new(from, to)?;
        Ok(self.store.daily_analytics_range(&range).await?)
    }

    /// Everything stored for one day
    pub async fn day(&self, date: NaiveDate) -> Result<DayRollup, BillingError> {
        self.store
            .day_rollup(date)
            .await?
            .ok_or_else(|| BillingError::NotFound {
                entity: "DailySalesAnalytics".to_string(),
                id: date.to_string(),
            })
    }

    /// One service's stored rows in the range, oldest first
    pub async fn service_range(
        &self,
        service_name: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ServiceRevenuePoint>, BillingError> {
        let range = DateRange::new(from, to)?;
        Ok(self.store.service_daily_history(service_name, &range).await?)
    }

    /// Direction of daily revenue over the range
    pub async fn revenue_trend(&self, from: NaiveDate, to: NaiveDate) -> Result<RevenueTrend, BillingError> {
        let points = self.revenue_points(from, to).await?;
        Ok(forecast::analyze_trend(&points))
    }

    /// Projects daily revenue `horizon_days` past the range
    pub async fn revenue_forecast(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        horizon_days: u32,
    ) -> Result<Forecast, BillingError> {
        check_horizon(horizon_days)?;
        let points = self.revenue_points(from, to).await?;
        Ok(forecast::forecast(&points, horizon_days))
    }

    /// Projects one service's daily revenue `horizon_days` past the range
    pub async fn service_revenue_forecast(
        &self,
        service_name: &str,
        from: NaiveDate,
        to: NaiveDate,
        horizon_days: u32,
    ) -> Result<Forecast, BillingError> {
        check_horizon(horizon_days)?;
        let points: Vec<RevenuePoint> = self
            .service_range(service_name, from, to)
            .await?
            .into_iter()
            .map(|p| RevenuePoint::new(p.date, p.total_revenue))
            .collect();
        Ok(forecast::forecast(&points, horizon_days))
    }

    async fn revenue_points(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<RevenuePoint>, BillingError> {
        Ok(self
            .daily_range(from, to)
            .await?
            .into_iter()
            .map(|d| RevenuePoint::new(d.date, d.total_revenue))
            .collect())
    }
}

fn check_horizon(horizon_days: u32) -> Result<(), BillingError> {
    if horizon_days == 0 || horizon_days > MAX_FORECAST_HORIZON_DAYS {
        return Err(BillingError::validation(format!(
            "forecast horizon must be between 1 and {} days",
            MAX_FORECAST_HORIZON_DAYS
        )));
    }
    Ok(())
}
