//! Revenue trend and forecast
//!
//! Ordinary least squares over daily revenue, with `x` the number of days
//! since the first point. Only days that have a stored rollup count as
//! points; missing days are not filled with zeros.

use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::Money;

/// Fewest points a fit is attempted on
pub const MIN_FORECAST_POINTS: usize = 7;

/// Relative slope below which revenue counts as flat
const STABLE_SLOPE_RATIO: f64 = 0.01;

/// Revenue on one date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenuePoint {
    pub date: NaiveDate,
    pub revenue: Money,
}

impl RevenuePoint {
    pub fn new(date: NaiveDate, revenue: Money) -> Self {
        Self { date, revenue }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// A fitted line `revenue = intercept + slope * day`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub mean: f64,
}

impl LinearFit {
    pub fn at(&self, day: f64) -> f64 {
        self.intercept + self.slope * day
    }

    pub fn direction(&self) -> TrendDirection {
        if self.slope.abs() < self.mean.abs() * STABLE_SLOPE_RATIO || self.slope == 0.0 {
            TrendDirection::Stable
        } else if self.slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        }
    }
}

/// Result of a trend analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RevenueTrend {
    InsufficientData {
        points: usize,
        required: usize,
    },
    Computed {
        direction: TrendDirection,
        slope_per_day: Decimal,
        average_daily_revenue: Money,
        points: usize,
    },
}

/// One projected day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub projected_revenue: Money,
}

/// Result of a forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Forecast {
    InsufficientData {
        points: usize,
        required: usize,
    },
    Projected {
        direction: TrendDirection,
        slope_per_day: Decimal,
        projections: Vec<ForecastPoint>,
    },
}

impl Forecast {
    pub fn is_insufficient(&self) -> bool {
        matches!(self, Forecast::InsufficientData { .. })
    }
}

fn day_offset(origin: NaiveDate, date: NaiveDate) -> f64 {
    (date - origin).num_days() as f64
}

/// Fits a line through the points, or `None` below the minimum
pub fn fit(points: &[RevenuePoint]) -> Option<LinearFit> {
    if points.len() < MIN_FORECAST_POINTS {
        return None;
    }

    let origin = points.iter().map(|p| p.date).min()?;
    let xs: Vec<f64> = points.iter().map(|p| day_offset(origin, p.date)).collect();
    let ys: Vec<f64> = points
        .iter()
        .map(|p| p.revenue.amount().to_f64().unwrap_or(0.0))
        .collect();

    let n = points.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let covariance: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let variance: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();

    let slope = if variance == 0.0 { 0.0 } else { covariance / variance };

    Some(LinearFit {
        slope,
        intercept: mean_y - slope * mean_x,
        mean: mean_y,
    })
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(2)
}

pub fn analyze_trend(points: &[RevenuePoint]) -> RevenueTrend {
    match fit(points) {
        None => RevenueTrend::InsufficientData {
            points: points.len(),
            required: MIN_FORECAST_POINTS,
        },
        Some(line) => RevenueTrend::Computed {
            direction: line.direction(),
            slope_per_day: to_decimal(line.slope),
            average_daily_revenue: Money::new(to_decimal(line.mean)),
            points: points.len(),
        },
    }
}

/// Projects `horizon_days` days past the last point, clamped at zero
pub fn forecast(points: &[RevenuePoint], horizon_days: u32) -> Forecast {
    let line = match fit(points) {
        Some(line) => line,
        None => {
            return Forecast::InsufficientData {
                points: points.len(),
                required: MIN_FORECAST_POINTS,
            }
        }
    };

    // fit() only succeeds on a non-empty slice
    let (Some(origin), Some(last)) = (
        points.iter().map(|p| p.date).min(),
        points.iter().map(|p| p.date).max(),
    ) else {
        return Forecast::InsufficientData {
            points: points.len(),
            required: MIN_FORECAST_POINTS,
        };
    };

    let projections = (1..=i64::from(horizon_days))
        .map(|ahead| {
            let date = last + Duration::days(ahead);
            let value = line.at(day_offset(origin, date)).max(0.0);
            ForecastPoint {
                date,
                projected_revenue: Money::new(to_decimal(value)),
            }
        })
        .collect();

    Forecast::Projected {
        direction: line.direction(),
        slope_per_day: to_decimal(line.slope),
        projections,
    }
}
