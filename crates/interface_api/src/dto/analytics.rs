//! Analytics DTOs

use chrono::NaiveDate;
use serde::Deserialize;

/// `?from=YYYY-MM-DD&to=YYYY-MM-DD`
#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

fn default_horizon() -> u32 {
    7
}

/// Query string of `GET /analytics/forecast`
#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(default = "default_horizon")]
    pub horizon_days: u32,
    /// Forecast one service's revenue instead of the clinic total
    pub service: Option<String>,
}
