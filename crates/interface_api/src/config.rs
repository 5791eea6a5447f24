//! API configuration

use serde::Deserialize;
use std::time::Duration;

use core_kernel::ClinicTimezone;
use domain_billing::{AnalyticsMode, BillingSettings};
use infra_db::DatabaseConfig;

/// API configuration
///
/// Loaded from `API_`-prefixed environment variables, e.g. `API_PORT=8080`
/// or `API_CLINIC_TIMEZONE=Asia/Manila`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// HS256 secret shared with the identity service
    pub jwt_secret: String,
    /// PostgreSQL URL; the in-memory store is used when absent
    pub database_url: Option<String>,
    pub log_level: String,
    /// Emit logs as JSON lines
    pub log_json: bool,
    /// IANA zone name that defines the clinic's calendar day
    pub clinic_timezone: String,
    /// `inline` or `queued`
    pub analytics_mode: String,
    pub request_timeout_secs: u64,
    pub max_page_limit: u32,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            jwt_secret: "change-me-in-production".to_string(),
            database_url: None,
            log_level: "info".to_string(),
            log_json: false,
            clinic_timezone: "UTC".to_string(),
            analytics_mode: "inline".to_string(),
            request_timeout_secs: 30,
            max_page_limit: 100,
            db_max_connections: 10,
            db_min_connections: 2,
        }
    }
}

impl ApiConfig {
    /// Loads configuration from environment
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("API").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Returns the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Billing settings derived from this configuration
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending setting if the timezone or
    /// analytics mode cannot be parsed.
    pub fn billing_settings(&self) -> Result<BillingSettings, String> {
        let timezone: ClinicTimezone = self
            .clinic_timezone
            .parse()
            .map_err(|e| format!("API_CLINIC_TIMEZONE: {}", e))?;
        let analytics_mode: AnalyticsMode = self
            .analytics_mode
            .parse()
            .map_err(|e| format!("API_ANALYTICS_MODE: {}", e))?;

        Ok(BillingSettings {
            timezone,
            max_page_limit: self.max_page_limit.max(1),
            analytics_mode,
        })
    }

    /// Pool settings, if a database is configured
    pub fn database_config(&self) -> Option<DatabaseConfig> {
        self.database_url.as_ref().map(|url| {
            DatabaseConfig::new(url.clone())
                .max_connections(self.db_max_connections)
                .min_connections(self.db_min_connections)
        })
    }
}
