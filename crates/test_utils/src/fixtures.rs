//! Pre-built Test Fixtures
//!
//! Ready-to-use principals, amounts, timestamps and catalog entries for the
//! ledger test suites. Every value is fixed so assertions can name it.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use core_kernel::{ClinicTimezone, Money, Rate, ServiceId};
use domain_billing::{CatalogService, DiscountKind, Principal, Role, SeniorPwdDiscount};
use rust_decimal_macros::dec;

/// Fixture for acting users
pub struct PrincipalFixtures;

impl PrincipalFixtures {
    /// Front-desk encoder
    pub fn encoder() -> Principal {
        Principal::new("user-encoder", "Maria Santos", Role::Encoder)
    }

    /// Clinic administrator
    pub fn admin() -> Principal {
        Principal::new("user-admin", "Dr. Jose Reyes", Role::Admin)
    }
}

/// Fixture for peso amounts
pub struct MoneyFixtures;

impl MoneyFixtures {
    /// Standard consultation fee
    pub fn consultation_fee() -> Money {
        Money::new(dec!(300))
    }

    /// Total used by the settlement scenarios
    pub fn bill_total() -> Money {
        Money::new(dec!(1000))
    }

    /// A payment that leaves half a centavo outstanding on a 1000 bill
    pub fn just_under_total() -> Money {
        Money::new(dec!(999.995))
    }

    pub fn zero() -> Money {
        Money::zero()
    }
}

/// Fixture for timestamps and calendar dates
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// The clinic's zone
    pub fn manila() -> ClinicTimezone {
        ClinicTimezone::new(chrono_tz::Asia::Manila)
    }

    /// A day in March 2024
    pub fn march(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    /// A UTC instant on a day in March 2024
    pub fn march_at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    /// 23:30 local time on March 1 in Manila, still March 1 UTC
    pub fn late_evening_manila() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 15, 30, 0).unwrap()
    }

    /// 00:30 local time on March 2 in Manila, which is March 1 UTC
    pub fn just_after_midnight_manila() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 16, 30, 0).unwrap()
    }
}

/// Fixture for service catalog entries
pub struct CatalogFixtures;

impl CatalogFixtures {
    pub fn cbc() -> CatalogService {
        Self::service("CBC", "Laboratory", Money::new(dec!(250)))
    }

    pub fn chest_xray() -> CatalogService {
        Self::service("Chest X-Ray", "Imaging", Money::new(dec!(500)))
    }

    /// An entry switched off in the catalog
    pub fn deactivated_ecg() -> CatalogService {
        CatalogService {
            is_active: false,
            ..Self::service("ECG", "Cardiology", Money::new(dec!(400)))
        }
    }

    /// An active entry that cannot currently be performed
    pub fn unavailable_ultrasound() -> CatalogService {
        CatalogService {
            is_available: false,
            ..Self::service("Ultrasound", "Imaging", Money::new(dec!(1200)))
        }
    }

    /// A billable entry with a fresh id
    pub fn service(name: &str, category: &str, price: Money) -> CatalogService {
        CatalogService {
            id: ServiceId::new(),
            name: name.to_string(),
            category: category.to_string(),
            price,
            is_active: true,
            is_available: true,
        }
    }
}

/// Fixture for statutory discounts
pub struct DiscountFixtures;

impl DiscountFixtures {
    /// 20% senior citizen discount
    pub fn senior() -> SeniorPwdDiscount {
        SeniorPwdDiscount {
            kind: DiscountKind::Senior,
            rate: Rate::from_percentage(dec!(20)),
            id_number: "SC-2024-0001".to_string(),
        }
    }

    /// 20% PWD discount
    pub fn pwd() -> SeniorPwdDiscount {
        SeniorPwdDiscount {
            kind: DiscountKind::Pwd,
            rate: Rate::from_percentage(dec!(20)),
            id_number: "PWD-2024-0042".to_string(),
        }
    }
}
