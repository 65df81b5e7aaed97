use bigdecimal::BigDecimal;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{BookingError, BookingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Diagnostics,
    OilService,
    BrakeRepair,
    BatteryReplacement,
    PrePurchaseInspection,
    QuoteVisit,
}

impl ServiceType {
    pub const ALL: [ServiceType; 6] = [
        ServiceType::Diagnostics,
        ServiceType::OilService,
        ServiceType::BrakeRepair,
        ServiceType::BatteryReplacement,
        ServiceType::PrePurchaseInspection,
        ServiceType::QuoteVisit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Diagnostics => "diagnostics",
            ServiceType::OilService => "oil_service",
            ServiceType::BrakeRepair => "brake_repair",
            ServiceType::BatteryReplacement => "battery_replacement",
            ServiceType::PrePurchaseInspection => "pre_purchase_inspection",
            ServiceType::QuoteVisit => "quote_visit",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        ServiceType::ALL
            .into_iter()
            .find(|t| t.as_str().replace('_', "") == folded)
            .ok_or_else(|| BookingError::UnsupportedServiceType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeKind {
    Flat,
    Deposit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPolicy {
    #[default]
    Prepaid,
    PayOnSite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceFee {
    pub label: String,
    pub amount: BigDecimal,
    pub charge: ChargeKind,
    pub duration_minutes: u32,
    #[serde(default)]
    pub after_hours_allowed: bool,
    #[serde(default)]
    pub payment: PaymentPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeTable {
    pub currency: String,
    pub after_hours_surcharge_rate: BigDecimal,
    pub services: HashMap<ServiceType, ServiceFee>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub label: String,
    pub amount: BigDecimal,
}

/// Price quote frozen onto a reservation when it is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub service_type: ServiceType,
    pub currency: String,
    pub charge: ChargeKind,
    pub base_fee: BigDecimal,
    pub surcharge_rate: BigDecimal,
    pub surcharge: BigDecimal,
    pub total: BigDecimal,
    pub line_items: Vec<LineItem>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "schema_version")]
enum StoredSnapshot {
    #[serde(rename = "1")]
    V1(PricingSnapshot),
}

fn money(minor: i64) -> BigDecimal {
    (BigDecimal::from(minor) / BigDecimal::from(100)).with_scale(2)
}

impl FeeTable {
    pub fn standard() -> Self {
        let entries = [
            (ServiceType::Diagnostics, "Diagnostics visit", 6500, ChargeKind::Flat, 60, true, PaymentPolicy::Prepaid),
            (ServiceType::OilService, "Oil and filter service", 12000, ChargeKind::Flat, 90, false, PaymentPolicy::Prepaid),
            (ServiceType::BrakeRepair, "Brake repair deposit", 5000, ChargeKind::Deposit, 120, false, PaymentPolicy::Prepaid),
            (ServiceType::BatteryReplacement, "Battery replacement", 9500, ChargeKind::Flat, 45, true, PaymentPolicy::Prepaid),
            (ServiceType::PrePurchaseInspection, "Pre-purchase inspection", 11000, ChargeKind::Flat, 90, false, PaymentPolicy::Prepaid),
            (ServiceType::QuoteVisit, "On-site quote", 0, ChargeKind::Flat, 30, false, PaymentPolicy::PayOnSite),
        ];

        let services = entries
            .into_iter()
            .map(|(service, label, minor, charge, duration_minutes, after_hours_allowed, payment)| {
                (
                    service,
                    ServiceFee {
                        label: label.to_string(),
                        amount: money(minor),
                        charge,
                        duration_minutes,
                        after_hours_allowed,
                        payment,
                    },
                )
            })
            .collect();

        Self {
            currency: "gbp".to_string(),
            after_hours_surcharge_rate: money(50),
            services,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn service(&self, service_type: ServiceType) -> BookingResult<&ServiceFee> {
        self.services
            .get(&service_type)
            .ok_or_else(|| BookingError::UnsupportedServiceType(service_type.to_string()))
    }

    pub fn quote(&self, service_type: ServiceType, after_hours: bool) -> BookingResult<PricingSnapshot> {
        let fee = self.service(service_type)?;
        let base_fee = fee.amount.with_scale(2);
        let mut line_items = vec![LineItem {
            label: fee.label.clone(),
            amount: base_fee.clone(),
        }];

        let (surcharge_rate, surcharge) = if after_hours {
            let surcharge = (&base_fee * &self.after_hours_surcharge_rate).round(2);
            line_items.push(LineItem {
                label: "After-hours surcharge".to_string(),
                amount: surcharge.clone(),
            });
            (self.after_hours_surcharge_rate.clone(), surcharge)
        } else {
            (BigDecimal::zero(), money(0))
        };

        let total = (&base_fee + &surcharge).with_scale(2);
        Ok(PricingSnapshot {
            service_type,
            currency: self.currency.clone(),
            charge: fee.charge,
            base_fee,
            surcharge_rate,
            surcharge,
            total,
            line_items,
        })
    }
}

impl PricingSnapshot {
    pub fn to_record(&self) -> BookingResult<serde_json::Value> {
        serde_json::to_value(StoredSnapshot::V1(self.clone()))
            .map_err(|e| BookingError::CorruptRecord(format!("pricing snapshot: {}", e)))
    }

    pub fn from_record(record: serde_json::Value) -> BookingResult<Self> {
        match serde_json::from_value::<StoredSnapshot>(record) {
            Ok(StoredSnapshot::V1(snapshot)) => Ok(snapshot),
            Err(e) => Err(BookingError::CorruptRecord(format!("pricing snapshot: {}", e))),
        }
    }

    pub fn minor_units(&self) -> Option<i64> {
        (&self.total * BigDecimal::from(100)).round(0).to_i64()
    }

    pub fn is_free(&self) -> bool {
        self.total.is_zero()
    }
}
