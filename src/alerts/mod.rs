//! Alert model, threshold policies, the dedup-gated [`manager::AlertManager`]
//! and the maintenance-oriented [`service::AlertService`].
//!
//! ## Lifecycle
//!
//! ```text
//! NoAlert ──check true, no duplicate──▶ Active ──condition cleared / manual──▶ Resolved ──retention──▶ purged
//! ```
//!
//! Per `(alert_type, entity)` pair at most one active alert exists inside the
//! type's dedup window.

pub mod manager;
pub mod service;
pub mod thresholds;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageError;

pub use manager::{AlertManager, DedupFailurePolicy, DedupWindows};
pub use service::{AlertService, DashboardData, MaintenanceReport, ServiceStats};

/// Result type alias for alert engine operations
pub type AlertResult<T> = Result<T, AlertError>;

#[derive(Debug, Error)]
pub enum AlertError {
    /// Writing or reading the alert store failed. The originating check
    /// counts as not evaluated.
    #[error("alert store error: {0}")]
    Store(#[from] StorageError),

    /// The duplicate lookup failed and the fail-closed policy suppressed the alert
    #[error("dedup check failed for {alert_type}: {source}")]
    DedupCheck {
        alert_type: AlertType,
        source: StorageError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    StockLow,
    StockOut,
    DeliveryOverdue,
    DemandSpike,
    ForecastDeviation,
    SystemError,
}

impl AlertType {
    pub const ALL: [AlertType; 6] = [
        AlertType::StockLow,
        AlertType::StockOut,
        AlertType::DeliveryOverdue,
        AlertType::DemandSpike,
        AlertType::ForecastDeviation,
        AlertType::SystemError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::StockLow => "stock_low",
            AlertType::StockOut => "stock_out",
            AlertType::DeliveryOverdue => "delivery_overdue",
            AlertType::DemandSpike => "demand_spike",
            AlertType::ForecastDeviation => "forecast_deviation",
            AlertType::SystemError => "system_error",
        }
    }

    /// Default dedup window in minutes
    pub fn default_dedup_minutes(&self) -> u32 {
        match self {
            AlertType::StockLow => 60,
            AlertType::StockOut => 30,
            AlertType::DeliveryOverdue => 240,
            AlertType::DemandSpike => 120,
            AlertType::ForecastDeviation => 180,
            AlertType::SystemError => 15,
        }
    }

    /// Types the maintenance sweep knows how to resolve on its own
    pub fn is_auto_resolvable(&self) -> bool {
        matches!(
            self,
            AlertType::StockLow | AlertType::StockOut | AlertType::DeliveryOverdue
        )
    }

    /// Human readable label, e.g. "Delivery Overdue"
    pub fn title(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown alert type: {s}"))
    }
}

/// Alert severity, ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str() == s)
            .ok_or_else(|| format!("unknown severity: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AlertStatus::Active),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(format!("unknown alert status: {other}")),
        }
    }
}

/// What an alert is about. An alert references an inventory item, a purchase
/// order, or nothing (system level), never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Item(i64),
    Order(i64),
    System,
}

impl EntityRef {
    pub fn from_columns(item_id: Option<i64>, order_id: Option<i64>) -> Self {
        match (item_id, order_id) {
            (Some(item_id), _) => EntityRef::Item(item_id),
            (None, Some(order_id)) => EntityRef::Order(order_id),
            (None, None) => EntityRef::System,
        }
    }

    pub fn item_id(&self) -> Option<i64> {
        match self {
            EntityRef::Item(id) => Some(*id),
            _ => None,
        }
    }

    pub fn order_id(&self) -> Option<i64> {
        match self {
            EntityRef::Order(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Item(id) => write!(f, "item {id}"),
            EntityRef::Order(id) => write!(f, "PO {id}"),
            EntityRef::System => f.write_str("system"),
        }
    }
}

/// A persisted alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: i64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub entity: EntityRef,
    pub message: String,
    pub metadata: serde_json::Value,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }
}

/// An alert that passed its threshold check but has not been stored yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub entity: EntityRef,
    pub message: String,
    pub metadata: serde_json::Value,
}
