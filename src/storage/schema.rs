//! Row types read and written by the pipeline
//!
//! The procurement tables themselves (inventory, purchase orders, line items,
//! consumption history, forecasts) are owned by the surrounding system; the
//! pipeline only reads snapshots of them and applies order receipts. Alerts,
//! system metrics and the event log are written by the pipeline.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of one inventory row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub item_id: i64,
    pub item_name: String,
    pub current_stock: i64,
    pub safety_stock: i64,
    pub unit_cost: f64,
    pub location: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// Purchase order status as stored in `purchase_orders.status`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Approved,
    Shipped,
    Received,
    Cancelled,
    /// Any status the pipeline has no special handling for
    #[serde(untagged)]
    Other(String),
}

impl OrderStatus {
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "created" => OrderStatus::Created,
            "approved" => OrderStatus::Approved,
            "shipped" => OrderStatus::Shipped,
            "received" => OrderStatus::Received,
            "cancelled" | "canceled" => OrderStatus::Cancelled,
            other => OrderStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Approved => "approved",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Received => "received",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Other(status) => status,
        }
    }

    /// Received and cancelled orders can no longer be overdue
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Received | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one purchase order row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub order_id: i64,
    pub supplier_name: String,
    pub status: OrderStatus,
    pub created_date: DateTime<Utc>,
    pub expected_delivery: Option<NaiveDate>,
    pub total_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub order_id: i64,
    pub item_id: i64,
    pub quantity_ordered: i64,
    pub quantity_received: i64,
}

impl LineItem {
    pub fn outstanding(&self) -> i64 {
        (self.quantity_ordered - self.quantity_received).max(0)
    }
}

/// One inventory credit produced by applying an order receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedLine {
    pub item_id: i64,
    pub quantity: i64,
    pub new_stock: i64,
}

/// A row of `system_metrics`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64, recorded_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value,
            recorded_at,
        }
    }
}

/// A row of the append-only `event_log` audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed_at: DateTime<Utc>,
    pub processing_duration_ms: i64,
}
