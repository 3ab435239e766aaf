//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that the PostgreSQL
//! and in-memory stores implement.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::error::StorageResult;
use super::schema::{EventLogEntry, InventoryItem, MetricSample, PurchaseOrder, ReceivedLine};
use crate::alerts::{Alert, AlertType, EntityRef, NewAlert, Severity};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Number of active alerts sharing a type and severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveAlertCount {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub count: u64,
}

/// Trait for the store the pipeline reads procurement data from and writes
/// alerts, metrics and the audit trail to.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; the store is shared between the
/// listener worker and one-shot CLI commands.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>`. Implementations convert
/// backend-specific errors to `StorageError` variants and never log them;
/// the caller that swallows an error logs it.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Procurement data
    // ========================================================================

    async fn get_item(&self, item_id: i64) -> StorageResult<Option<InventoryItem>>;

    async fn get_order(&self, order_id: i64) -> StorageResult<Option<PurchaseOrder>>;

    /// Credit the outstanding quantity of every line item of the order whose
    /// `quantity_received < quantity_ordered` to inventory and mark the line
    /// fulfilled, atomically.
    ///
    /// Applying the same receipt twice credits nothing the second time.
    async fn apply_order_receipt(
        &self,
        order_id: i64,
        at: DateTime<Utc>,
    ) -> StorageResult<Vec<ReceivedLine>>;

    /// Total quantity consumed for the item strictly after `since`
    async fn consumption_since(&self, item_id: i64, since: DateTime<Utc>) -> StorageResult<f64>;

    /// Most recently created forecast for the item whose forecast date is on
    /// or after `from`
    async fn latest_forecast(&self, item_id: i64, from: NaiveDate) -> StorageResult<Option<f64>>;

    // ========================================================================
    // Metrics and audit trail
    // ========================================================================

    async fn record_metrics(&self, samples: Vec<MetricSample>) -> StorageResult<()>;

    async fn append_event_log(&self, entry: EventLogEntry) -> StorageResult<()>;

    async fn count_events_since(&self, since: DateTime<Utc>) -> StorageResult<u64>;

    // ========================================================================
    // Alerts
    // ========================================================================

    /// Persist a new active alert and return it with its assigned id
    async fn insert_alert(&self, alert: &NewAlert, created_at: DateTime<Utc>)
    -> StorageResult<Alert>;

    /// Count active alerts of `alert_type` for exactly `entity` created
    /// strictly after `since`
    async fn count_active_alerts_since(
        &self,
        alert_type: AlertType,
        entity: &EntityRef,
        since: DateTime<Utc>,
    ) -> StorageResult<u64>;

    async fn get_alert(&self, alert_id: i64) -> StorageResult<Option<Alert>>;

    /// Transition an active alert to resolved. Returns `false` if the alert
    /// does not exist or is already resolved.
    async fn resolve_alert(
        &self,
        alert_id: i64,
        resolved_at: DateTime<Utc>,
        note: Option<&str>,
    ) -> StorageResult<bool>;

    /// Active alerts, most severe first, newest first within a severity
    async fn active_alerts(&self, limit: usize) -> StorageResult<Vec<Alert>>;

    /// Every active alert of the given types, oldest first
    async fn active_alerts_of_types(&self, types: &[AlertType]) -> StorageResult<Vec<Alert>>;

    async fn active_alert_counts(&self) -> StorageResult<Vec<ActiveAlertCount>>;

    async fn count_alerts_created_since(&self, since: DateTime<Utc>) -> StorageResult<u64>;

    /// Delete resolved alerts whose `resolved_at` is before `before`.
    ///
    /// Returns the number of alerts deleted.
    async fn delete_resolved_before(&self, before: DateTime<Utc>) -> StorageResult<u64>;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend is operational.
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
