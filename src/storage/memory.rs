//! In-memory storage backend (no persistence)
//!
//! Holds the procurement tables, alerts, metrics and the audit trail in a
//! single `RwLock`-guarded state. It's used for:
//! - Tests without a database
//! - Dry runs of the processing pipeline
//!
//! Individual operations can be made to fail with [`MemoryBackend::fail_on`]
//! to exercise error paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{ActiveAlertCount, HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    EventLogEntry, InventoryItem, LineItem, MetricSample, OrderStatus, PurchaseOrder, ReceivedLine,
};
use crate::alerts::{Alert, AlertStatus, AlertType, EntityRef, NewAlert};

/// Operations that can be made to fail on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    GetItem,
    GetOrder,
    ApplyReceipt,
    Consumption,
    LatestForecast,
    RecordMetrics,
    AppendEventLog,
    InsertAlert,
    DedupLookup,
    ResolveAlert,
    ReadAlerts,
    DeleteAlerts,
}

#[derive(Debug, Clone)]
struct ConsumptionRow {
    item_id: i64,
    quantity: f64,
    consumed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ForecastRow {
    item_id: i64,
    forecast_date: NaiveDate,
    predicted_consumption: f64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    items: HashMap<i64, InventoryItem>,
    orders: HashMap<i64, PurchaseOrder>,
    line_items: Vec<LineItem>,
    consumption: Vec<ConsumptionRow>,
    forecasts: Vec<ForecastRow>,
    metrics: Vec<MetricSample>,
    event_log: Vec<EventLogEntry>,
    alerts: BTreeMap<i64, Alert>,
    next_alert_id: i64,
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
    failing: Mutex<HashSet<StorageOp>>,
}

impl MemoryBackend {
    /// Create a new, empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `op` fail until [`MemoryBackend::recover`]
    pub fn fail_on(&self, op: StorageOp) {
        self.failing_ops().insert(op);
    }

    pub fn recover(&self, op: StorageOp) {
        self.failing_ops().remove(&op);
    }

    fn failing_ops(&self) -> std::sync::MutexGuard<'_, HashSet<StorageOp>> {
        self.failing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, op: StorageOp) -> StorageResult<()> {
        if self.failing_ops().contains(&op) {
            return Err(StorageError::QueryFailed(format!("injected failure: {op:?}")));
        }
        Ok(())
    }

    // ========================================================================
    // Seeding and inspection
    // ========================================================================

    pub async fn upsert_item(&self, item: InventoryItem) {
        self.state.write().await.items.insert(item.item_id, item);
    }

    pub async fn set_stock(&self, item_id: i64, current_stock: i64) {
        if let Some(item) = self.state.write().await.items.get_mut(&item_id) {
            item.current_stock = current_stock;
        }
    }

    pub async fn upsert_order(&self, order: PurchaseOrder) {
        self.state.write().await.orders.insert(order.order_id, order);
    }

    pub async fn set_order_status(&self, order_id: i64, status: OrderStatus) {
        if let Some(order) = self.state.write().await.orders.get_mut(&order_id) {
            order.status = status;
        }
    }

    pub async fn add_line_item(&self, line: LineItem) {
        self.state.write().await.line_items.push(line);
    }

    pub async fn add_consumption(&self, item_id: i64, quantity: f64, consumed_at: DateTime<Utc>) {
        self.state.write().await.consumption.push(ConsumptionRow {
            item_id,
            quantity,
            consumed_at,
        });
    }

    pub async fn add_forecast(
        &self,
        item_id: i64,
        forecast_date: NaiveDate,
        predicted_consumption: f64,
        created_at: DateTime<Utc>,
    ) {
        self.state.write().await.forecasts.push(ForecastRow {
            item_id,
            forecast_date,
            predicted_consumption,
            created_at,
        });
    }

    pub async fn item(&self, item_id: i64) -> Option<InventoryItem> {
        self.state.read().await.items.get(&item_id).cloned()
    }

    pub async fn line_items(&self, order_id: i64) -> Vec<LineItem> {
        self.state
            .read()
            .await
            .line_items
            .iter()
            .filter(|line| line.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Every stored alert, ordered by id
    pub async fn alerts(&self) -> Vec<Alert> {
        self.state.read().await.alerts.values().cloned().collect()
    }

    pub async fn metrics(&self) -> Vec<MetricSample> {
        self.state.read().await.metrics.clone()
    }

    /// Sum of every recorded sample of the named metric
    pub async fn metric_total(&self, name: &str) -> f64 {
        self.state
            .read()
            .await
            .metrics
            .iter()
            .filter(|sample| sample.name == name)
            .map(|sample| sample.value)
            .sum()
    }

    pub async fn event_log(&self) -> Vec<EventLogEntry> {
        self.state.read().await.event_log.clone()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get_item(&self, item_id: i64) -> StorageResult<Option<InventoryItem>> {
        self.check(StorageOp::GetItem)?;
        Ok(self.item(item_id).await)
    }

    async fn get_order(&self, order_id: i64) -> StorageResult<Option<PurchaseOrder>> {
        self.check(StorageOp::GetOrder)?;
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn apply_order_receipt(
        &self,
        order_id: i64,
        at: DateTime<Utc>,
    ) -> StorageResult<Vec<ReceivedLine>> {
        self.check(StorageOp::ApplyReceipt)?;

        let mut state = self.state.write().await;
        let State {
            items, line_items, ..
        } = &mut *state;

        let mut received = Vec::new();
        for line in line_items
            .iter_mut()
            .filter(|line| line.order_id == order_id && line.outstanding() > 0)
        {
            let Some(item) = items.get_mut(&line.item_id) else {
                continue;
            };
            let quantity = line.outstanding();
            item.current_stock += quantity;
            item.last_updated = at;
            line.quantity_received = line.quantity_ordered;
            received.push(ReceivedLine {
                item_id: line.item_id,
                quantity,
                new_stock: item.current_stock,
            });
        }

        debug!("applied receipt for PO {order_id}: {} lines", received.len());
        Ok(received)
    }

    async fn consumption_since(&self, item_id: i64, since: DateTime<Utc>) -> StorageResult<f64> {
        self.check(StorageOp::Consumption)?;
        Ok(self
            .state
            .read()
            .await
            .consumption
            .iter()
            .filter(|row| row.item_id == item_id && row.consumed_at > since)
            .map(|row| row.quantity)
            .sum())
    }

    async fn latest_forecast(&self, item_id: i64, from: NaiveDate) -> StorageResult<Option<f64>> {
        self.check(StorageOp::LatestForecast)?;
        Ok(self
            .state
            .read()
            .await
            .forecasts
            .iter()
            .filter(|row| row.item_id == item_id && row.forecast_date >= from)
            .max_by_key(|row| row.created_at)
            .map(|row| row.predicted_consumption))
    }

    async fn record_metrics(&self, samples: Vec<MetricSample>) -> StorageResult<()> {
        self.check(StorageOp::RecordMetrics)?;
        self.state.write().await.metrics.extend(samples);
        Ok(())
    }

    async fn append_event_log(&self, entry: EventLogEntry) -> StorageResult<()> {
        self.check(StorageOp::AppendEventLog)?;
        self.state.write().await.event_log.push(entry);
        Ok(())
    }

    async fn count_events_since(&self, since: DateTime<Utc>) -> StorageResult<u64> {
        Ok(self
            .state
            .read()
            .await
            .event_log
            .iter()
            .filter(|entry| entry.processed_at > since)
            .count() as u64)
    }

    async fn insert_alert(
        &self,
        alert: &NewAlert,
        created_at: DateTime<Utc>,
    ) -> StorageResult<Alert> {
        self.check(StorageOp::InsertAlert)?;

        let mut state = self.state.write().await;
        state.next_alert_id += 1;
        let stored = Alert {
            alert_id: state.next_alert_id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            entity: alert.entity,
            message: alert.message.clone(),
            metadata: alert.metadata.clone(),
            status: AlertStatus::Active,
            created_at,
            resolved_at: None,
        };
        state.alerts.insert(stored.alert_id, stored.clone());
        Ok(stored)
    }

    async fn count_active_alerts_since(
        &self,
        alert_type: AlertType,
        entity: &EntityRef,
        since: DateTime<Utc>,
    ) -> StorageResult<u64> {
        self.check(StorageOp::DedupLookup)?;
        Ok(self
            .state
            .read()
            .await
            .alerts
            .values()
            .filter(|alert| {
                alert.is_active()
                    && alert.alert_type == alert_type
                    && alert.entity == *entity
                    && alert.created_at > since
            })
            .count() as u64)
    }

    async fn get_alert(&self, alert_id: i64) -> StorageResult<Option<Alert>> {
        self.check(StorageOp::ReadAlerts)?;
        Ok(self.state.read().await.alerts.get(&alert_id).cloned())
    }

    async fn resolve_alert(
        &self,
        alert_id: i64,
        resolved_at: DateTime<Utc>,
        note: Option<&str>,
    ) -> StorageResult<bool> {
        self.check(StorageOp::ResolveAlert)?;

        let mut state = self.state.write().await;
        match state.alerts.get_mut(&alert_id) {
            Some(alert) if alert.is_active() => {
                alert.status = AlertStatus::Resolved;
                alert.resolved_at = Some(resolved_at);
                if let (Some(note), Some(metadata)) = (note, alert.metadata.as_object_mut()) {
                    metadata.insert("resolution_note".to_string(), note.into());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn active_alerts(&self, limit: usize) -> StorageResult<Vec<Alert>> {
        self.check(StorageOp::ReadAlerts)?;

        let mut active: Vec<Alert> = self
            .state
            .read()
            .await
            .alerts
            .values()
            .filter(|alert| alert.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.alert_id.cmp(&a.alert_id))
        });
        active.truncate(limit);
        Ok(active)
    }

    async fn active_alerts_of_types(&self, types: &[AlertType]) -> StorageResult<Vec<Alert>> {
        self.check(StorageOp::ReadAlerts)?;
        Ok(self
            .state
            .read()
            .await
            .alerts
            .values()
            .filter(|alert| alert.is_active() && types.contains(&alert.alert_type))
            .cloned()
            .collect())
    }

    async fn active_alert_counts(&self) -> StorageResult<Vec<ActiveAlertCount>> {
        self.check(StorageOp::ReadAlerts)?;

        let mut counts = BTreeMap::new();
        for alert in self.state.read().await.alerts.values() {
            if alert.is_active() {
                *counts.entry((alert.alert_type, alert.severity)).or_insert(0u64) += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|((alert_type, severity), count)| ActiveAlertCount {
                alert_type,
                severity,
                count,
            })
            .collect())
    }

    async fn count_alerts_created_since(&self, since: DateTime<Utc>) -> StorageResult<u64> {
        self.check(StorageOp::ReadAlerts)?;
        Ok(self
            .state
            .read()
            .await
            .alerts
            .values()
            .filter(|alert| alert.created_at > since)
            .count() as u64)
    }

    async fn delete_resolved_before(&self, before: DateTime<Utc>) -> StorageResult<u64> {
        self.check(StorageOp::DeleteAlerts)?;

        let mut state = self.state.write().await;
        let len = state.alerts.len();
        state.alerts.retain(|_, alert| {
            !(alert.status == AlertStatus::Resolved
                && alert.resolved_at.is_some_and(|resolved| resolved < before))
        });
        Ok((len - state.alerts.len()) as u64)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("alerts".to_string(), state.alerts.len().to_string()),
                ("events".to_string(), state.event_log.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
