//! Dedup-gated alert creation and the alert read side.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use super::thresholds;
use super::{Alert, AlertError, AlertResult, AlertType, EntityRef, NewAlert, Severity};
use crate::clock::Clock;
use crate::ml::StockoutRisk;
use crate::storage::{InventoryItem, PurchaseOrder, StorageBackend};

/// What to do when the duplicate lookup itself fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupFailurePolicy {
    /// Do not create the alert; the check counts as not evaluated
    #[default]
    FailClosed,
    /// Create the alert anyway, accepting a possible duplicate
    FailOpen,
}

/// Dedup window per alert type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupWindows {
    minutes: HashMap<AlertType, u32>,
}

impl Default for DedupWindows {
    fn default() -> Self {
        Self {
            minutes: AlertType::ALL
                .into_iter()
                .map(|t| (t, t.default_dedup_minutes()))
                .collect(),
        }
    }
}

impl DedupWindows {
    pub fn with_overrides(overrides: &HashMap<AlertType, u32>) -> Self {
        let mut windows = Self::default();
        windows.minutes.extend(overrides.iter().map(|(t, m)| (*t, *m)));
        windows
    }

    pub fn window(&self, alert_type: AlertType) -> Duration {
        let minutes = self
            .minutes
            .get(&alert_type)
            .copied()
            .unwrap_or_else(|| alert_type.default_dedup_minutes());
        Duration::minutes(i64::from(minutes))
    }
}

/// Counts of active alerts plus recent activity
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertSummary {
    pub active_by_severity: BTreeMap<Severity, u64>,
    pub active_by_type: BTreeMap<AlertType, u64>,
    pub recent_alerts_1h: u64,
    pub total_active: u64,
}

/// Evaluates threshold policies and persists alerts that are not duplicates
#[derive(Clone)]
pub struct AlertManager {
    store: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    windows: DedupWindows,
    dedup_failure: DedupFailurePolicy,
}

impl std::fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertManager")
            .field("windows", &self.windows)
            .field("dedup_failure", &self.dedup_failure)
            .finish_non_exhaustive()
    }
}

impl AlertManager {
    pub fn new(store: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            windows: DedupWindows::default(),
            dedup_failure: DedupFailurePolicy::default(),
        }
    }

    pub fn with_dedup_windows(mut self, windows: DedupWindows) -> Self {
        self.windows = windows;
        self
    }

    pub fn with_dedup_failure(mut self, policy: DedupFailurePolicy) -> Self {
        self.dedup_failure = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn StorageBackend> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ========================================================================
    // Threshold checks
    // ========================================================================

    pub async fn check_inventory_alerts(&self, item: &InventoryItem) -> AlertResult<Option<Alert>> {
        let Some((alert_type, severity)) =
            thresholds::classify_stock(item.current_stock, item.safety_stock)
        else {
            return Ok(None);
        };

        let (message, metadata) = match alert_type {
            AlertType::StockOut => (
                format!("{}: Out of stock (0 units available)", item.item_name),
                json!({
                    "current_stock": item.current_stock,
                    "safety_stock": item.safety_stock,
                }),
            ),
            _ => {
                let ratio = thresholds::stock_ratio(item.current_stock, item.safety_stock);
                (
                    format!(
                        "{}: Low stock ({} units, safety stock: {})",
                        item.item_name, item.current_stock, item.safety_stock
                    ),
                    json!({
                        "current_stock": item.current_stock,
                        "safety_stock": item.safety_stock,
                        "ratio": ratio,
                    }),
                )
            }
        };

        self.create_alert(NewAlert {
            alert_type,
            severity,
            entity: EntityRef::Item(item.item_id),
            message,
            metadata,
        })
        .await
    }

    pub async fn check_delivery_alerts(&self, order: &PurchaseOrder) -> AlertResult<Option<Alert>> {
        let Some((severity, days_overdue)) = thresholds::classify_delivery(
            &order.status,
            order.expected_delivery,
            self.clock.today(),
        ) else {
            return Ok(None);
        };
        let expected = order
            .expected_delivery
            .map(|date| date.to_string())
            .unwrap_or_default();

        self.create_alert(NewAlert {
            alert_type: AlertType::DeliveryOverdue,
            severity,
            entity: EntityRef::Order(order.order_id),
            message: format!(
                "PO from {}: Delivery overdue by {days_overdue} days (expected: {expected})",
                order.supplier_name
            ),
            metadata: json!({
                "days_overdue": days_overdue,
                "expected_delivery": expected,
                "status": order.status.as_str(),
            }),
        })
        .await
    }

    pub async fn check_demand_spike_alerts(
        &self,
        item_id: i64,
        item_name: &str,
        actual: f64,
        predicted: f64,
    ) -> AlertResult<Option<Alert>> {
        let Some((severity, ratio)) = thresholds::classify_demand_spike(actual, predicted) else {
            return Ok(None);
        };

        self.create_alert(NewAlert {
            alert_type: AlertType::DemandSpike,
            severity,
            entity: EntityRef::Item(item_id),
            message: format!(
                "{item_name}: Demand spike detected (actual: {actual}, predicted: {predicted}, ratio: {ratio:.1}x)"
            ),
            metadata: json!({
                "actual_consumption": actual,
                "predicted_consumption": predicted,
                "ratio": ratio,
            }),
        })
        .await
    }

    pub async fn check_forecast_deviation_alerts(
        &self,
        item_id: i64,
        item_name: &str,
        accuracy: f64,
    ) -> AlertResult<Option<Alert>> {
        let Some(severity) = thresholds::classify_forecast_accuracy(accuracy) else {
            return Ok(None);
        };

        self.create_alert(NewAlert {
            alert_type: AlertType::ForecastDeviation,
            severity,
            entity: EntityRef::Item(item_id),
            message: format!(
                "{item_name}: Poor forecast accuracy ({:.1}%)",
                accuracy * 100.0
            ),
            metadata: json!({ "forecast_accuracy": accuracy }),
        })
        .await
    }

    /// Raise a forecast deviation alert for a high or critical stockout risk
    pub async fn check_risk_alert(
        &self,
        item_id: i64,
        item_name: &str,
        risk: &StockoutRisk,
    ) -> AlertResult<Option<Alert>> {
        let Some(severity) = risk.risk_level.alert_severity() else {
            return Ok(None);
        };

        let probability = risk.risk_probability * 100.0;
        let message = match risk.days_until_stockout {
            Some(days) => format!(
                "{item_name}: High stockout risk ({probability:.1}% probability, ~{days:.0} days until stockout)"
            ),
            None => format!("{item_name}: High stockout risk ({probability:.1}% probability)"),
        };

        self.create_alert(NewAlert {
            alert_type: AlertType::ForecastDeviation,
            severity,
            entity: EntityRef::Item(item_id),
            message,
            metadata: json!({
                "risk_probability": risk.risk_probability,
                "risk_level": risk.risk_level.as_str(),
                "days_until_stockout": risk.days_until_stockout,
                "ml_model": risk.model_version.as_deref().unwrap_or("unknown"),
            }),
        })
        .await
    }

    // ========================================================================
    // Creation and lifecycle
    // ========================================================================

    /// Whether an active alert of the same type and entity exists inside the
    /// type's dedup window
    pub async fn is_duplicate(&self, alert_type: AlertType, entity: &EntityRef) -> AlertResult<bool> {
        let since = self.clock.now() - self.windows.window(alert_type);
        let count = self
            .store
            .count_active_alerts_since(alert_type, entity, since)
            .await
            .map_err(|source| AlertError::DedupCheck { alert_type, source })?;
        Ok(count > 0)
    }

    /// Persist `alert` unless it duplicates an active one.
    ///
    /// Returns `Ok(None)` when the alert was suppressed as a duplicate.
    #[instrument(skip(self, alert), fields(alert_type = %alert.alert_type, entity = %alert.entity))]
    pub async fn create_alert(&self, alert: NewAlert) -> AlertResult<Option<Alert>> {
        match self.is_duplicate(alert.alert_type, &alert.entity).await {
            Ok(true) => {
                debug!("duplicate alert suppressed");
                return Ok(None);
            }
            Ok(false) => {}
            Err(e) => match self.dedup_failure {
                DedupFailurePolicy::FailClosed => {
                    error!("dedup check failed, alert not created: {e}");
                    return Err(e);
                }
                DedupFailurePolicy::FailOpen => {
                    warn!("dedup check failed, creating alert anyway: {e}");
                }
            },
        }

        let stored = self.store.insert_alert(&alert, self.clock.now()).await?;
        info!(
            alert_id = stored.alert_id,
            severity = %stored.severity,
            "alert created: {}",
            stored.message
        );
        Ok(Some(stored))
    }

    /// Resolve an active alert. Returns `false` if it was not active.
    pub async fn resolve_alert(&self, alert_id: i64, note: Option<&str>) -> AlertResult<bool> {
        let resolved = self
            .store
            .resolve_alert(alert_id, self.clock.now(), note)
            .await?;
        if resolved {
            info!("alert {alert_id} resolved");
        } else {
            warn!("alert {alert_id} not found or already resolved");
        }
        Ok(resolved)
    }

    pub async fn active_alerts(&self, limit: usize) -> AlertResult<Vec<Alert>> {
        Ok(self.store.active_alerts(limit).await?)
    }

    pub async fn summary(&self) -> AlertResult<AlertSummary> {
        let counts = self.store.active_alert_counts().await?;
        let recent = self
            .store
            .count_alerts_created_since(self.clock.now() - Duration::hours(1))
            .await?;

        let mut summary = AlertSummary {
            recent_alerts_1h: recent,
            ..Default::default()
        };
        for count in counts {
            *summary.active_by_severity.entry(count.severity).or_default() += count.count;
            *summary.active_by_type.entry(count.alert_type).or_default() += count.count;
            summary.total_active += count.count;
        }
        Ok(summary)
    }

    /// Delete resolved alerts resolved more than `days` days ago
    #[instrument(skip(self))]
    pub async fn cleanup_old_alerts(&self, days: u32) -> AlertResult<u64> {
        let cutoff = self.clock.now() - Duration::days(i64::from(days));
        let deleted = self.store.delete_resolved_before(cutoff).await?;
        info!("cleaned up {deleted} old alerts");
        Ok(deleted)
    }
}
