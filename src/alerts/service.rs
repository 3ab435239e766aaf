//! Alert processing entry points, maintenance and dashboard aggregation.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::manager::{AlertManager, AlertSummary};
use super::thresholds;
use super::{Alert, AlertResult, AlertType, EntityRef};
use crate::config::AlertConfig;
use crate::ml::StockoutRisk;
use crate::storage::{OrderStatus, StorageBackend};

/// Process-wide counters, reset on restart
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceStats {
    pub alerts_processed: u64,
    pub alerts_generated: u64,
    pub alerts_resolved: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub last_maintenance: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub resolved: u64,
    pub cleaned: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardData {
    pub summary: AlertSummary,
    pub active_alerts: Vec<Alert>,
    pub stats: ServiceStats,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub stats: ServiceStats,
    pub summary: AlertSummary,
    pub last_maintenance: Option<DateTime<Utc>>,
}

pub struct AlertService {
    manager: AlertManager,
    retention_days: u32,
    cleanup_interval: Duration,
    dashboard_limit: usize,
    stats: Mutex<ServiceStats>,
}

impl std::fmt::Debug for AlertService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertService")
            .field("manager", &self.manager)
            .field("retention_days", &self.retention_days)
            .field("cleanup_interval", &self.cleanup_interval)
            .finish_non_exhaustive()
    }
}

impl AlertService {
    pub fn new(manager: AlertManager, config: &AlertConfig) -> Self {
        Self {
            manager,
            retention_days: config.retention_days,
            cleanup_interval: Duration::hours(i64::from(config.cleanup_interval_hours)),
            dashboard_limit: config.dashboard_limit,
            stats: Mutex::new(ServiceStats::default()),
        }
    }

    pub fn manager(&self) -> &AlertManager {
        &self.manager
    }

    fn store(&self) -> &Arc<dyn StorageBackend> {
        self.manager.store()
    }

    fn stats_mut(&self) -> MutexGuard<'_, ServiceStats> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats_mut().clone()
    }

    fn record(&self, generated: Option<&Alert>) -> u32 {
        let mut stats = self.stats_mut();
        stats.alerts_processed += 1;
        match generated {
            Some(_) => {
                stats.alerts_generated += 1;
                1
            }
            None => 0,
        }
    }

    // ========================================================================
    // Processing entry points
    // ========================================================================

    /// Run the stock checks for an item. Returns the number of alerts raised.
    pub async fn process_inventory_alert(&self, item_id: i64) -> AlertResult<u32> {
        let Some(item) = self.store().get_item(item_id).await? else {
            warn!("item {item_id} not found for inventory alert");
            return Ok(0);
        };
        let alert = self.manager.check_inventory_alerts(&item).await?;
        Ok(self.record(alert.as_ref()))
    }

    pub async fn process_delivery_alert(&self, order_id: i64) -> AlertResult<u32> {
        let Some(order) = self.store().get_order(order_id).await? else {
            warn!("PO {order_id} not found for delivery alert");
            return Ok(0);
        };
        let alert = self.manager.check_delivery_alerts(&order).await?;
        Ok(self.record(alert.as_ref()))
    }

    /// Compare actual consumption with a forecast. Without an explicit
    /// prediction the latest stored forecast from today on is used.
    pub async fn process_demand_spike_alert(
        &self,
        item_id: i64,
        actual: f64,
        predicted: Option<f64>,
    ) -> AlertResult<u32> {
        let Some(item) = self.store().get_item(item_id).await? else {
            warn!("item {item_id} not found for demand spike alert");
            return Ok(0);
        };

        let predicted = match predicted {
            Some(predicted) => predicted,
            None => self
                .store()
                .latest_forecast(item_id, self.manager.clock().today())
                .await?
                .unwrap_or(0.0),
        };
        if predicted <= 0.0 {
            return Ok(0);
        }

        let alert = self
            .manager
            .check_demand_spike_alerts(item_id, &item.item_name, actual, predicted)
            .await?;
        Ok(self.record(alert.as_ref()))
    }

    pub async fn process_forecast_alert(&self, item_id: i64, accuracy: f64) -> AlertResult<u32> {
        let Some(item) = self.store().get_item(item_id).await? else {
            warn!("item {item_id} not found for forecast alert");
            return Ok(0);
        };
        let alert = self
            .manager
            .check_forecast_deviation_alerts(item_id, &item.item_name, accuracy)
            .await?;
        Ok(self.record(alert.as_ref()))
    }

    pub async fn process_risk_alert(&self, item_id: i64, risk: &StockoutRisk) -> AlertResult<u32> {
        let Some(item) = self.store().get_item(item_id).await? else {
            warn!("item {item_id} not found for risk alert");
            return Ok(0);
        };
        let alert = self
            .manager
            .check_risk_alert(item_id, &item.item_name, risk)
            .await?;
        if alert.is_some() {
            info!("ML alert generated for item {item_id}: {} risk", risk.risk_level);
        }
        Ok(self.record(alert.as_ref()))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    async fn condition_cleared(&self, alert: &Alert) -> AlertResult<Option<&'static str>> {
        match (alert.alert_type, alert.entity) {
            (AlertType::StockOut | AlertType::StockLow, EntityRef::Item(item_id)) => {
                let cleared = self.store().get_item(item_id).await?.is_some_and(|item| {
                    thresholds::stock_condition_cleared(
                        alert.alert_type,
                        item.current_stock,
                        item.safety_stock,
                    )
                });
                Ok(cleared.then_some("Auto-resolved: condition improved"))
            }
            (AlertType::DeliveryOverdue, EntityRef::Order(order_id)) => {
                let cleared = self
                    .store()
                    .get_order(order_id)
                    .await?
                    .is_some_and(|order| order.status == OrderStatus::Received);
                Ok(cleared.then_some("Auto-resolved: PO received"))
            }
            _ => Ok(None),
        }
    }

    /// Resolve active alerts whose condition no longer holds.
    ///
    /// A failure on one alert is logged and the sweep moves on.
    #[instrument(skip(self))]
    pub async fn auto_resolve_alerts(&self) -> AlertResult<u64> {
        let candidates: Vec<AlertType> = AlertType::ALL
            .into_iter()
            .filter(AlertType::is_auto_resolvable)
            .collect();
        let active = self.store().active_alerts_of_types(&candidates).await?;

        let mut resolved = 0;
        for alert in &active {
            let note = match self.condition_cleared(alert).await {
                Ok(Some(note)) => note,
                Ok(None) => continue,
                Err(e) => {
                    warn!("failed to evaluate alert {}: {e}", alert.alert_id);
                    continue;
                }
            };
            match self.manager.resolve_alert(alert.alert_id, Some(note)).await {
                Ok(true) => resolved += 1,
                Ok(false) => {}
                Err(e) => warn!("failed to resolve alert {}: {e}", alert.alert_id),
            }
        }

        if resolved > 0 {
            info!("auto-resolved {resolved} alerts");
        }
        self.stats_mut().alerts_resolved += resolved;
        Ok(resolved)
    }

    /// Auto-resolution sweep, then a retention purge at most once per
    /// cleanup interval
    #[instrument(skip(self))]
    pub async fn run_maintenance(&self) -> AlertResult<MaintenanceReport> {
        let now = self.manager.now();
        let resolved = self.auto_resolve_alerts().await?;

        let cleanup_due = self
            .stats()
            .last_cleanup
            .is_none_or(|last| now - last >= self.cleanup_interval);

        let cleaned = if cleanup_due {
            let cleaned = self.manager.cleanup_old_alerts(self.retention_days).await?;
            self.stats_mut().last_cleanup = Some(now);
            cleaned
        } else {
            debug!("retention cleanup not due yet");
            0
        };

        self.stats_mut().last_maintenance = Some(now);
        Ok(MaintenanceReport { resolved, cleaned })
    }

    // ========================================================================
    // Read side
    // ========================================================================

    pub async fn dashboard_data(&self) -> AlertResult<DashboardData> {
        self.dashboard_data_with_limit(self.dashboard_limit).await
    }

    pub async fn dashboard_data_with_limit(&self, limit: usize) -> AlertResult<DashboardData> {
        Ok(DashboardData {
            summary: self.manager.summary().await?,
            active_alerts: self.manager.active_alerts(limit).await?,
            stats: self.stats(),
            timestamp: self.manager.now(),
        })
    }

    pub async fn status(&self) -> AlertResult<ServiceStatus> {
        let stats = self.stats();
        Ok(ServiceStatus {
            last_maintenance: stats.last_maintenance,
            summary: self.manager.summary().await?,
            stats,
        })
    }
}
