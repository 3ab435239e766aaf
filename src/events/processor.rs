//! Per-kind business logic: metrics, alert checks, receipts and ML triggers.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::payload::{AlertGenerated, ForecastUpdated, InventoryChanged, OrderStatusChanged};
use super::{EventHandler, EventKind, EventPayload, HandlerError};
use crate::alerts::{thresholds, AlertService, Severity};
use crate::clock::Clock;
use crate::config::Config;
use crate::ml::Predictor;
use crate::storage::{MetricSample, OrderStatus, StorageBackend};

/// Window of actual consumption compared against forecasts
const CONSUMPTION_WINDOW_DAYS: i64 = 7;

/// Process-wide counters, reset on restart
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub events_processed: u64,
    pub processing_errors: u64,
    pub last_processed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Processed,
    /// The referenced entity does not exist; nothing to do
    Skipped,
}

pub struct EventProcessor {
    store: Arc<dyn StorageBackend>,
    alerts: Arc<AlertService>,
    predictor: Arc<dyn Predictor>,
    clock: Arc<dyn Clock>,
    ml_change_threshold: i64,
    ml_horizon_days: u32,
    maintenance_every: u64,
    stats: Mutex<ProcessingStats>,
}

impl EventProcessor {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        alerts: Arc<AlertService>,
        predictor: Arc<dyn Predictor>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            alerts,
            predictor,
            clock,
            ml_change_threshold: config.ml.change_threshold,
            ml_horizon_days: config.ml.horizon_days,
            maintenance_every: config.alerts.maintenance_every_events,
            stats: Mutex::new(ProcessingStats::default()),
        }
    }

    fn stats_mut(&self) -> MutexGuard<'_, ProcessingStats> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stats(&self) -> ProcessingStats {
        self.stats_mut().clone()
    }

    /// Best effort: a failed metric write never fails the event
    async fn record_metrics(&self, metrics: Vec<(String, f64)>) {
        let now = self.clock.now();
        let samples = metrics
            .into_iter()
            .map(|(name, value)| MetricSample::new(name, value, now))
            .collect();
        if let Err(e) = self.store.record_metrics(samples).await {
            warn!("failed to record metrics: {e}");
        }
    }

    // ========================================================================
    // inventory-changed
    // ========================================================================

    #[instrument(skip(self, event), fields(item_id = event.item_id))]
    async fn process_inventory_event(&self, event: &InventoryChanged) -> Result<Outcome, HandlerError> {
        info!(
            "inventory change: item {}, {} -> {}",
            event.item_id, event.old_quantity, event.new_quantity
        );

        if self.store.get_item(event.item_id).await?.is_none() {
            warn!("inventory item {} not found", event.item_id);
            return Ok(Outcome::Skipped);
        }

        let delta = event.delta();
        let mut metrics = vec![
            ("inventory_quantity_change".to_string(), delta as f64),
            ("inventory_events_processed".to_string(), 1.0),
        ];
        if event.is_update() {
            if delta > 0 {
                metrics.push(("inventory_receipts".to_string(), delta as f64));
            } else if delta < 0 {
                metrics.push(("inventory_consumption".to_string(), delta.abs() as f64));
            }
        }
        self.record_metrics(metrics).await;

        let raised = self.alerts.process_inventory_alert(event.item_id).await?;
        if raised > 0 {
            info!("generated {raised} inventory alerts for item {}", event.item_id);
        }

        if delta.abs() > i128::from(self.ml_change_threshold) {
            self.run_predictions(event.item_id).await?;
        }

        Ok(Outcome::Processed)
    }

    /// Ask the prediction service for a consumption forecast and a stockout
    /// risk. Unavailable models and transport failures are skipped.
    async fn run_predictions(&self, item_id: i64) -> Result<(), HandlerError> {
        debug!("requesting predictions for item {item_id}");
        let (forecast, risk) = futures::future::join(
            self.predictor.predict_consumption(item_id, self.ml_horizon_days),
            self.predictor.predict_stockout_risk(item_id),
        )
        .await;

        match forecast {
            Ok(Some(forecast)) => {
                self.record_metrics(vec![
                    ("ml_predictions".to_string(), 1.0),
                    (
                        "ml_forecast_consumption".to_string(),
                        forecast.predicted_consumption,
                    ),
                ])
                .await;
            }
            Ok(None) => debug!("consumption model unavailable for item {item_id}"),
            Err(e) => warn!("consumption prediction failed for item {item_id}: {e}"),
        }

        match risk {
            Ok(Some(risk)) => {
                self.record_metrics(vec![("ml_predictions".to_string(), 1.0)])
                    .await;
                self.alerts.process_risk_alert(item_id, &risk).await?;
            }
            Ok(None) => debug!("stockout risk model unavailable for item {item_id}"),
            Err(e) => warn!("stockout risk prediction failed for item {item_id}: {e}"),
        }

        Ok(())
    }

    // ========================================================================
    // order-status-changed
    // ========================================================================

    #[instrument(skip(self, event), fields(order_id = event.order_id))]
    async fn process_order_event(&self, event: &OrderStatusChanged) -> Result<Outcome, HandlerError> {
        info!(
            "PO status change: PO {}, {} -> {}",
            event.order_id,
            event.old_status,
            event.new_status
        );

        if self.store.get_order(event.order_id).await?.is_none() {
            warn!("purchase order {} not found", event.order_id);
            return Ok(Outcome::Skipped);
        }

        let status = OrderStatus::parse(&event.new_status);
        let mut metrics = vec![
            ("po_status_changes".to_string(), 1.0),
            (format!("po_status_{status}"), 1.0),
        ];
        match status {
            OrderStatus::Received => metrics.push(("po_deliveries_completed".to_string(), 1.0)),
            OrderStatus::Shipped => metrics.push(("po_shipments".to_string(), 1.0)),
            _ => {}
        }
        self.record_metrics(metrics).await;

        let raised = self.alerts.process_delivery_alert(event.order_id).await?;
        if raised > 0 {
            info!("generated {raised} delivery alerts for PO {}", event.order_id);
        }

        if status == OrderStatus::Received {
            let received = self
                .store
                .apply_order_receipt(event.order_id, self.clock.now())
                .await?;
            for line in &received {
                debug!(
                    "credited {} units of item {} (stock now {})",
                    line.quantity, line.item_id, line.new_stock
                );
            }
            info!(
                "processed PO receipt {}: {} lines credited",
                event.order_id,
                received.len()
            );
        }

        Ok(Outcome::Processed)
    }

    // ========================================================================
    // alert-generated
    // ========================================================================

    async fn process_alert_event(&self, event: &AlertGenerated) -> Result<Outcome, HandlerError> {
        self.record_metrics(vec![
            ("alerts_generated".to_string(), 1.0),
            (format!("alerts_{}", event.severity), 1.0),
            (format!("alerts_{}", event.alert_type), 1.0),
        ])
        .await;

        if event.severity >= Severity::High {
            warn!(
                "high-severity alert generated: {} (ID: {})",
                event.alert_type, event.alert_id
            );
        } else {
            debug!("alert {} generated: {}", event.alert_id, event.alert_type);
        }
        Ok(Outcome::Processed)
    }

    // ========================================================================
    // forecast-updated
    // ========================================================================

    #[instrument(skip(self, event), fields(item_id = event.item_id))]
    async fn process_forecast_event(&self, event: &ForecastUpdated) -> Result<Outcome, HandlerError> {
        let predicted = match event.predicted_consumption {
            Some(predicted) => predicted,
            None => self
                .store
                .latest_forecast(event.item_id, self.clock.today())
                .await?
                .unwrap_or(0.0),
        };

        self.record_metrics(vec![
            ("forecasts_generated".to_string(), 1.0),
            ("forecast_total_consumption".to_string(), predicted),
        ])
        .await;

        if predicted <= 0.0 {
            return Ok(Outcome::Processed);
        }

        let since = self.clock.now() - Duration::days(CONSUMPTION_WINDOW_DAYS);
        let actual = self.store.consumption_since(event.item_id, since).await?;
        if actual <= 0.0 {
            return Ok(Outcome::Processed);
        }

        let spikes = self
            .alerts
            .process_demand_spike_alert(event.item_id, actual, Some(predicted))
            .await?;
        if spikes > 0 {
            info!("generated {spikes} demand spike alerts for item {}", event.item_id);
            return Ok(Outcome::Processed);
        }

        let accuracy = thresholds::forecast_accuracy(actual, predicted);
        self.alerts
            .process_forecast_alert(event.item_id, accuracy)
            .await?;
        Ok(Outcome::Processed)
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    async fn finish(&self, kind: EventKind, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis() as f64;

        let processed = {
            let mut stats = self.stats_mut();
            stats.events_processed += 1;
            stats.last_processed = Some(self.clock.now());
            stats.events_processed
        };

        self.record_metrics(vec![
            (format!("processing_time_{kind}_ms"), elapsed_ms),
            ("events_processed_total".to_string(), 1.0),
        ])
        .await;

        if self.maintenance_every > 0 && processed % self.maintenance_every == 0 {
            match self.alerts.run_maintenance().await {
                Ok(report) => info!(
                    "alert maintenance after {processed} events: {} resolved, {} cleaned",
                    report.resolved, report.cleaned
                ),
                Err(e) => error!("alert maintenance failed: {e}"),
            }
        }

        debug!("{kind} processed in {elapsed_ms}ms");
    }
}

#[async_trait]
impl EventHandler for EventProcessor {
    async fn handle(&self, event: &EventPayload) -> Result<(), HandlerError> {
        let started = Instant::now();
        let result = match event {
            EventPayload::InventoryChanged(e) => self.process_inventory_event(e).await,
            EventPayload::OrderStatusChanged(e) => self.process_order_event(e).await,
            EventPayload::AlertGenerated(e) => self.process_alert_event(e).await,
            EventPayload::ForecastUpdated(e) => self.process_forecast_event(e).await,
        };

        match result {
            Ok(Outcome::Processed) => {
                self.finish(event.kind(), started).await;
                Ok(())
            }
            Ok(Outcome::Skipped) => Ok(()),
            Err(e) => {
                self.stats_mut().processing_errors += 1;
                Err(e)
            }
        }
    }
}
