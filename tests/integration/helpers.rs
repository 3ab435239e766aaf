//! Helper functions for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use procurement_lighthouse::{
    Clock, ManualClock, Pipeline,
    channel::{ConnectionError, NotificationEvent, NotificationSource},
    config::Config,
    ml::{Predictor, UnavailablePredictor},
    storage::{InventoryItem, LineItem, MemoryBackend, OrderStatus, PurchaseOrder},
};
use tokio::time::Instant;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
}

/// Pipeline over an in-memory store with a manual clock
pub struct Harness {
    pub store: Arc<MemoryBackend>,
    pub clock: ManualClock,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_predictor(config, Arc::new(UnavailablePredictor))
    }

    pub fn with_predictor(config: Config, predictor: Arc<dyn Predictor>) -> Self {
        let store = Arc::new(MemoryBackend::new());
        let clock = ManualClock::new(start_time());
        let pipeline = Pipeline::new(config, store.clone(), predictor, Arc::new(clock.clone()))
            .expect("valid test config");
        let pipeline = Arc::new(pipeline);
        Self {
            store,
            clock,
            pipeline,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub async fn dispatch(&self, events: &[NotificationEvent]) {
        self.pipeline.router().dispatch_batch(events).await;
    }
}

pub fn item(item_id: i64, current_stock: i64, safety_stock: i64) -> InventoryItem {
    InventoryItem {
        item_id,
        item_name: format!("Item {item_id}"),
        current_stock,
        safety_stock,
        unit_cost: 3.25,
        location: Some("Main warehouse".to_string()),
        last_updated: start_time(),
    }
}

pub fn order(order_id: i64, status: OrderStatus, expected: Option<NaiveDate>) -> PurchaseOrder {
    PurchaseOrder {
        order_id,
        supplier_name: "Northwind".to_string(),
        status,
        created_date: start_time(),
        expected_delivery: expected,
        total_value: 1250.0,
    }
}

pub fn line(order_id: i64, item_id: i64, quantity_ordered: i64) -> LineItem {
    LineItem {
        order_id,
        item_id,
        quantity_ordered,
        quantity_received: 0,
    }
}

pub fn inventory_event(item_id: i64, old_quantity: i64, new_quantity: i64) -> NotificationEvent {
    NotificationEvent::new(
        "inventory-changed",
        format!(
            r#"{{"item_id": {item_id}, "old_quantity": {old_quantity}, "new_quantity": {new_quantity}, "change_type": "UPDATE"}}"#
        ),
    )
}

pub fn order_event(order_id: i64, old_status: &str, new_status: &str) -> NotificationEvent {
    NotificationEvent::new(
        "order-status-changed",
        format!(
            r#"{{"order_id": {order_id}, "old_status": "{old_status}", "new_status": "{new_status}"}}"#
        ),
    )
}

pub fn forecast_event(item_id: i64, predicted: f64) -> NotificationEvent {
    NotificationEvent::new(
        "forecast-updated",
        format!(r#"{{"forecast_id": 1, "item_id": {item_id}, "predicted_consumption": {predicted}}}"#),
    )
}

// ============================================================================
// Scripted notification source
// ============================================================================

#[derive(Default)]
pub struct Script {
    /// Results of successive `connect` calls; `Ok` once exhausted
    pub connect_results: VecDeque<Result<(), ConnectionError>>,
    pub connect_times: Vec<Instant>,
    pub listened: Vec<String>,
    pub inbox: VecDeque<Result<NotificationEvent, ConnectionError>>,
    /// Notifications sent on channels nobody listened on
    pub unheard: Vec<NotificationEvent>,
    pub disconnects: usize,
}

impl Script {
    /// Pop the next inbox entry, skipping notifications on channels that
    /// were never listened on, as the server would
    fn next_heard(&mut self) -> Option<Result<NotificationEvent, ConnectionError>> {
        while let Some(next) = self.inbox.pop_front() {
            match next {
                Ok(event) if !self.listened.contains(&event.channel) => self.unheard.push(event),
                other => return Some(other),
            }
        }
        None
    }
}

/// In-process stand-in for the PostgreSQL listener. Clones share one script.
#[derive(Clone, Default)]
pub struct ScriptedSource(Arc<Mutex<Script>>);

impl ScriptedSource {
    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.0.lock().unwrap()
    }

    pub fn push(&self, event: NotificationEvent) {
        self.script().inbox.push_back(Ok(event));
    }

    pub fn push_error(&self, error: ConnectionError) {
        self.script().inbox.push_back(Err(error));
    }

    pub fn fail_connects(&self, errors: usize) {
        let mut script = self.script();
        for _ in 0..errors {
            script
                .connect_results
                .push_back(Err(ConnectionError::Connect("connection refused".to_string())));
        }
    }

    /// Offsets of every connect attempt from the first one
    pub fn connect_offsets(&self) -> Vec<Duration> {
        let script = self.script();
        let Some(first) = script.connect_times.first().copied() else {
            return Vec::new();
        };
        script
            .connect_times
            .iter()
            .map(|at| at.duration_since(first))
            .collect()
    }
}

#[async_trait]
impl NotificationSource for ScriptedSource {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        let mut script = self.script();
        script.connect_times.push(Instant::now());
        script.connect_results.pop_front().unwrap_or(Ok(()))
    }

    async fn listen(&mut self, channel: &str) -> Result<(), ConnectionError> {
        self.script().listened.push(channel.to_string());
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<NotificationEvent>, ConnectionError> {
        let next = self.script().next_heard();
        match next {
            Some(result) => result.map(Some),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    fn next_buffered(&mut self) -> Option<NotificationEvent> {
        let mut script = self.script();
        loop {
            match script.inbox.front() {
                Some(Ok(event)) if !script.listened.contains(&event.channel) => {
                    if let Some(Ok(event)) = script.inbox.pop_front() {
                        script.unheard.push(event);
                    }
                }
                Some(Ok(_)) => return script.inbox.pop_front().and_then(Result::ok),
                _ => return None,
            }
        }
    }

    async fn disconnect(&mut self) {
        self.script().disconnects += 1;
    }
}
