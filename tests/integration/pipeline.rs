//! End-to-end event handling through the router
//!
//! These tests push raw notifications through `EventRouter::dispatch_batch`
//! and check what lands in the store: alerts, audit entries and inventory.

use chrono::{Days, Duration};
use pretty_assertions::assert_eq;
use procurement_lighthouse::{
    Clock,
    alerts::{AlertType, DedupFailurePolicy, EntityRef, Severity},
    channel::NotificationEvent,
    config::Config,
    events::DispatchReport,
    storage::{OrderStatus, StorageOp},
};

use crate::helpers::*;

#[tokio::test]
async fn test_stock_low_dedup_window() {
    let h = Harness::new();
    h.store.upsert_item(item(42, 8, 10)).await;

    h.dispatch(&[inventory_event(42, 9, 8)]).await;
    h.clock.advance(Duration::minutes(10));
    h.dispatch(&[inventory_event(42, 8, 8)]).await;

    let alerts = h.store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::StockLow);
    assert_eq!(alerts[0].entity, EntityRef::Item(42));

    h.clock.advance(Duration::minutes(51));
    h.dispatch(&[inventory_event(42, 8, 7)]).await;

    assert_eq!(h.store.alerts().await.len(), 2);
}

#[tokio::test]
async fn test_dedup_is_per_entity() {
    let h = Harness::new();
    h.store.upsert_item(item(1, 2, 10)).await;
    h.store.upsert_item(item(2, 2, 10)).await;

    h.dispatch(&[inventory_event(1, 3, 2), inventory_event(2, 3, 2)])
        .await;

    let entities: Vec<EntityRef> = h.store.alerts().await.iter().map(|a| a.entity).collect();
    assert_eq!(entities, vec![EntityRef::Item(1), EntityRef::Item(2)]);
}

#[tokio::test]
async fn test_stock_boundaries() {
    let h = Harness::new();
    h.store.upsert_item(item(1, 0, 10)).await;
    h.store.upsert_item(item(2, 100, 100)).await;
    h.store.upsert_item(item(3, 121, 100)).await;

    h.dispatch(&[
        inventory_event(1, 1, 0),
        inventory_event(2, 101, 100),
        inventory_event(3, 122, 121),
    ])
    .await;

    let alerts = h.store.alerts().await;
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].alert_type, AlertType::StockOut);
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert_eq!(alerts[1].alert_type, AlertType::StockLow);
    assert_eq!(alerts[1].severity, Severity::Medium);
}

#[tokio::test]
async fn test_batch_is_audited_in_order_despite_failure() {
    let h = Harness::new();
    h.store.upsert_item(item(1, 50, 10)).await;
    h.store.upsert_item(item(2, 50, 10)).await;
    h.store
        .upsert_order(order(3, OrderStatus::Shipped, Some(h.today())))
        .await;
    h.store.fail_on(StorageOp::GetOrder);

    let report = h
        .pipeline
        .router()
        .dispatch_batch(&[
            inventory_event(1, 40, 50),
            inventory_event(2, 45, 50),
            order_event(3, "approved", "shipped"),
        ])
        .await;

    assert_eq!(
        report,
        DispatchReport {
            handled: 2,
            failed: 1,
            dropped: 0
        }
    );

    let audited: Vec<(String, i64)> = h
        .store
        .event_log()
        .await
        .iter()
        .map(|entry| {
            let id = entry.payload["item_id"]
                .as_i64()
                .or_else(|| entry.payload["order_id"].as_i64())
                .unwrap();
            (entry.event_type.clone(), id)
        })
        .collect();
    assert_eq!(
        audited,
        vec![
            ("inventory_changed".to_string(), 1),
            ("inventory_changed".to_string(), 2),
            ("order_status_changed".to_string(), 3),
        ]
    );

    let stats = h.pipeline.processor().stats();
    assert_eq!(stats.events_processed, 2);
    assert_eq!(stats.processing_errors, 1);
}

#[tokio::test]
async fn test_received_order_is_credited_once() {
    let h = Harness::new();
    h.store.upsert_item(item(5, 10, 4)).await;
    h.store.upsert_item(item(6, 0, 4)).await;
    h.store
        .upsert_order(order(20, OrderStatus::Received, Some(h.today())))
        .await;
    h.store.add_line_item(line(20, 5, 30)).await;
    h.store.add_line_item(line(20, 6, 12)).await;

    let received = order_event(20, "shipped", "received");
    h.dispatch(&[received.clone()]).await;
    h.dispatch(&[received]).await;

    assert_eq!(h.store.item(5).await.unwrap().current_stock, 40);
    assert_eq!(h.store.item(6).await.unwrap().current_stock, 12);
    assert_eq!(h.store.metric_total("po_deliveries_completed").await, 2.0);
    assert_eq!(h.store.event_log().await.len(), 2);
}

#[tokio::test]
async fn test_delivery_severity_by_lateness() {
    let h = Harness::new();
    let today = h.today();
    h.store
        .upsert_order(order(1, OrderStatus::Shipped, Some(today - Days::new(1))))
        .await;
    h.store
        .upsert_order(order(2, OrderStatus::Shipped, Some(today - Days::new(7))))
        .await;
    h.store
        .upsert_order(order(3, OrderStatus::Shipped, Some(today)))
        .await;
    h.store
        .upsert_order(order(4, OrderStatus::Received, Some(today - Days::new(7))))
        .await;

    h.dispatch(&[
        order_event(1, "approved", "shipped"),
        order_event(2, "approved", "shipped"),
        order_event(3, "approved", "shipped"),
        order_event(4, "shipped", "received"),
    ])
    .await;

    let raised: Vec<(EntityRef, Severity)> = h
        .store
        .alerts()
        .await
        .iter()
        .map(|alert| (alert.entity, alert.severity))
        .collect();
    assert_eq!(
        raised,
        vec![
            (EntityRef::Order(1), Severity::Medium),
            (EntityRef::Order(2), Severity::High),
        ]
    );
    assert_eq!(h.store.metric_total("po_shipments").await, 3.0);
}

#[tokio::test]
async fn test_malformed_and_unknown_notifications_are_dropped() {
    let h = Harness::new();
    h.store.upsert_item(item(1, 50, 10)).await;

    let report = h
        .pipeline
        .router()
        .dispatch_batch(&[
            NotificationEvent::new("supplier-changed", r#"{"supplier_id": 1}"#),
            NotificationEvent::new("inventory-changed", "{\"item_id\": "),
            NotificationEvent::new("inventory-changed", r#""just a string""#),
            inventory_event(1, 49, 50),
        ])
        .await;

    assert_eq!(report.dropped, 3);
    assert_eq!(report.handled, 1);
    assert_eq!(h.store.event_log().await.len(), 1);
}

#[tokio::test]
async fn test_payloads_missing_required_fields_are_dropped() {
    let h = Harness::new();
    h.store.upsert_item(item(1, 50, 10)).await;

    let report = h
        .pipeline
        .router()
        .dispatch_batch(&[
            NotificationEvent::new(
                "inventory-changed",
                r#"{"item_id": 1, "old_quantity": 50, "change_type": "UPDATE"}"#,
            ),
            NotificationEvent::new("forecast-updated", r#"{"item_id": 1}"#),
            NotificationEvent::new("order-status-changed", r#"{"order_id": 1, "new_status": "shipped"}"#),
        ])
        .await;

    assert_eq!(
        report,
        DispatchReport {
            handled: 0,
            failed: 0,
            dropped: 3
        }
    );
    assert!(h.store.metrics().await.is_empty());
    assert!(h.store.event_log().await.is_empty());
    assert_eq!(h.pipeline.processor().stats().events_processed, 0);
}

#[tokio::test]
async fn test_extreme_quantity_change_is_processed() {
    let h = Harness::new();
    h.store.upsert_item(item(1, 1, 10)).await;

    let report = h
        .pipeline
        .router()
        .dispatch_batch(&[
            NotificationEvent::new(
                "inventory-changed",
                r#"{"item_id": 1, "old_quantity": -9223372036854775808, "new_quantity": 1, "change_type": "UPDATE"}"#,
            ),
            inventory_event(1, 2, 1),
        ])
        .await;

    assert_eq!(report.handled, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(h.pipeline.processor().stats().events_processed, 2);
}

#[tokio::test]
async fn test_legacy_channel_names_are_routed() {
    let h = Harness::new();
    h.store
        .upsert_order(order(8, OrderStatus::Shipped, Some(h.today() - Days::new(3))))
        .await;

    h.dispatch(&[NotificationEvent::new(
        "po_status_changed",
        r#"{"po_id": 8, "old_status": "approved", "new_status": "shipped"}"#,
    )])
    .await;

    let alerts = h.store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::DeliveryOverdue);
}

#[tokio::test]
async fn test_dedup_failure_policy() {
    let closed = Harness::new();
    closed.store.upsert_item(item(1, 0, 10)).await;
    closed.store.fail_on(StorageOp::DedupLookup);
    closed.dispatch(&[inventory_event(1, 2, 0)]).await;

    assert!(closed.store.alerts().await.is_empty());
    assert_eq!(closed.pipeline.processor().stats().processing_errors, 1);

    let mut config = Config::default();
    config.alerts.dedup_failure = DedupFailurePolicy::FailOpen;
    let open = Harness::with_config(config);
    open.store.upsert_item(item(1, 0, 10)).await;
    open.store.fail_on(StorageOp::DedupLookup);
    open.dispatch(&[inventory_event(1, 2, 0)]).await;

    assert_eq!(open.store.alerts().await.len(), 1);
}

#[tokio::test]
async fn test_forecast_event_raises_demand_spike() {
    let h = Harness::new();
    h.store.upsert_item(item(9, 40, 10)).await;
    h.store
        .add_consumption(9, 65.0, h.clock.now() - Duration::days(3))
        .await;

    h.dispatch(&[forecast_event(9, 30.0)]).await;

    let alerts = h.store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::DemandSpike);
    assert_eq!(alerts[0].severity, Severity::Medium);
    assert_eq!(h.store.metric_total("forecasts_generated").await, 1.0);
}
