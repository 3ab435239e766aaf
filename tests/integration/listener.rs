//! Listener actor: startup, event flow, reconnect policy and shutdown
//!
//! All tests run on a paused clock so backoff sleeps and poll timeouts
//! complete instantly and deterministically.

use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Days;
use pretty_assertions::assert_eq;
use procurement_lighthouse::{
    actors::{ListenerError, ListenerHandle, ListenerStats},
    Clock,
    alerts::AlertType,
    channel::{ConnectionError, ConnectionStatus, NotificationEvent},
    config::Config,
    storage::OrderStatus,
};

use crate::helpers::*;

/// Poll the listener until `done` holds for its stats
async fn wait_for<F>(handle: &ListenerHandle, done: F)
where
    F: Fn(&ListenerStats) -> bool,
{
    for _ in 0..1000 {
        if let Some(stats) = handle.get_stats().await {
            if done(&stats) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("listener never reached the expected state");
}

#[tokio::test(start_paused = true)]
async fn test_subscribes_to_all_configured_channels() {
    let h = Harness::new();
    let source = ScriptedSource::default();
    let (handle, worker) = ListenerHandle::spawn(source.clone(), h.pipeline.clone());

    wait_for(&handle, |stats| stats.status == ConnectionStatus::Connected).await;
    assert_eq!(
        source.script().listened,
        vec![
            "inventory-changed",
            "order-status-changed",
            "alert-generated",
            "forecast-updated",
            "inventory_changed",
            "po_status_changed",
            "alert_generated",
            "forecast_updated",
        ]
    );

    handle.shutdown().await;
    worker.await.unwrap().unwrap();
    assert_eq!(source.script().disconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_flow_through_listener() {
    let h = Harness::new();
    h.store.upsert_item(item(1, 0, 10)).await;
    h.store.upsert_item(item(2, 50, 10)).await;

    let source = ScriptedSource::default();
    source.push(inventory_event(1, 3, 0));
    source.push(inventory_event(2, 49, 50));
    source.push(inventory_event(404, 1, 2));

    let (handle, worker) = ListenerHandle::spawn(source, h.pipeline.clone());
    wait_for(&handle, |stats| stats.events_received == 3).await;

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.events_handled, 3);
    assert_eq!(stats.events_failed, 0);
    assert_eq!(stats.processing.events_processed, 2);
    assert!(stats.last_event_at.is_some());

    handle.shutdown().await;
    worker.await.unwrap().unwrap();

    let alerts = h.store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::StockOut);
    assert_eq!(h.store.event_log().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_legacy_channel_delivered_through_listener() {
    let h = Harness::new();
    h.store
        .upsert_order(order(8, OrderStatus::Shipped, Some(h.today() - Days::new(3))))
        .await;

    let source = ScriptedSource::default();
    source.push(NotificationEvent::new(
        "po_status_changed",
        r#"{"po_id": 8, "old_status": "approved", "new_status": "shipped"}"#,
    ));
    source.push(NotificationEvent::new("supplier_changed", r#"{"supplier_id": 1}"#));

    let (handle, worker) = ListenerHandle::spawn(source.clone(), h.pipeline.clone());
    wait_for(&handle, |stats| stats.events_received == 1).await;

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.events_handled, 1);
    assert_eq!(stats.last_event_at, Some(h.clock.now()));

    handle.shutdown().await;
    worker.await.unwrap().unwrap();

    let alerts = h.store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::DeliveryOverdue);
    assert_eq!(source.script().unheard.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_is_fatal() {
    let h = Harness::new();
    let source = ScriptedSource::default();
    source.push_error(ConnectionError::Lost("server closed the connection".to_string()));
    source.script().connect_results.push_back(Ok(()));
    source.fail_connects(3);

    let (_handle, worker) = ListenerHandle::spawn(source.clone(), h.pipeline.clone());
    let result = worker.await.unwrap();

    assert_matches!(
        result,
        Err(ListenerError::Session(ConnectionError::RetriesExhausted { attempts: 3 }))
    );
    assert_eq!(
        source.connect_offsets(),
        vec![
            Duration::ZERO,
            Duration::from_secs(5),
            Duration::from_secs(15),
            Duration::from_secs(35),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resubscribes() {
    let h = Harness::new();
    h.store.upsert_item(item(1, 0, 10)).await;

    let source = ScriptedSource::default();
    source.push_error(ConnectionError::Lost("reset by peer".to_string()));
    {
        let mut script = source.script();
        script.connect_results.push_back(Ok(()));
        script
            .connect_results
            .push_back(Err(ConnectionError::Connect("refused".to_string())));
    }
    source.push(inventory_event(1, 2, 0));

    let (handle, worker) = ListenerHandle::spawn(source.clone(), h.pipeline.clone());
    wait_for(&handle, |stats| stats.events_received == 1).await;

    let stats = handle.get_stats().await.unwrap();
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.status, ConnectionStatus::Connected);
    assert_eq!(source.script().listened.len(), 16);
    assert_eq!(source.script().connect_times.len(), 3);

    handle.shutdown().await;
    worker.await.unwrap().unwrap();
    assert_eq!(h.store.alerts().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_startup_failure() {
    let h = Harness::new();
    let source = ScriptedSource::default();
    source.fail_connects(1);

    let (_handle, worker) = ListenerHandle::spawn(source, h.pipeline.clone());

    assert_matches!(
        worker.await.unwrap(),
        Err(ListenerError::Startup(ConnectionError::Connect(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_command_and_ticker() {
    let mut config = Config::default();
    config.alerts.maintenance_interval_secs = 60;
    let h = Harness::with_config(config);
    h.store.upsert_item(item(1, 0, 10)).await;
    h.store.upsert_item(item(2, 0, 10)).await;

    let source = ScriptedSource::default();
    source.push(inventory_event(1, 1, 0));
    source.push(inventory_event(2, 1, 0));
    let (handle, worker) = ListenerHandle::spawn(source, h.pipeline.clone());
    wait_for(&handle, |stats| stats.events_received == 2).await;

    h.store.set_stock(1, 10).await;
    let report = handle.run_maintenance().await.unwrap();
    assert_eq!(report.resolved, 1);

    h.store.set_stock(2, 10).await;
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(h.store.alerts().await.iter().all(|alert| !alert.is_active()));
    assert!(h.pipeline.alerts().stats().last_maintenance.is_some());

    handle.shutdown().await;
    worker.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stopped_listener_reports_nothing() {
    let h = Harness::new();
    let (handle, worker) = ListenerHandle::spawn(ScriptedSource::default(), h.pipeline.clone());

    handle.shutdown().await;
    worker.await.unwrap().unwrap();

    assert!(handle.get_stats().await.is_none());
    assert!(handle.status().await.is_none());
    assert!(handle.run_maintenance().await.is_err());
}
