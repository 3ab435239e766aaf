//! Alert lifecycle: auto-resolution, retention and the dashboard

use chrono::{Days, Duration};
use pretty_assertions::assert_eq;
use procurement_lighthouse::{
    Clock,
    alerts::{AlertStatus, AlertType, MaintenanceReport, Severity},
    config::Config,
    storage::OrderStatus,
};

use crate::helpers::*;

#[tokio::test]
async fn test_stock_out_resolves_once_restocked() {
    let h = Harness::new();
    h.store.upsert_item(item(1, 0, 10)).await;
    h.dispatch(&[inventory_event(1, 4, 0)]).await;

    let report = h.pipeline.alerts().run_maintenance().await.unwrap();
    assert_eq!(report.resolved, 0);
    assert!(h.store.alerts().await[0].is_active());

    h.store.set_stock(1, 5).await;
    h.clock.advance(Duration::minutes(5));
    let report = h.pipeline.alerts().run_maintenance().await.unwrap();
    assert_eq!(report.resolved, 1);

    let alert = &h.store.alerts().await[0];
    assert_eq!(alert.status, AlertStatus::Resolved);
    assert_eq!(alert.resolved_at, Some(h.clock.now()));
    assert_eq!(
        alert.metadata["resolution_note"],
        "Auto-resolved: condition improved"
    );
}

#[tokio::test]
async fn test_overdue_delivery_resolves_on_receipt() {
    let h = Harness::new();
    h.store
        .upsert_order(order(4, OrderStatus::Shipped, Some(h.today() - Days::new(9))))
        .await;
    h.dispatch(&[order_event(4, "approved", "shipped")]).await;
    assert_eq!(h.store.alerts().await[0].severity, Severity::High);

    h.store.set_order_status(4, OrderStatus::Received).await;
    h.dispatch(&[order_event(4, "shipped", "received")]).await;
    let report = h.pipeline.alerts().run_maintenance().await.unwrap();

    assert_eq!(report.resolved, 1);
    assert!(!h.store.alerts().await[0].is_active());
}

#[tokio::test]
async fn test_other_alert_types_are_not_auto_resolved() {
    let h = Harness::new();
    h.store.upsert_item(item(2, 40, 10)).await;
    h.store
        .add_consumption(2, 100.0, h.clock.now() - Duration::days(1))
        .await;
    h.dispatch(&[forecast_event(2, 20.0)]).await;

    let report = h.pipeline.alerts().run_maintenance().await.unwrap();

    assert_eq!(report.resolved, 0);
    let alert = &h.store.alerts().await[0];
    assert_eq!(alert.alert_type, AlertType::DemandSpike);
    assert!(alert.is_active());
}

#[tokio::test]
async fn test_retention_purges_old_resolved_alerts() {
    let h = Harness::new();
    h.store.upsert_item(item(1, 0, 10)).await;
    h.dispatch(&[inventory_event(1, 1, 0)]).await;
    h.store.set_stock(1, 20).await;
    assert_eq!(
        h.pipeline.alerts().run_maintenance().await.unwrap(),
        MaintenanceReport {
            resolved: 1,
            cleaned: 0
        }
    );

    h.clock.advance(Duration::days(8));
    let report = h.pipeline.alerts().run_maintenance().await.unwrap();
    assert_eq!(report.cleaned, 1);
    assert!(h.store.alerts().await.is_empty());
}

#[tokio::test]
async fn test_cleanup_is_rate_limited() {
    let mut config = Config::default();
    config.alerts.retention_days = 0;
    let h = Harness::with_config(config);
    h.store.upsert_item(item(1, 0, 10)).await;
    h.dispatch(&[inventory_event(1, 1, 0)]).await;
    h.store.set_stock(1, 20).await;
    h.pipeline.alerts().run_maintenance().await.unwrap();

    h.clock.advance(Duration::hours(1));
    let report = h.pipeline.alerts().run_maintenance().await.unwrap();
    assert_eq!(report.cleaned, 0);
    assert_eq!(h.store.alerts().await.len(), 1);

    h.clock.advance(Duration::hours(23));
    let report = h.pipeline.alerts().run_maintenance().await.unwrap();
    assert_eq!(report.cleaned, 1);
}

#[tokio::test]
async fn test_explicit_cleanup_uses_its_own_horizon() {
    let h = Harness::new();
    h.store.upsert_item(item(1, 0, 10)).await;
    h.dispatch(&[inventory_event(1, 1, 0)]).await;
    h.store.set_stock(1, 20).await;
    h.pipeline.alerts().run_maintenance().await.unwrap();
    h.clock.advance(Duration::days(10));

    let manager = h.pipeline.alerts().manager();
    assert_eq!(manager.cleanup_old_alerts(30).await.unwrap(), 0);
    assert_eq!(manager.cleanup_old_alerts(9).await.unwrap(), 1);
}

#[tokio::test]
async fn test_manual_resolution() {
    let h = Harness::new();
    h.store.upsert_item(item(1, 3, 10)).await;
    h.dispatch(&[inventory_event(1, 4, 3)]).await;
    let alert_id = h.store.alerts().await[0].alert_id;
    let manager = h.pipeline.alerts().manager();

    assert!(manager
        .resolve_alert(alert_id, Some("reordered by hand"))
        .await
        .unwrap());
    assert!(!manager.resolve_alert(alert_id, None).await.unwrap());
    assert!(!manager.resolve_alert(9999, None).await.unwrap());

    let alert = &h.store.alerts().await[0];
    assert_eq!(alert.metadata["resolution_note"], "reordered by hand");
}

#[tokio::test]
async fn test_dashboard_summary() {
    let h = Harness::new();
    h.store.upsert_item(item(1, 0, 10)).await;
    h.store.upsert_item(item(2, 5, 10)).await;
    h.store
        .upsert_order(order(3, OrderStatus::Shipped, Some(h.today() - Days::new(2))))
        .await;

    h.dispatch(&[
        inventory_event(1, 1, 0),
        inventory_event(2, 6, 5),
        order_event(3, "approved", "shipped"),
    ])
    .await;

    let data = h.pipeline.alerts().dashboard_data().await.unwrap();
    assert_eq!(data.summary.total_active, 3);
    assert_eq!(data.summary.recent_alerts_1h, 3);
    assert_eq!(data.summary.active_by_severity.get(&Severity::Critical), Some(&1));
    assert_eq!(data.summary.active_by_severity.get(&Severity::Medium), Some(&2));
    assert_eq!(data.summary.active_by_type.get(&AlertType::DeliveryOverdue), Some(&1));
    assert_eq!(data.active_alerts.len(), 3);
    assert_eq!(data.stats.alerts_generated, 3);

    let limited = h
        .pipeline
        .alerts()
        .dashboard_data_with_limit(1)
        .await
        .unwrap();
    assert_eq!(limited.active_alerts.len(), 1);
    assert_eq!(limited.active_alerts[0].severity, Severity::Critical);

    h.clock.advance(Duration::hours(2));
    let later = h.pipeline.alerts().dashboard_data().await.unwrap();
    assert_eq!(later.summary.recent_alerts_1h, 0);
    assert_eq!(later.summary.total_active, 3);
}
