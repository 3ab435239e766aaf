//! ML prediction service contract, against a mock HTTP server

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use procurement_lighthouse::{
    alerts::{AlertType, Severity},
    config::{Config, MlConfig},
    ml::{HttpPredictor, Predictor, PredictorError, RiskLevel, predictor_from_config},
};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn predictor(server: &MockServer) -> HttpPredictor {
    HttpPredictor::new(server.uri(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_consumption_forecast() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict/consumption"))
        .and(body_json(json!({ "item_id": 7, "horizon_days": 14 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "predicted_consumption": 120.5,
            "confidence": 0.82
        })))
        .expect(1)
        .mount(&server)
        .await;

    let forecast = predictor(&server)
        .predict_consumption(7, 14)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(forecast.predicted_consumption, 120.5);
    assert_eq!(forecast.confidence, Some(0.82));
}

#[tokio::test]
async fn test_stockout_risk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict/stockout-risk"))
        .and(body_json(json!({ "item_id": 3 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "risk_probability": 0.72,
            "risk_level": "high",
            "days_until_stockout": 4.0,
            "model_version": "gbm-2024-05"
        })))
        .mount(&server)
        .await;

    let risk = predictor(&server)
        .predict_stockout_risk(3)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(risk.risk_level, RiskLevel::High);
    assert_eq!(risk.days_until_stockout, Some(4.0));
    assert_eq!(risk.model_version.as_deref(), Some("gbm-2024-05"));
}

#[tokio::test]
async fn test_missing_model_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(path("/predict/consumption"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(path("/predict/stockout-risk"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let predictor = predictor(&server);
    assert!(predictor.predict_consumption(1, 7).await.unwrap().is_none());
    assert!(predictor.predict_stockout_risk(1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(path("/predict/stockout-risk"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert_matches!(
        predictor(&server).predict_stockout_risk(1).await,
        Err(PredictorError::Status { status }) if status.as_u16() == 500
    );
}

#[tokio::test]
async fn test_large_change_raises_risk_alert() {
    let server = MockServer::start().await;
    Mock::given(path("/predict/consumption"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "predicted_consumption": 300.0
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/predict/stockout-risk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "risk_probability": 0.91,
            "days_until_stockout": 2.0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config {
        ml: MlConfig {
            base_url: Some(server.uri()),
            ..MlConfig::default()
        },
        ..Config::default()
    };
    let predictor = predictor_from_config(&config.ml).unwrap();
    let h = Harness::with_predictor(config, predictor);
    h.store.upsert_item(item(11, 60, 10)).await;

    // Below the change threshold: no prediction requests
    h.dispatch(&[inventory_event(11, 65, 60)]).await;
    h.dispatch(&[inventory_event(11, 100, 60)]).await;

    let alerts = h.store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::ForecastDeviation);
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert_eq!(alerts[0].metadata["risk_level"], "critical");
    assert_eq!(alerts[0].metadata["ml_model"], "unknown");
    assert_eq!(h.store.metric_total("ml_forecast_consumption").await, 300.0);
}

#[tokio::test]
async fn test_unreachable_service_does_not_fail_event() {
    let config = Config {
        ml: MlConfig {
            // Nothing listens here
            base_url: Some("http://127.0.0.1:9".to_string()),
            timeout_secs: 1,
            ..MlConfig::default()
        },
        ..Config::default()
    };
    let predictor: Arc<dyn Predictor> = predictor_from_config(&config.ml).unwrap();
    let h = Harness::with_predictor(config, predictor);
    h.store.upsert_item(item(1, 60, 10)).await;

    h.dispatch(&[inventory_event(1, 90, 60)]).await;

    let stats = h.pipeline.processor().stats();
    assert_eq!(stats.events_processed, 1);
    assert_eq!(stats.processing_errors, 0);
}
