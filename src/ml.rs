//! Client side of the ML prediction service.
//!
//! The service is consumed through two endpoints:
//!
//! - `POST {base}/predict/consumption` with `{item_id, horizon_days}`
//! - `POST {base}/predict/stockout-risk` with `{item_id}`
//!
//! A 404 or 503 means no model is loaded; that is reported as `Ok(None)` so
//! callers can skip the prediction without treating it as a failure.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::alerts::Severity;
use crate::config::MlConfig;

#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("prediction request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("prediction service returned {status}")]
    Status { status: StatusCode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_probability(probability: f64) -> Self {
        if probability >= 0.8 {
            RiskLevel::Critical
        } else if probability >= 0.6 {
            RiskLevel::High
        } else if probability >= 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Severity of the alert raised for this level, if any
    pub fn alert_severity(&self) -> Option<Severity> {
        match self {
            RiskLevel::Critical => Some(Severity::Critical),
            RiskLevel::High => Some(Severity::High),
            RiskLevel::Medium | RiskLevel::Low => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionForecast {
    pub predicted_consumption: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockoutRisk {
    pub risk_probability: f64,
    pub risk_level: RiskLevel,
    pub days_until_stockout: Option<f64>,
    pub model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RiskResponse {
    risk_probability: f64,
    #[serde(default)]
    risk_level: Option<String>,
    #[serde(default)]
    days_until_stockout: Option<f64>,
    #[serde(default)]
    model_version: Option<String>,
}

impl From<RiskResponse> for StockoutRisk {
    fn from(response: RiskResponse) -> Self {
        // Unknown or missing levels fall back to the probability thresholds.
        let risk_level = response
            .risk_level
            .as_deref()
            .and_then(|level| level.parse().ok())
            .unwrap_or_else(|| RiskLevel::from_probability(response.risk_probability));

        StockoutRisk {
            risk_probability: response.risk_probability,
            risk_level,
            days_until_stockout: response.days_until_stockout,
            model_version: response.model_version,
        }
    }
}

/// Source of consumption forecasts and stockout risk predictions
#[async_trait]
pub trait Predictor: Send + Sync + fmt::Debug {
    /// `Ok(None)` when no model is available
    async fn predict_consumption(
        &self,
        item_id: i64,
        horizon_days: u32,
    ) -> Result<Option<ConsumptionForecast>, PredictorError>;

    /// `Ok(None)` when no model is available
    async fn predict_stockout_risk(
        &self,
        item_id: i64,
    ) -> Result<Option<StockoutRisk>, PredictorError>;
}

/// Predictor used when no prediction service is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailablePredictor;

#[async_trait]
impl Predictor for UnavailablePredictor {
    async fn predict_consumption(
        &self,
        _item_id: i64,
        _horizon_days: u32,
    ) -> Result<Option<ConsumptionForecast>, PredictorError> {
        Ok(None)
    }

    async fn predict_stockout_risk(
        &self,
        _item_id: i64,
    ) -> Result<Option<StockoutRisk>, PredictorError> {
        Ok(None)
    }
}

/// HTTP client for the prediction service
#[derive(Debug, Clone)]
pub struct HttpPredictor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPredictor {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PredictorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PredictorError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<Option<T>, PredictorError>
    where
        B: Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        trace!("requesting prediction from {url}");

        let response = self.client.post(&url).json(body).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::SERVICE_UNAVAILABLE => {
                debug!("no model available at {url}");
                Ok(None)
            }
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(PredictorError::Status { status }),
        }
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    #[instrument(skip(self))]
    async fn predict_consumption(
        &self,
        item_id: i64,
        horizon_days: u32,
    ) -> Result<Option<ConsumptionForecast>, PredictorError> {
        self.post(
            "/predict/consumption",
            &serde_json::json!({ "item_id": item_id, "horizon_days": horizon_days }),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn predict_stockout_risk(
        &self,
        item_id: i64,
    ) -> Result<Option<StockoutRisk>, PredictorError> {
        let response: Option<RiskResponse> = self
            .post(
                "/predict/stockout-risk",
                &serde_json::json!({ "item_id": item_id }),
            )
            .await?;
        Ok(response.map(StockoutRisk::from))
    }
}

/// Build the predictor for the given configuration
pub fn predictor_from_config(config: &MlConfig) -> Result<Arc<dyn Predictor>, PredictorError> {
    match &config.base_url {
        Some(base_url) => Ok(Arc::new(HttpPredictor::new(
            base_url.clone(),
            config.timeout(),
        )?)),
        None => Ok(Arc::new(UnavailablePredictor)),
    }
}
