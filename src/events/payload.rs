//! Event kinds and their typed payloads.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::alerts::{AlertType, Severity};
use crate::config::ChannelNames;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("invalid {kind} payload: {source}")]
    Invalid {
        kind: EventKind,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InventoryChanged,
    OrderStatusChanged,
    AlertGenerated,
    ForecastUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::InventoryChanged,
        EventKind::OrderStatusChanged,
        EventKind::AlertGenerated,
        EventKind::ForecastUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::InventoryChanged => "inventory_changed",
            EventKind::OrderStatusChanged => "order_status_changed",
            EventKind::AlertGenerated => "alert_generated",
            EventKind::ForecastUpdated => "forecast_updated",
        }
    }

    /// Channel name historically used for this kind
    fn legacy_channel(&self) -> &'static str {
        match self {
            EventKind::InventoryChanged => "inventory_changed",
            EventKind::OrderStatusChanged => "po_status_changed",
            EventKind::AlertGenerated => "alert_generated",
            EventKind::ForecastUpdated => "forecast_updated",
        }
    }

    pub fn channel<'a>(&self, names: &'a ChannelNames) -> &'a str {
        match self {
            EventKind::InventoryChanged => &names.inventory_changed,
            EventKind::OrderStatusChanged => &names.order_status_changed,
            EventKind::AlertGenerated => &names.alert_generated,
            EventKind::ForecastUpdated => &names.forecast_updated,
        }
    }

    /// Default and legacy names also accepted for this kind, minus the
    /// configured one
    pub fn aliases(&self, names: &ChannelNames) -> Vec<String> {
        let configured = self.channel(names);
        let default = self.channel(&ChannelNames::default()).to_string();
        let mut aliases = Vec::with_capacity(2);
        for alias in [default, self.legacy_channel().to_string()] {
            if alias != configured && !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        aliases
    }

    /// Resolve a channel name: the configured names first, then the default
    /// and legacy underscore names as aliases.
    pub fn from_channel(channel: &str, names: &ChannelNames) -> Option<Self> {
        let defaults = ChannelNames::default();
        Self::ALL
            .into_iter()
            .find(|kind| kind.channel(names) == channel)
            .or_else(|| {
                Self::ALL.into_iter().find(|kind| {
                    kind.channel(&defaults) == channel || kind.legacy_channel() == channel
                })
            })
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InventoryChanged {
    pub item_id: i64,
    pub old_quantity: i64,
    pub new_quantity: i64,
    pub change_type: String,
}

impl InventoryChanged {
    /// Quantity change, widened so that any pair of quantities fits
    pub fn delta(&self) -> i128 {
        i128::from(self.new_quantity) - i128::from(self.old_quantity)
    }

    pub fn is_update(&self) -> bool {
        self.change_type.eq_ignore_ascii_case("update")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderStatusChanged {
    #[serde(alias = "po_id")]
    pub order_id: i64,
    pub old_status: String,
    pub new_status: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AlertGenerated {
    pub alert_id: i64,
    pub alert_type: AlertType,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ForecastUpdated {
    pub forecast_id: i64,
    pub item_id: i64,
    #[serde(default)]
    pub predicted_consumption: Option<f64>,
}

/// Payload of a notification, decoded according to its channel
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    InventoryChanged(InventoryChanged),
    OrderStatusChanged(OrderStatusChanged),
    AlertGenerated(AlertGenerated),
    ForecastUpdated(ForecastUpdated),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::InventoryChanged(_) => EventKind::InventoryChanged,
            EventPayload::OrderStatusChanged(_) => EventKind::OrderStatusChanged,
            EventPayload::AlertGenerated(_) => EventKind::AlertGenerated,
            EventPayload::ForecastUpdated(_) => EventKind::ForecastUpdated,
        }
    }

    /// Decode raw payload text into a JSON object
    pub fn parse_object(raw: &str) -> Result<Value, PayloadError> {
        let value: Value = serde_json::from_str(raw).map_err(PayloadError::Malformed)?;
        if !value.is_object() {
            return Err(PayloadError::NotAnObject);
        }
        Ok(value)
    }

    pub fn from_value(kind: EventKind, value: &Value) -> Result<Self, PayloadError> {
        fn decode<T: serde::de::DeserializeOwned>(
            kind: EventKind,
            value: &Value,
        ) -> Result<T, PayloadError> {
            T::deserialize(value).map_err(|source| PayloadError::Invalid { kind, source })
        }

        Ok(match kind {
            EventKind::InventoryChanged => EventPayload::InventoryChanged(decode(kind, value)?),
            EventKind::OrderStatusChanged => {
                EventPayload::OrderStatusChanged(decode(kind, value)?)
            }
            EventKind::AlertGenerated => EventPayload::AlertGenerated(decode(kind, value)?),
            EventKind::ForecastUpdated => EventPayload::ForecastUpdated(decode(kind, value)?),
        })
    }
}
