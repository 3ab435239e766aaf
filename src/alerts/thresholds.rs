//! Threshold policies. Everything here is pure; the manager decides whether a
//! classified condition turns into a stored alert.

use chrono::NaiveDate;

use super::{AlertType, Severity};
use crate::storage::OrderStatus;

/// Stock at or below this fraction of safety stock is low
pub const STOCK_LOW_RATIO: f64 = 1.0;
/// Stock at or below this fraction of safety stock would be high severity
pub const STOCK_CRITICAL_RATIO: f64 = 0.0;
/// A stock_low alert clears once stock exceeds safety stock by this factor
pub const STOCK_RECOVERY_FACTOR: f64 = 1.2;

pub const DELIVERY_OVERDUE_MEDIUM_DAYS: i64 = 1;
pub const DELIVERY_OVERDUE_HIGH_DAYS: i64 = 7;

pub const DEMAND_SPIKE_RATIO: f64 = 2.0;
pub const DEMAND_SPIKE_HIGH_RATIO: f64 = 3.0;

pub const FORECAST_DEVIATION_RATIO: f64 = 1.5;
pub const FORECAST_ACCURACY_MEDIUM: f64 = 0.5;

/// Current stock relative to safety stock. Without a safety stock any stock
/// at all counts as infinitely covered.
pub fn stock_ratio(current_stock: i64, safety_stock: i64) -> f64 {
    if safety_stock > 0 {
        current_stock as f64 / safety_stock as f64
    } else if current_stock > 0 {
        f64::INFINITY
    } else {
        0.0
    }
}

/// Classify a stock level. Out of stock wins over low stock.
pub fn classify_stock(current_stock: i64, safety_stock: i64) -> Option<(AlertType, Severity)> {
    if current_stock <= 0 {
        return Some((AlertType::StockOut, Severity::Critical));
    }

    let ratio = stock_ratio(current_stock, safety_stock);
    if ratio <= STOCK_LOW_RATIO {
        // ratio <= 0 implies current_stock <= 0, so High never fires here.
        let severity = if ratio <= STOCK_CRITICAL_RATIO {
            Severity::High
        } else {
            Severity::Medium
        };
        return Some((AlertType::StockLow, severity));
    }

    None
}

/// Whether the condition behind an active stock alert no longer holds
pub fn stock_condition_cleared(alert_type: AlertType, current_stock: i64, safety_stock: i64) -> bool {
    match alert_type {
        AlertType::StockOut => current_stock > 0,
        AlertType::StockLow => current_stock as f64 > safety_stock as f64 * STOCK_RECOVERY_FACTOR,
        _ => false,
    }
}

pub fn days_overdue(expected_delivery: NaiveDate, today: NaiveDate) -> i64 {
    (today - expected_delivery).num_days()
}

/// Classify an order's delivery state. Returns the severity and the number
/// of days the delivery is late.
pub fn classify_delivery(
    status: &OrderStatus,
    expected_delivery: Option<NaiveDate>,
    today: NaiveDate,
) -> Option<(Severity, i64)> {
    if status.is_terminal() {
        return None;
    }

    let days = days_overdue(expected_delivery?, today);
    if days >= DELIVERY_OVERDUE_HIGH_DAYS {
        Some((Severity::High, days))
    } else if days >= DELIVERY_OVERDUE_MEDIUM_DAYS {
        Some((Severity::Medium, days))
    } else {
        None
    }
}

/// Classify actual consumption against the forecast. Returns the severity
/// and the consumption ratio.
pub fn classify_demand_spike(actual: f64, predicted: f64) -> Option<(Severity, f64)> {
    if predicted <= 0.0 {
        return None;
    }

    let ratio = actual / predicted;
    if ratio >= DEMAND_SPIKE_HIGH_RATIO {
        Some((Severity::High, ratio))
    } else if ratio >= DEMAND_SPIKE_RATIO {
        Some((Severity::Medium, ratio))
    } else {
        None
    }
}

/// Symmetric forecast accuracy in `[0, 1]`: the smaller of actual and
/// predicted over the larger.
pub fn forecast_accuracy(actual: f64, predicted: f64) -> f64 {
    let high = actual.max(predicted);
    if high <= 0.0 {
        return 1.0;
    }
    (actual.min(predicted) / high).clamp(0.0, 1.0)
}

pub fn classify_forecast_accuracy(accuracy: f64) -> Option<Severity> {
    if accuracy >= 1.0 / FORECAST_DEVIATION_RATIO {
        return None;
    }
    if accuracy < FORECAST_ACCURACY_MEDIUM {
        Some(Severity::Medium)
    } else {
        Some(Severity::Low)
    }
}
