//! PostgreSQL storage backend implementation
//!
//! Reads the procurement tables and writes alerts, system metrics and the
//! event log through a `sqlx` connection pool. The schema is owned by the
//! surrounding system, so every query casts columns to the Rust-side types
//! explicitly instead of relying on the exact column definitions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use super::backend::{ActiveAlertCount, HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    EventLogEntry, InventoryItem, MetricSample, OrderStatus, PurchaseOrder, ReceivedLine,
};
use crate::alerts::{Alert, AlertStatus, AlertType, EntityRef, NewAlert};
use crate::config::DatabaseConfig;

const ALERT_COLUMNS: &str = r#"
    alert_id::BIGINT AS alert_id,
    alert_type,
    severity,
    item_id::BIGINT AS item_id,
    po_id::BIGINT AS po_id,
    message,
    COALESCE(metadata, '{}'::jsonb) AS metadata,
    status,
    created_at::timestamptz AS created_at,
    resolved_at::timestamptz AS resolved_at
"#;

/// PostgreSQL storage backend
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Open a connection pool for the configured database
    #[instrument(skip_all, fields(host = %config.host, database = %config.database))]
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_url())
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        info!("PostgreSQL connection pool created");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, shared with the notification listener
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn alert_from_row(row: &PgRow) -> StorageResult<Alert> {
        let alert_type: String = row.try_get("alert_type")?;
        let severity: String = row.try_get("severity")?;
        let status: String = row.try_get("status")?;

        Ok(Alert {
            alert_id: row.try_get("alert_id")?,
            alert_type: alert_type.parse().map_err(StorageError::InvalidData)?,
            severity: severity.parse().map_err(StorageError::InvalidData)?,
            entity: EntityRef::from_columns(row.try_get("item_id")?, row.try_get("po_id")?),
            message: row.try_get("message")?,
            metadata: row.try_get("metadata")?,
            status: status.parse().map_err(StorageError::InvalidData)?,
            created_at: row.try_get("created_at")?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    #[instrument(skip(self))]
    async fn get_item(&self, item_id: i64) -> StorageResult<Option<InventoryItem>> {
        let row = sqlx::query(
            r#"
            SELECT item_id::BIGINT AS item_id, item_name,
                   current_stock::BIGINT AS current_stock,
                   safety_stock::BIGINT AS safety_stock,
                   unit_cost::FLOAT8 AS unit_cost, location,
                   last_updated::timestamptz AS last_updated
            FROM inventory
            WHERE item_id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(InventoryItem {
                item_id: row.try_get("item_id")?,
                item_name: row.try_get("item_name")?,
                current_stock: row.try_get("current_stock")?,
                safety_stock: row.try_get("safety_stock")?,
                unit_cost: row.try_get("unit_cost")?,
                location: row.try_get("location")?,
                last_updated: row.try_get("last_updated")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn get_order(&self, order_id: i64) -> StorageResult<Option<PurchaseOrder>> {
        let row = sqlx::query(
            r#"
            SELECT po_id::BIGINT AS po_id, supplier_name, status,
                   created_date::timestamptz AS created_date,
                   expected_delivery::date AS expected_delivery,
                   COALESCE(total_value, 0)::FLOAT8 AS total_value
            FROM purchase_orders
            WHERE po_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let status: String = row.try_get("status")?;
            Ok(PurchaseOrder {
                order_id: row.try_get("po_id")?,
                supplier_name: row.try_get("supplier_name")?,
                status: OrderStatus::parse(&status),
                created_date: row.try_get("created_date")?,
                expected_delivery: row.try_get("expected_delivery")?,
                total_value: row.try_get("total_value")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn apply_order_receipt(
        &self,
        order_id: i64,
        at: DateTime<Utc>,
    ) -> StorageResult<Vec<ReceivedLine>> {
        let mut tx = self.pool.begin().await?;

        // Row locks keep a concurrent receipt from crediting the same lines.
        let pending = sqlx::query(
            r#"
            SELECT pli.item_id::BIGINT AS item_id,
                   (pli.quantity_ordered - COALESCE(pli.quantity_received, 0))::BIGINT AS outstanding
            FROM po_line_items pli
            JOIN inventory i ON i.item_id = pli.item_id
            WHERE pli.po_id = $1
              AND COALESCE(pli.quantity_received, 0) < pli.quantity_ordered
            FOR UPDATE OF pli
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut received = Vec::with_capacity(pending.len());
        for row in pending {
            let item_id: i64 = row.try_get("item_id")?;
            let quantity: i64 = row.try_get("outstanding")?;

            let new_stock: i64 = sqlx::query_scalar(
                r#"
                UPDATE inventory
                SET current_stock = current_stock + $1, last_updated = $2
                WHERE item_id = $3
                RETURNING current_stock::BIGINT
                "#,
            )
            .bind(quantity)
            .bind(at)
            .bind(item_id)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE po_line_items SET quantity_received = quantity_ordered \
                 WHERE po_id = $1 AND item_id = $2",
            )
            .bind(order_id)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;

            received.push(ReceivedLine {
                item_id,
                quantity,
                new_stock,
            });
        }

        tx.commit().await?;
        debug!("applied receipt for PO {order_id}: {} lines", received.len());
        Ok(received)
    }

    async fn consumption_since(&self, item_id: i64, since: DateTime<Utc>) -> StorageResult<f64> {
        let total: f64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity_consumed), 0)::FLOAT8
            FROM consumption_history
            WHERE item_id = $1 AND consumption_date > $2
            "#,
        )
        .bind(item_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn latest_forecast(&self, item_id: i64, from: NaiveDate) -> StorageResult<Option<f64>> {
        let predicted: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT predicted_consumption::FLOAT8
            FROM forecasts
            WHERE item_id = $1 AND forecast_date >= $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(item_id)
        .bind(from)
        .fetch_optional(&self.pool)
        .await?;
        Ok(predicted)
    }

    #[instrument(skip(self, samples), fields(count = samples.len()))]
    async fn record_metrics(&self, samples: Vec<MetricSample>) -> StorageResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut names = Vec::with_capacity(samples.len());
        let mut values = Vec::with_capacity(samples.len());
        let mut recorded = Vec::with_capacity(samples.len());
        for sample in samples {
            names.push(sample.name);
            values.push(sample.value);
            recorded.push(sample.recorded_at);
        }

        sqlx::query(
            r#"
            INSERT INTO system_metrics (metric_name, metric_value, recorded_at)
            SELECT * FROM UNNEST($1::TEXT[], $2::FLOAT8[], $3::TIMESTAMPTZ[])
            "#,
        )
        .bind(names)
        .bind(values)
        .bind(recorded)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_event_log(&self, entry: EventLogEntry) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO event_log (event_type, payload, processed_at, processing_duration_ms)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&entry.event_type)
        .bind(&entry.payload)
        .bind(entry.processed_at)
        .bind(entry.processing_duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_events_since(&self, since: DateTime<Utc>) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_log WHERE processed_at > $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, alert), fields(alert_type = %alert.alert_type, entity = %alert.entity))]
    async fn insert_alert(
        &self,
        alert: &NewAlert,
        created_at: DateTime<Utc>,
    ) -> StorageResult<Alert> {
        let alert_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO alerts (alert_type, severity, item_id, po_id, message, metadata, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'active', $7)
            RETURNING alert_id::BIGINT
            "#,
        )
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(alert.entity.item_id())
        .bind(alert.entity.order_id())
        .bind(&alert.message)
        .bind(&alert.metadata)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(Alert {
            alert_id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            entity: alert.entity,
            message: alert.message.clone(),
            metadata: alert.metadata.clone(),
            status: AlertStatus::Active,
            created_at,
            resolved_at: None,
        })
    }

    async fn count_active_alerts_since(
        &self,
        alert_type: AlertType,
        entity: &EntityRef,
        since: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM alerts
            WHERE alert_type = $1
              AND status = 'active'
              AND created_at > $2
              AND item_id IS NOT DISTINCT FROM $3
              AND po_id IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(alert_type.as_str())
        .bind(since)
        .bind(entity.item_id())
        .bind(entity.order_id())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn get_alert(&self, alert_id: i64) -> StorageResult<Option<Alert>> {
        let row = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE alert_id = $1"
        ))
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::alert_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn resolve_alert(
        &self,
        alert_id: i64,
        resolved_at: DateTime<Utc>,
        note: Option<&str>,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET status = 'resolved',
                resolved_at = $2,
                metadata = CASE
                    WHEN $3::TEXT IS NULL THEN metadata
                    ELSE COALESCE(metadata, '{}'::jsonb) || jsonb_build_object('resolution_note', $3::TEXT)
                END
            WHERE alert_id = $1 AND status = 'active'
            "#,
        )
        .bind(alert_id)
        .bind(resolved_at)
        .bind(note)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn active_alerts(&self, limit: usize) -> StorageResult<Vec<Alert>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ALERT_COLUMNS}
            FROM alerts
            WHERE status = 'active'
            ORDER BY
                CASE severity
                    WHEN 'critical' THEN 1
                    WHEN 'high' THEN 2
                    WHEN 'medium' THEN 3
                    WHEN 'low' THEN 4
                END,
                created_at DESC,
                alert_id DESC
            LIMIT $1
            "#
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::alert_from_row).collect()
    }

    async fn active_alerts_of_types(&self, types: &[AlertType]) -> StorageResult<Vec<Alert>> {
        let types: Vec<&str> = types.iter().map(AlertType::as_str).collect();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ALERT_COLUMNS}
            FROM alerts
            WHERE status = 'active' AND alert_type = ANY($1)
            ORDER BY created_at, alert_id
            "#
        ))
        .bind(types)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::alert_from_row).collect()
    }

    async fn active_alert_counts(&self) -> StorageResult<Vec<ActiveAlertCount>> {
        let rows = sqlx::query(
            r#"
            SELECT alert_type, severity, COUNT(*) AS count
            FROM alerts
            WHERE status = 'active'
            GROUP BY alert_type, severity
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let alert_type: String = row.try_get("alert_type")?;
                let severity: String = row.try_get("severity")?;
                let count: i64 = row.try_get("count")?;
                Ok(ActiveAlertCount {
                    alert_type: alert_type.parse().map_err(StorageError::InvalidData)?,
                    severity: severity.parse().map_err(StorageError::InvalidData)?,
                    count: count.max(0) as u64,
                })
            })
            .collect()
    }

    async fn count_alerts_created_since(&self, since: DateTime<Utc>) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts WHERE created_at > $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self))]
    async fn delete_resolved_before(&self, before: DateTime<Utc>) -> StorageResult<u64> {
        let result =
            sqlx::query("DELETE FROM alerts WHERE status = 'resolved' AND resolved_at < $1")
                .bind(before)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "PostgreSQL operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "postgres".to_string()),
                    ("pool_size".to_string(), self.pool.size().to_string()),
                    ("idle".to_string(), self.pool.num_idle().to_string()),
                ]),
            }),
            Err(e) => Err(StorageError::UnhealthyBackend(e.to_string())),
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing PostgreSQL connection pool");
        self.pool.close().await;
        Ok(())
    }
}
