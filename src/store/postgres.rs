use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use tokio::sync::Mutex;

use crate::config::StoreConfig;
use crate::domain::order::OrderStatus;
use crate::error::StoreError;
use crate::models::{CandidateOrder, LineItem, RefundEvent, StatusEvent};
use crate::store::OrderStore;

// ============================================================================
// Postgres Order Store
// ============================================================================
//
// Adapter over the four raw.* relations:
//
//   raw.orders / raw.order_items      (owned upstream, read-only here)
//   raw.order_status_events           (append-only, written here)
//   raw.refund_return_events          (append-only, written here)
//
// The raw.* tables use naive TIMESTAMP columns; values are UTC by
// convention, so instants cross the SQL boundary as NaiveDateTime.
//
// All reads and writes run inside one open transaction so that appends
// made earlier in a pass are visible to later candidate queries before
// anything is committed; `flush` commits the batch. A crash between
// flushes loses only unflushed appends, which the next run recomputes.
//
// Single-writer precondition: callers must not run two simulations
// against the same database concurrently. This is documented, not
// enforced.
//
// ============================================================================

pub struct PostgresOrderStore {
    pool: PgPool,
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PostgresOrderStore {
    /// Connect using the given configuration. A single connection is
    /// enough: every statement of a run flows through one transaction.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&config.url())
            .await?;
        Ok(Self {
            pool,
            tx: Mutex::new(None),
        })
    }

    /// Create the raw schema and the two event tables if absent. The
    /// upstream orders/order_items tables are not touched.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query("CREATE SCHEMA IF NOT EXISTS raw")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw.order_status_events (
                status_event_id SERIAL PRIMARY KEY,
                order_id VARCHAR(50),
                status VARCHAR(50),
                timestamp TIMESTAMP,
                tracking_number VARCHAR(100),
                carrier VARCHAR(50),
                notes TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw.refund_return_events (
                event_id SERIAL PRIMARY KEY,
                order_id VARCHAR(50),
                event_type VARCHAR(20),
                event_date TIMESTAMP,
                refund_amount DECIMAL(10,2),
                returned_items JSONB,
                reason VARCHAR(100),
                status VARCHAR(20)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn tx_guard(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<Transaction<'static, Postgres>>>, StoreError>
    {
        let mut guard = self.tx.lock().await;
        if guard.is_none() {
            *guard = Some(self.pool.begin().await?);
        }
        Ok(guard)
    }
}

fn to_db_timestamp(at: DateTime<Utc>) -> NaiveDateTime {
    at.naive_utc()
}

fn from_db_timestamp(at: NaiveDateTime) -> DateTime<Utc> {
    at.and_utc()
}

fn parse_status(order_id: &str, value: &str) -> Result<OrderStatus, StoreError> {
    value
        .parse()
        .map_err(|source| StoreError::InvalidStatus {
            order_id: order_id.to_string(),
            source,
        })
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn latest_status(
        &self,
        order_id: &str,
    ) -> Result<Option<(OrderStatus, DateTime<Utc>)>, StoreError> {
        let mut guard = self.tx_guard().await?;
        let tx = guard.as_mut().expect("transaction opened above");

        let row = sqlx::query(
            r#"
            SELECT status, timestamp
            FROM raw.order_status_events
            WHERE order_id = $1
            ORDER BY timestamp DESC, status_event_id DESC
            LIMIT 1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => {
                let status: String = row.try_get("status")?;
                let timestamp: NaiveDateTime = row.try_get("timestamp")?;
                Ok(Some((
                    parse_status(order_id, &status)?,
                    from_db_timestamp(timestamp),
                )))
            }
            None => Ok(None),
        }
    }

    async fn append_status_event(&self, event: &StatusEvent) -> Result<(), StoreError> {
        let mut guard = self.tx_guard().await?;
        let tx = guard.as_mut().expect("transaction opened above");

        sqlx::query(
            r#"
            INSERT INTO raw.order_status_events
                (order_id, status, timestamp, tracking_number, carrier, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&event.order_id)
        .bind(event.status.as_str())
        .bind(to_db_timestamp(event.timestamp))
        .bind(&event.tracking_number)
        .bind(&event.carrier)
        .bind(&event.notes)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn append_refund_event(&self, event: &RefundEvent) -> Result<(), StoreError> {
        let mut guard = self.tx_guard().await?;
        let tx = guard.as_mut().expect("transaction opened above");

        sqlx::query(
            r#"
            INSERT INTO raw.refund_return_events
                (order_id, event_type, event_date, refund_amount, returned_items, reason, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&event.order_id)
        .bind(event.kind.as_str())
        .bind(to_db_timestamp(event.event_date))
        .bind(event.refund_amount)
        .bind(event.returned_items.as_ref().map(Json))
        .bind(&event.reason)
        .bind(&event.status)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn order_total(&self, order_id: &str) -> Result<Decimal, StoreError> {
        let mut guard = self.tx_guard().await?;
        let tx = guard.as_mut().expect("transaction opened above");

        let row = sqlx::query("SELECT total FROM raw.orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&mut **tx)
            .await?;
        match row {
            Some(row) => Ok(row.try_get("total")?),
            None => Err(StoreError::OrderNotFound(order_id.to_string())),
        }
    }

    async fn order_line_items(&self, order_id: &str) -> Result<Vec<LineItem>, StoreError> {
        let mut guard = self.tx_guard().await?;
        let tx = guard.as_mut().expect("transaction opened above");

        let rows = sqlx::query(
            r#"
            SELECT product_id, product_name, product_category, quantity, unit_price
            FROM raw.order_items
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut **tx)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(LineItem {
                product_id: row.try_get("product_id")?,
                product_name: row.try_get("product_name")?,
                product_category: row.try_get("product_category")?,
                quantity: row.try_get("quantity")?,
                unit_price: row.try_get("unit_price")?,
            });
        }
        Ok(items)
    }

    async fn candidate_orders(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<CandidateOrder>, StoreError> {
        let mut guard = self.tx_guard().await?;
        let tx = guard.as_mut().expect("transaction opened above");

        // The latest event defines the current status whatever its
        // timestamp; the as-of bound applies only to order placement. An
        // event dated past as_of holds its order (negative elapsed days)
        // rather than letting the prior state re-fire.
        let rows = sqlx::query(
            r#"
            WITH latest_status AS (
                SELECT DISTINCT ON (order_id)
                    order_id, status, timestamp
                FROM raw.order_status_events
                ORDER BY order_id, timestamp DESC, status_event_id DESC
            )
            SELECT o.order_id,
                   o.order_date,
                   COALESCE(ls.status, 'new') AS current_status,
                   ls.timestamp AS status_timestamp
            FROM raw.orders o
            LEFT JOIN latest_status ls ON o.order_id = ls.order_id
            WHERE o.order_date <= $1
              AND NOT EXISTS (
                  SELECT 1
                  FROM raw.order_status_events ose
                  WHERE ose.order_id = o.order_id
                    AND ose.status IN ('final', 'refunded')
              )
            ORDER BY o.order_id
            "#,
        )
        .bind(to_db_timestamp(as_of))
        .fetch_all(&mut **tx)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let order_id: String = row.try_get("order_id")?;
            let status: String = row.try_get("current_status")?;
            let order_date: NaiveDateTime = row.try_get("order_date")?;
            let status_timestamp: Option<NaiveDateTime> = row.try_get("status_timestamp")?;
            candidates.push(CandidateOrder {
                current_status: parse_status(&order_id, &status)?,
                order_date: from_db_timestamp(order_date),
                status_timestamp: status_timestamp.map(from_db_timestamp),
                order_id,
            });
        }
        Ok(candidates)
    }

    async fn shipment_info(
        &self,
        order_id: &str,
    ) -> Result<Option<(Option<String>, Option<String>)>, StoreError> {
        let mut guard = self.tx_guard().await?;
        let tx = guard.as_mut().expect("transaction opened above");

        let row = sqlx::query(
            r#"
            SELECT tracking_number, carrier
            FROM raw.order_status_events
            WHERE order_id = $1 AND status = 'shipped'
            ORDER BY status_event_id
            LIMIT 1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => Ok(Some((
                row.try_get("tracking_number")?,
                row.try_get("carrier")?,
            ))),
            None => Ok(None),
        }
    }

    async fn latest_event_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut guard = self.tx_guard().await?;
        let tx = guard.as_mut().expect("transaction opened above");

        let row = sqlx::query("SELECT MAX(timestamp) AS ts FROM raw.order_status_events")
            .fetch_one(&mut **tx)
            .await?;
        let ts: Option<NaiveDateTime> = row.try_get("ts")?;
        Ok(ts.map(from_db_timestamp))
    }

    async fn earliest_order_date(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut guard = self.tx_guard().await?;
        let tx = guard.as_mut().expect("transaction opened above");

        let row = sqlx::query("SELECT MIN(order_date) AS order_date FROM raw.orders")
            .fetch_one(&mut **tx)
            .await?;
        let order_date: Option<NaiveDateTime> = row.try_get("order_date")?;
        Ok(order_date.map(from_db_timestamp))
    }

    async fn status_distribution(&self) -> Result<Vec<(OrderStatus, i64)>, StoreError> {
        let mut guard = self.tx_guard().await?;
        let tx = guard.as_mut().expect("transaction opened above");

        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS event_count
            FROM raw.order_status_events
            GROUP BY status
            ORDER BY COUNT(*) DESC, status
            "#,
        )
        .fetch_all(&mut **tx)
        .await?;

        let mut distribution = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("event_count")?;
            distribution.push((parse_status("<distribution>", &status)?, count));
        }
        Ok(distribution)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let mut guard = self.tx.lock().await;
        if let Some(tx) = guard.take() {
            tx.commit().await?;
        }
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_db_timestamps_cross_the_boundary_as_naive_utc() {
        let at = Utc.with_ymd_and_hms(2024, 5, 2, 13, 30, 45).unwrap();
        let stored = to_db_timestamp(at);
        assert_eq!(stored, at.naive_utc());
        // Round-trips without a zone shift.
        assert_eq!(from_db_timestamp(stored), at);
    }
}
