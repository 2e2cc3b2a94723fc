use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::order::OrderStatus;
use crate::error::StoreError;
use crate::models::{CandidateOrder, LineItem, RefundEvent, StatusEvent};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;

// ============================================================================
// Order Store Interface
// ============================================================================
//
// The single persistence seam the simulation talks to. Orders and line
// items are upstream data and read-only here; status events and
// refund/return events are append-only and written exclusively by the
// simulation.
//
// Writes may be buffered; `flush` makes everything appended so far
// durable. Reads must observe unflushed appends (read-your-writes within
// a run). The store is single-writer by precondition: no two simulation
// runs may execute concurrently against the same data.
//
// ============================================================================

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Latest status event for an order, by timestamp then insertion order.
    async fn latest_status(
        &self,
        order_id: &str,
    ) -> Result<Option<(OrderStatus, DateTime<Utc>)>, StoreError>;

    /// Append one status event. Append-only: nothing is ever updated.
    async fn append_status_event(&self, event: &StatusEvent) -> Result<(), StoreError>;

    /// Append one refund/return event.
    async fn append_refund_event(&self, event: &RefundEvent) -> Result<(), StoreError>;

    /// The order's stored monetary total.
    async fn order_total(&self, order_id: &str) -> Result<Decimal, StoreError>;

    /// The order's line items.
    async fn order_line_items(&self, order_id: &str) -> Result<Vec<LineItem>, StoreError>;

    /// Orders eligible for evaluation at `as_of`: placed on or before that
    /// instant, holding no terminal status event at any timestamp. The
    /// reported current status is the order's latest event regardless of
    /// its timestamp (an event dated past `as_of` holds the order rather
    /// than hiding it); orders with no events are in the virtual `new`
    /// state.
    async fn candidate_orders(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<CandidateOrder>, StoreError>;

    /// Tracking number and carrier recorded at `shipped` time, if any
    /// shipped event exists.
    async fn shipment_info(
        &self,
        order_id: &str,
    ) -> Result<Option<(Option<String>, Option<String>)>, StoreError>;

    /// Timestamp of the most recent status event across all orders; resume
    /// point for backfills.
    async fn latest_event_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Earliest order placement timestamp; starting point for a fresh
    /// backfill.
    async fn earliest_order_date(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Event counts per status, for the end-of-run summary.
    async fn status_distribution(&self) -> Result<Vec<(OrderStatus, i64)>, StoreError>;

    /// Make all appends so far durable.
    async fn flush(&self) -> Result<(), StoreError>;
}
