use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::OrderStatus;

// ============================================================================
// Row Models
// ============================================================================
//
// The four logical relations the simulation reads and writes:
//
//   raw.orders               (upstream, read-only)
//   raw.order_items          (upstream, read-only)
//   raw.order_status_events  (append-only, written here)
//   raw.refund_return_events (append-only, written here)
//
// ============================================================================

/// A line item of an order. Immutable upstream data; read-only input to
/// refund computation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LineItem {
    pub product_id: String,
    pub product_name: String,
    pub product_category: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// One row of the append-only status-event log.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StatusEvent {
    pub order_id: String,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub notes: Option<String>,
}

impl StatusEvent {
    pub fn new(order_id: impl Into<String>, status: OrderStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            order_id: order_id.into(),
            status,
            timestamp,
            tracking_number: None,
            carrier: None,
            notes: None,
        }
    }
}

/// Kind of a refund/return event.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RefundKind {
    Refund,
    Return,
}

impl RefundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundKind::Refund => "refund",
            RefundKind::Return => "return",
        }
    }
}

/// One returned line item inside a return-refund payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReturnedItem {
    pub product_id: String,
    pub product_name: String,
    pub product_category: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub refund_amount: Decimal,
}

/// One row of the append-only refund/return event log. Created exactly once
/// per refund-triggering transition, never updated or deleted. `status` is
/// always `completed` on creation; there is no further lifecycle.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RefundEvent {
    pub order_id: String,
    pub kind: RefundKind,
    pub event_date: DateTime<Utc>,
    pub refund_amount: Decimal,
    pub returned_items: Option<Vec<ReturnedItem>>,
    pub reason: String,
    pub status: String,
}

/// An order eligible for evaluation at a given as-of instant, as produced by
/// the candidate query: placed on or before as-of and not yet terminal.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateOrder {
    pub order_id: String,
    pub order_date: DateTime<Utc>,
    pub current_status: OrderStatus,
    /// Timestamp of the latest status event, which may lie past the as-of
    /// instant; `None` when the order has no events yet (virtual `new`
    /// state).
    pub status_timestamp: Option<DateTime<Utc>>,
}
