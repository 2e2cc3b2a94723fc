use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::order::OrderStatus;
use crate::error::StoreError;
use crate::models::{CandidateOrder, LineItem, RefundEvent, StatusEvent};
use crate::store::OrderStore;

// ============================================================================
// In-Memory Order Store
// ============================================================================
//
// Store adapter for tests and development where persistence is not
// required. Behavior mirrors the Postgres adapter: append-only event
// logs, candidate selection over the same predicates, latest-status
// ties broken by insertion order.
//
// ============================================================================

#[derive(Clone, Debug)]
struct SeededOrder {
    order_id: String,
    order_date: DateTime<Utc>,
    total: Decimal,
}

#[derive(Default)]
struct Inner {
    // Insertion order preserved so candidate iteration is deterministic.
    orders: Vec<SeededOrder>,
    line_items: HashMap<String, Vec<LineItem>>,
    status_events: Vec<StatusEvent>,
    refund_events: Vec<RefundEvent>,
}

/// Thread-safe in-memory order store.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an upstream order.
    pub fn insert_order(&self, order_id: &str, order_date: DateTime<Utc>, total: Decimal) {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        inner.orders.push(SeededOrder {
            order_id: order_id.to_string(),
            order_date,
            total,
        });
    }

    /// Seed an upstream line item.
    pub fn insert_line_item(&self, order_id: &str, item: LineItem) {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        inner
            .line_items
            .entry(order_id.to_string())
            .or_default()
            .push(item);
    }

    /// All status events for one order, in insertion order.
    pub fn status_events(&self, order_id: &str) -> Vec<StatusEvent> {
        let inner = self.inner.read().expect("RwLock poisoned");
        inner
            .status_events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect()
    }

    /// All refund/return events for one order, in insertion order.
    pub fn refund_events(&self, order_id: &str) -> Vec<RefundEvent> {
        let inner = self.inner.read().expect("RwLock poisoned");
        inner
            .refund_events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect()
    }

    pub fn status_event_count(&self) -> usize {
        self.inner.read().expect("RwLock poisoned").status_events.len()
    }
}

fn latest_event_index(events: &[StatusEvent], order_id: &str) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, event) in events.iter().enumerate() {
        if event.order_id != order_id {
            continue;
        }
        // Later insertion wins ties, so `>=` on the timestamp.
        match best {
            Some(b) if events[b].timestamp > event.timestamp => {}
            _ => best = Some(idx),
        }
    }
    best
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn latest_status(
        &self,
        order_id: &str,
    ) -> Result<Option<(OrderStatus, DateTime<Utc>)>, StoreError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(latest_event_index(&inner.status_events, order_id)
            .map(|idx| (inner.status_events[idx].status, inner.status_events[idx].timestamp)))
    }

    async fn append_status_event(&self, event: &StatusEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        inner.status_events.push(event.clone());
        Ok(())
    }

    async fn append_refund_event(&self, event: &RefundEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("RwLock poisoned");
        inner.refund_events.push(event.clone());
        Ok(())
    }

    async fn order_total(&self, order_id: &str) -> Result<Decimal, StoreError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        inner
            .orders
            .iter()
            .find(|o| o.order_id == order_id)
            .map(|o| o.total)
            .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))
    }

    async fn order_line_items(&self, order_id: &str) -> Result<Vec<LineItem>, StoreError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner.line_items.get(order_id).cloned().unwrap_or_default())
    }

    async fn candidate_orders(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<CandidateOrder>, StoreError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut candidates = Vec::new();
        for order in &inner.orders {
            if order.order_date > as_of {
                continue;
            }
            // Terminal exclusion considers every event, whatever its
            // timestamp.
            let terminal = inner
                .status_events
                .iter()
                .any(|e| e.order_id == order.order_id && e.status.is_terminal());
            if terminal {
                continue;
            }
            // Current status is the latest event whatever its timestamp;
            // the as-of bound applies only to order placement. An event
            // dated beyond as_of holds the order (negative elapsed days)
            // instead of hiding it and letting the prior state re-fire.
            let latest = latest_event_index(&inner.status_events, &order.order_id);
            let (current_status, status_timestamp) = match latest {
                Some(idx) => (
                    inner.status_events[idx].status,
                    Some(inner.status_events[idx].timestamp),
                ),
                None => (OrderStatus::New, None),
            };
            candidates.push(CandidateOrder {
                order_id: order.order_id.clone(),
                order_date: order.order_date,
                current_status,
                status_timestamp,
            });
        }
        Ok(candidates)
    }

    async fn shipment_info(
        &self,
        order_id: &str,
    ) -> Result<Option<(Option<String>, Option<String>)>, StoreError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner
            .status_events
            .iter()
            .find(|e| e.order_id == order_id && e.status == OrderStatus::Shipped)
            .map(|e| (e.tracking_number.clone(), e.carrier.clone())))
    }

    async fn latest_event_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner.status_events.iter().map(|e| e.timestamp).max())
    }

    async fn earliest_order_date(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner.orders.iter().map(|o| o.order_date).min())
    }

    async fn status_distribution(&self) -> Result<Vec<(OrderStatus, i64)>, StoreError> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut counts: HashMap<OrderStatus, i64> = HashMap::new();
        for event in &inner.status_events {
            *counts.entry(event.status).or_default() += 1;
        }
        let mut out: Vec<_> = counts.into_iter().collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.as_str().cmp(b.0.as_str())));
        Ok(out)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        // Nothing buffered; appends are immediately visible.
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
