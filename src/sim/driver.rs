use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use tracing::Instrument;
use uuid::Uuid;

use crate::domain::order::transitions::{decide, elapsed_whole_days, Decision, PendingEvent};
use crate::domain::order::{refund, OrderStatus, RefundTrigger};
use crate::error::SimulationError;
use crate::models::{CandidateOrder, RefundEvent, RefundKind, StatusEvent};
use crate::rng::RandomSource;
use crate::store::OrderStore;

// ============================================================================
// Simulation Driver
// ============================================================================
//
// Advances a virtual clock day by day (backfill mode) or runs a single
// pass at the real current instant (incremental mode), invoking the
// transition engine for every still-active order on each tick. Writes are
// batched: the store flushes every `flush_every_days` ticks and at the
// end of a run. Aborting between ticks is safe; the next run recomputes
// from persisted state.
//
// Single-threaded by design: orders are independent, but no two runs may
// target the same store concurrently (caller responsibility).
//
// ============================================================================

/// Batch-flush policy and other driver knobs.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Commit accumulated appends after this many simulated days.
    pub flush_every_days: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            flush_every_days: 10,
        }
    }
}

/// Per-status count of transitions applied in one pass or run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransitionCounts {
    pub placed: u64,
    pub processing: u64,
    pub shipped: u64,
    pub delivered: u64,
    pub cancelled: u64,
    pub returned: u64,
    pub refunded: u64,
    pub finalized: u64,
}

impl TransitionCounts {
    fn record(&mut self, status: OrderStatus) {
        match status {
            OrderStatus::Placed => self.placed += 1,
            OrderStatus::Processing => self.processing += 1,
            OrderStatus::Shipped => self.shipped += 1,
            OrderStatus::Delivered => self.delivered += 1,
            OrderStatus::Cancelled => self.cancelled += 1,
            OrderStatus::Returned => self.returned += 1,
            OrderStatus::Refunded => self.refunded += 1,
            OrderStatus::Final => self.finalized += 1,
            OrderStatus::New => {}
        }
    }

    fn absorb(&mut self, other: &TransitionCounts) {
        self.placed += other.placed;
        self.processing += other.processing;
        self.shipped += other.shipped;
        self.delivered += other.delivered;
        self.cancelled += other.cancelled;
        self.returned += other.returned;
        self.refunded += other.refunded;
        self.finalized += other.finalized;
    }

    pub fn total(&self) -> u64 {
        self.pairs().iter().map(|(_, count)| count).sum()
    }

    /// (status name, count) pairs in lifecycle order, for logging.
    pub fn pairs(&self) -> [(&'static str, u64); 8] {
        [
            ("placed", self.placed),
            ("processing", self.processing),
            ("shipped", self.shipped),
            ("delivered", self.delivered),
            ("cancelled", self.cancelled),
            ("returned", self.returned),
            ("refunded", self.refunded),
            ("final", self.finalized),
        ]
    }
}

pub struct SimulationDriver<S, R> {
    store: S,
    rng: R,
    config: DriverConfig,
}

impl<S: OrderStore, R: RandomSource> SimulationDriver<S, R> {
    pub fn new(store: S, rng: R) -> Self {
        Self::with_config(store, rng, DriverConfig::default())
    }

    pub fn with_config(store: S, rng: R, config: DriverConfig) -> Self {
        Self { store, rng, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Where a backfill should start: the day after the latest recorded
    /// status event, else the earliest order placement date, else `None`
    /// (no orders to simulate).
    pub async fn resume_start_date(&self) -> Result<Option<NaiveDate>, SimulationError> {
        if let Some(latest) = self.store.latest_event_timestamp().await? {
            return Ok(latest.date_naive().succ_opt());
        }
        Ok(self
            .store
            .earliest_order_date()
            .await?
            .map(|d| d.date_naive()))
    }

    /// Backfill mode: one tick per calendar day at start-of-day UTC,
    /// `day_count` days inclusive from `start_date`.
    pub async fn run_backfill(
        &mut self,
        start_date: NaiveDate,
        day_count: u32,
    ) -> Result<TransitionCounts, SimulationError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("backfill", %run_id, %start_date, day_count);
        async move {
            let mut totals = TransitionCounts::default();
            for day in 0..day_count {
                let Some(date) = start_date.checked_add_days(Days::new(u64::from(day))) else {
                    break;
                };
                let as_of = date.and_time(NaiveTime::MIN).and_utc();
                let counts = self.process_pass(as_of).await?;
                tracing::debug!(
                    day = day + 1,
                    day_count,
                    date = %date,
                    transitions = counts.total(),
                    "simulated day"
                );
                totals.absorb(&counts);

                let flush_every = self.config.flush_every_days.max(1);
                if (day + 1) % flush_every == 0 {
                    self.store.flush().await?;
                    tracing::info!(
                        day = day + 1,
                        transitions = totals.total(),
                        "flushed batch"
                    );
                }
            }
            self.store.flush().await?;
            tracing::info!(transitions = totals.total(), "✅ backfill complete");
            Ok(totals)
        }
        .instrument(span)
        .await
    }

    /// Incremental mode: a single pass at the real current instant.
    pub async fn run_incremental(&mut self) -> Result<TransitionCounts, SimulationError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("incremental", %run_id);
        async move {
            let as_of = Utc::now();
            let counts = self.process_pass(as_of).await?;
            self.store.flush().await?;
            tracing::info!(
                as_of = %as_of,
                transitions = counts.total(),
                "✅ incremental pass complete"
            );
            Ok(counts)
        }
        .instrument(span)
        .await
    }

    /// Evaluate every candidate order once at the given as-of instant.
    async fn process_pass(
        &mut self,
        as_of: DateTime<Utc>,
    ) -> Result<TransitionCounts, SimulationError> {
        let candidates = self.store.candidate_orders(as_of).await?;
        let mut counts = TransitionCounts::default();

        for candidate in candidates {
            let last_event_at = candidate.status_timestamp.unwrap_or(candidate.order_date);
            let elapsed = elapsed_whole_days(last_event_at, as_of);
            match decide(candidate.current_status, elapsed, last_event_at, &mut self.rng) {
                Decision::NoOp => {}
                Decision::Advance(event) => {
                    self.apply(&candidate, event, None, &mut counts).await?;
                }
                Decision::AdvanceWithRefund { event, trigger } => {
                    self.apply(&candidate, event, Some(trigger), &mut counts)
                        .await?;
                }
            }
        }
        Ok(counts)
    }

    async fn apply(
        &mut self,
        candidate: &CandidateOrder,
        pending: PendingEvent,
        trigger: Option<RefundTrigger>,
        counts: &mut TransitionCounts,
    ) -> Result<(), SimulationError> {
        let order_id = candidate.order_id.as_str();
        let mut event = StatusEvent::new(order_id, pending.status, pending.at);
        event.notes = pending.notes;

        if pending.carry_shipment_info {
            let (tracking, carrier) = self
                .store
                .shipment_info(order_id)
                .await?
                .ok_or_else(|| SimulationError::MissingShipmentInfo {
                    order_id: order_id.to_string(),
                })?;
            if tracking.is_none() || carrier.is_none() {
                return Err(SimulationError::MissingShipmentInfo {
                    order_id: order_id.to_string(),
                });
            }
            event.tracking_number = tracking;
            event.carrier = carrier;
        } else {
            event.tracking_number = pending.tracking_number;
            event.carrier = pending.carrier;
        }

        self.store.append_status_event(&event).await?;
        counts.record(event.status);
        tracing::trace!(
            order_id,
            from = %candidate.current_status,
            to = %event.status,
            at = %event.timestamp,
            "applied transition"
        );

        if let Some(trigger) = trigger {
            let (kind, breakdown) = match trigger {
                RefundTrigger::Cancellation => {
                    let total = self.store.order_total(order_id).await?;
                    (RefundKind::Refund, refund::cancellation_refund(total))
                }
                RefundTrigger::Return => {
                    let items = self.store.order_line_items(order_id).await?;
                    if items.is_empty() {
                        return Err(SimulationError::MissingLineItems {
                            order_id: order_id.to_string(),
                        });
                    }
                    (
                        RefundKind::Return,
                        refund::return_refund(&items, &mut self.rng),
                    )
                }
            };
            let refund_event = RefundEvent {
                order_id: order_id.to_string(),
                kind,
                event_date: pending.at,
                refund_amount: breakdown.amount,
                returned_items: breakdown.items,
                reason: breakdown.reason,
                status: "completed".to_string(),
            };
            self.store.append_refund_event(&refund_event).await?;
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
    use crate::rng::ScriptedRandom;
    use crate::store::InMemoryOrderStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[tokio::test]
    async fn test_resume_prefers_day_after_latest_event() {
        let store = InMemoryOrderStore::new();
        store.insert_order("ORD-1", ts(2), dec!(10.00));
        store
            .append_status_event(&StatusEvent::new("ORD-1", OrderStatus::Placed, ts(6)))
            .await
            .unwrap();

        let driver = SimulationDriver::new(store, ScriptedRandom::minimums());
        assert_eq!(driver.resume_start_date().await.unwrap(), Some(date(7)));
    }

    #[tokio::test]
    async fn test_resume_falls_back_to_earliest_order() {
        let store = InMemoryOrderStore::new();
        store.insert_order("ORD-1", ts(9), dec!(10.00));
        store.insert_order("ORD-2", ts(4), dec!(10.00));

        let driver = SimulationDriver::new(store, ScriptedRandom::minimums());
        assert_eq!(driver.resume_start_date().await.unwrap(), Some(date(4)));
    }

    #[tokio::test]
    async fn test_resume_with_no_orders_is_none() {
        let driver =
            SimulationDriver::new(InMemoryOrderStore::new(), ScriptedRandom::minimums());
        assert_eq!(driver.resume_start_date().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_candidate_set_is_not_an_error() {
        let mut driver =
            SimulationDriver::new(InMemoryOrderStore::new(), ScriptedRandom::minimums());
        let counts = driver.run_incremental().await.unwrap();
        assert_eq!(counts, TransitionCounts::default());
    }

    #[tokio::test]
    async fn test_shipped_order_without_tracking_aborts_the_run() {
        let store = InMemoryOrderStore::new();
        store.insert_order("ORD-1", ts(1), dec!(10.00));
        // Corrupt upstream state: shipped with no tracking/carrier.
        store
            .append_status_event(&StatusEvent::new("ORD-1", OrderStatus::Shipped, ts(1)))
            .await
            .unwrap();

        let mut driver = SimulationDriver::new(store, ScriptedRandom::minimums());
        let err = driver
            .run_backfill(date(10), 1)
            .await
            .expect_err("integrity violation must abort");
        assert!(matches!(
            err,
            SimulationError::MissingShipmentInfo { ref order_id } if order_id == "ORD-1"
        ));
    }

    #[tokio::test]
    async fn test_returned_order_without_line_items_aborts_the_run() {
        let store = InMemoryOrderStore::new();
        store.insert_order("ORD-1", ts(1), dec!(10.00));
        store
            .append_status_event(&StatusEvent::new("ORD-1", OrderStatus::Returned, ts(1)))
            .await
            .unwrap();

        let mut driver = SimulationDriver::new(store, ScriptedRandom::minimums());
        let err = driver
            .run_backfill(date(10), 1)
            .await
            .expect_err("integrity violation must abort");
        assert!(matches!(
            err,
            SimulationError::MissingLineItems { ref order_id } if order_id == "ORD-1"
        ));
    }

    #[tokio::test]
    async fn test_counts_accumulate_across_days() {
        let store = InMemoryOrderStore::new();
        store.insert_order("ORD-1", ts(1), dec!(10.00));
        store.insert_order("ORD-2", ts(2), dec!(20.00));

        let mut driver = SimulationDriver::new(store, ScriptedRandom::minimums());
        // Day 1: ORD-1 placed. Day 2: ORD-1 placed→processing (gate 0),
        // ORD-2 placed.
        let counts = driver.run_backfill(date(1), 2).await.unwrap();
        assert_eq!(counts.placed, 2);
        assert_eq!(counts.processing, 1);
        assert_eq!(counts.total(), 3);
    }
}
