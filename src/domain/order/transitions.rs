use chrono::{DateTime, Duration, Utc};

use super::status::OrderStatus;
use crate::rng::RandomSource;

// ============================================================================
// Status Transition Engine
// ============================================================================
//
// Pure decision logic: (current status, elapsed time, randomness) → next
// status event plus zero-or-one refund trigger. The lifecycle graph is data
// (TRANSITION_TABLE); `decide` walks it with an injected random source and
// performs no I/O, so re-running the engine over already-advanced orders is
// harmless.
//
// Every dwell gate is redrawn per evaluation rather than fixed at the prior
// transition: repeated daily runs produce variable dwell times without any
// persisted pending state.
//
// ============================================================================

pub const CARRIERS: [&str; 4] = ["UPS", "FedEx", "USPS", "DHL"];

pub const CANCELLATION_NOTES: [&str; 3] = [
    "Customer requested cancellation",
    "Payment issue",
    "Inventory unavailable",
];

pub const DELIVERY_NOTES: [&str; 3] = [
    "Left at front door",
    "Handed to resident",
    "Signed by recipient",
];

pub const RETURN_NOTE: &str = "Customer initiated return";
pub const CANCELLATION_REFUND_NOTE: &str = "Cancellation refund processed";
pub const RETURN_REFUND_NOTE: &str = "Return refund processed";

/// Elapsed-days requirement before an edge may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwellGate {
    /// Threshold redrawn uniformly from the inclusive range on every
    /// evaluation.
    Between(i64, i64),
    /// Fixed threshold.
    Fixed(i64),
}

/// One edge of the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionRule {
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// Probability that this edge is the one attempted for `from` in a given
    /// evaluation. The default edge of a status carries 1.0 and absorbs the
    /// remaining mass.
    pub probability: f64,
    /// Elapsed days required before the probability branch commits at all
    /// (only `delivered → returned` uses a non-zero value).
    pub pre_gate_days: i64,
    pub dwell: DwellGate,
    /// Inclusive days range added to the last event timestamp for the new
    /// event time. Drawn independently of the dwell gate.
    pub offset_days: (i64, i64),
    /// Inclusive hours jitter added on top; `None` means no jitter.
    pub offset_hours: Option<(i64, i64)>,
}

pub const NEW_TO_PLACED: TransitionRule = TransitionRule {
    from: OrderStatus::New,
    to: OrderStatus::Placed,
    probability: 1.0,
    pre_gate_days: 0,
    dwell: DwellGate::Fixed(0),
    offset_days: (0, 0),
    offset_hours: None,
};

pub const PLACED_TO_PROCESSING: TransitionRule = TransitionRule {
    from: OrderStatus::Placed,
    to: OrderStatus::Processing,
    probability: 1.0,
    pre_gate_days: 0,
    dwell: DwellGate::Between(0, 1),
    offset_days: (0, 1),
    offset_hours: Some((1, 12)),
};

pub const PROCESSING_TO_CANCELLED: TransitionRule = TransitionRule {
    from: OrderStatus::Processing,
    to: OrderStatus::Cancelled,
    probability: 0.05,
    pre_gate_days: 0,
    dwell: DwellGate::Between(1, 4),
    offset_days: (1, 4),
    offset_hours: Some((1, 8)),
};

pub const PROCESSING_TO_SHIPPED: TransitionRule = TransitionRule {
    from: OrderStatus::Processing,
    to: OrderStatus::Shipped,
    probability: 1.0,
    pre_gate_days: 0,
    dwell: DwellGate::Between(1, 4),
    offset_days: (1, 4),
    offset_hours: Some((0, 12)),
};

pub const SHIPPED_TO_DELIVERED: TransitionRule = TransitionRule {
    from: OrderStatus::Shipped,
    to: OrderStatus::Delivered,
    probability: 1.0,
    pre_gate_days: 0,
    dwell: DwellGate::Between(2, 5),
    offset_days: (2, 5),
    offset_hours: Some((2, 10)),
};

pub const CANCELLED_TO_REFUNDED: TransitionRule = TransitionRule {
    from: OrderStatus::Cancelled,
    to: OrderStatus::Refunded,
    probability: 1.0,
    pre_gate_days: 0,
    dwell: DwellGate::Between(1, 3),
    offset_days: (1, 3),
    offset_hours: Some((1, 8)),
};

pub const DELIVERED_TO_RETURNED: TransitionRule = TransitionRule {
    from: OrderStatus::Delivered,
    to: OrderStatus::Returned,
    probability: 0.10,
    pre_gate_days: 2,
    dwell: DwellGate::Between(2, 30),
    offset_days: (2, 30),
    offset_hours: Some((1, 12)),
};

pub const DELIVERED_TO_FINAL: TransitionRule = TransitionRule {
    from: OrderStatus::Delivered,
    to: OrderStatus::Final,
    probability: 1.0,
    pre_gate_days: 0,
    dwell: DwellGate::Fixed(14),
    offset_days: (14, 14),
    offset_hours: None,
};

pub const RETURNED_TO_REFUNDED: TransitionRule = TransitionRule {
    from: OrderStatus::Returned,
    to: OrderStatus::Refunded,
    probability: 1.0,
    pre_gate_days: 0,
    dwell: DwellGate::Between(1, 3),
    offset_days: (1, 3),
    offset_hours: Some((1, 8)),
};

/// The full lifecycle graph. Edges of a status appear in evaluation order:
/// probabilistic edges first, the default edge last.
pub const TRANSITION_TABLE: &[TransitionRule] = &[
    NEW_TO_PLACED,
    PLACED_TO_PROCESSING,
    PROCESSING_TO_CANCELLED,
    PROCESSING_TO_SHIPPED,
    SHIPPED_TO_DELIVERED,
    CANCELLED_TO_REFUNDED,
    DELIVERED_TO_RETURNED,
    DELIVERED_TO_FINAL,
    RETURNED_TO_REFUNDED,
];

/// Refund side effect requested by a transition; materialized by the
/// refund computer against stored order data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundTrigger {
    /// Full refund of the order's stored total.
    Cancellation,
    /// Partial refund over a sampled subset of line items.
    Return,
}

/// The status event a transition wants appended.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    /// Copy tracking/carrier from the order's `shipped` event. The driver
    /// resolves this against the store; a missing record is a data
    /// integrity violation.
    pub carry_shipment_info: bool,
    pub notes: Option<String>,
}

impl PendingEvent {
    fn new(status: OrderStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            at,
            tracking_number: None,
            carrier: None,
            carry_shipment_info: false,
            notes: None,
        }
    }

    fn with_note(mut self, note: &str) -> Self {
        self.notes = Some(note.to_string());
        self
    }
}

/// Outcome of one evaluation of one order.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No threshold met this cycle; re-evaluated on a later tick.
    NoOp,
    Advance(PendingEvent),
    AdvanceWithRefund {
        event: PendingEvent,
        trigger: RefundTrigger,
    },
}

/// Whole days between two instants, floored. Matches calendar-day elapsed
/// semantics: a last event written with a future timestamp yields a negative
/// value and fails every gate until the as-of instant catches up.
pub fn elapsed_whole_days(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().div_euclid(86_400)
}

/// Draw the dwell gate for an edge and, if elapsed time clears it, the new
/// event timestamp. Gate and offset are independent draws.
fn fire(
    rule: &TransitionRule,
    elapsed_days: i64,
    last_event_at: DateTime<Utc>,
    rng: &mut dyn RandomSource,
) -> Option<DateTime<Utc>> {
    let gate = match rule.dwell {
        DwellGate::Between(lo, hi) => rng.int_between(lo, hi),
        DwellGate::Fixed(days) => days,
    };
    if elapsed_days < gate {
        return None;
    }

    let days = rng.int_between(rule.offset_days.0, rule.offset_days.1);
    let mut at = last_event_at + Duration::days(days);
    if let Some((lo, hi)) = rule.offset_hours {
        at += Duration::hours(rng.int_between(lo, hi));
    }
    Some(at)
}

/// Evaluate one order at one as-of instant.
///
/// `last_event_at` is the timestamp of the order's latest status event, or
/// its placement time when no events exist yet (virtual `new` state).
/// `elapsed_days` is `elapsed_whole_days(last_event_at, as_of)`.
pub fn decide(
    status: OrderStatus,
    elapsed_days: i64,
    last_event_at: DateTime<Utc>,
    rng: &mut dyn RandomSource,
) -> Decision {
    match status {
        // Backfills the very first event at the order's placement time.
        OrderStatus::New => Decision::Advance(PendingEvent::new(OrderStatus::Placed, last_event_at)),

        OrderStatus::Placed => match fire(&PLACED_TO_PROCESSING, elapsed_days, last_event_at, rng)
        {
            Some(at) => Decision::Advance(PendingEvent::new(OrderStatus::Processing, at)),
            None => Decision::NoOp,
        },

        OrderStatus::Processing => {
            if rng.chance(PROCESSING_TO_CANCELLED.probability) {
                match fire(&PROCESSING_TO_CANCELLED, elapsed_days, last_event_at, rng) {
                    Some(at) => {
                        let note = CANCELLATION_NOTES[rng.index(CANCELLATION_NOTES.len())];
                        Decision::Advance(
                            PendingEvent::new(OrderStatus::Cancelled, at).with_note(note),
                        )
                    }
                    None => Decision::NoOp,
                }
            } else {
                match fire(&PROCESSING_TO_SHIPPED, elapsed_days, last_event_at, rng) {
                    Some(at) => {
                        let mut event = PendingEvent::new(OrderStatus::Shipped, at);
                        event.tracking_number = Some(generate_tracking_number(rng));
                        event.carrier = Some(CARRIERS[rng.index(CARRIERS.len())].to_string());
                        Decision::Advance(event)
                    }
                    None => Decision::NoOp,
                }
            }
        }

        OrderStatus::Shipped => match fire(&SHIPPED_TO_DELIVERED, elapsed_days, last_event_at, rng)
        {
            Some(at) => {
                let note = DELIVERY_NOTES[rng.index(DELIVERY_NOTES.len())];
                let mut event = PendingEvent::new(OrderStatus::Delivered, at).with_note(note);
                event.carry_shipment_info = true;
                Decision::Advance(event)
            }
            None => Decision::NoOp,
        },

        OrderStatus::Cancelled => {
            match fire(&CANCELLED_TO_REFUNDED, elapsed_days, last_event_at, rng) {
                Some(at) => Decision::AdvanceWithRefund {
                    event: PendingEvent::new(OrderStatus::Refunded, at)
                        .with_note(CANCELLATION_REFUND_NOTE),
                    trigger: RefundTrigger::Cancellation,
                },
                None => Decision::NoOp,
            }
        }

        OrderStatus::Delivered => {
            // The return draw happens on every evaluation; a triggered
            // return whose inner gate is unmet waits for a later tick, at
            // which point the draw happens again. A missed draw (or elapsed
            // under the pre-gate) falls through to the final-status wait.
            let wants_return = rng.chance(DELIVERED_TO_RETURNED.probability)
                && elapsed_days >= DELIVERED_TO_RETURNED.pre_gate_days;
            if wants_return {
                match fire(&DELIVERED_TO_RETURNED, elapsed_days, last_event_at, rng) {
                    Some(at) => Decision::Advance(
                        PendingEvent::new(OrderStatus::Returned, at).with_note(RETURN_NOTE),
                    ),
                    None => Decision::NoOp,
                }
            } else {
                match fire(&DELIVERED_TO_FINAL, elapsed_days, last_event_at, rng) {
                    Some(at) => Decision::Advance(PendingEvent::new(OrderStatus::Final, at)),
                    None => Decision::NoOp,
                }
            }
        }

        OrderStatus::Returned => {
            match fire(&RETURNED_TO_REFUNDED, elapsed_days, last_event_at, rng) {
                Some(at) => Decision::AdvanceWithRefund {
                    event: PendingEvent::new(OrderStatus::Refunded, at)
                        .with_note(RETURN_REFUND_NOTE),
                    trigger: RefundTrigger::Return,
                },
                None => Decision::NoOp,
            }
        }

        OrderStatus::Final | OrderStatus::Refunded => Decision::NoOp,
    }
}

fn generate_tracking_number(rng: &mut dyn RandomSource) -> String {
    let digits = rng.int_between(1_000_000_000_000_000, 9_999_999_999_999_999);
    format!("1Z{digits}")
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{ScriptedRandom, StdRandom};
    use chrono::TimeZone;

    fn at(day: i64, hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            + Duration::days(day)
            + Duration::hours(hour)
    }

    fn edges_from(status: OrderStatus) -> Vec<&'static TransitionRule> {
        TRANSITION_TABLE.iter().filter(|r| r.from == status).collect()
    }

    #[test]
    fn test_table_covers_every_non_terminal_status() {
        for status in OrderStatus::ALL {
            let edges = edges_from(status);
            if status.is_terminal() {
                assert!(edges.is_empty(), "terminal {status} must have no edges");
            } else {
                assert!(!edges.is_empty(), "{status} must have at least one edge");
            }
        }
    }

    #[test]
    fn test_table_edges_are_forward_only_and_default_terminated() {
        for status in OrderStatus::ALL.iter().filter(|s| !s.is_terminal()) {
            let edges = edges_from(*status);
            // Exactly one default edge, and it comes last.
            let defaults: Vec<_> = edges
                .iter()
                .filter(|r| (r.probability - 1.0).abs() < f64::EPSILON)
                .collect();
            assert_eq!(defaults.len(), 1, "{status} needs exactly one default edge");
            assert_eq!(
                edges.last().map(|r| r.probability),
                Some(1.0),
                "{status}'s default edge must be evaluated last"
            );
            for edge in &edges {
                assert_ne!(edge.from, edge.to, "no self loops");
                assert!(edge.probability > 0.0 && edge.probability <= 1.0);
            }
        }
    }

    #[test]
    fn test_table_offsets_keep_timestamps_strictly_increasing() {
        for rule in TRANSITION_TABLE {
            if rule.from == OrderStatus::New {
                continue; // placed event reuses the placement timestamp
            }
            let min_hours = rule.offset_hours.map_or(0, |(lo, _)| lo);
            assert!(
                rule.offset_days.0 * 24 + min_hours > 0,
                "{} -> {} may produce a non-increasing timestamp",
                rule.from,
                rule.to
            );
            if let DwellGate::Between(lo, hi) = rule.dwell {
                assert!(lo <= hi);
            }
            assert!(rule.offset_days.0 <= rule.offset_days.1);
        }
    }

    #[test]
    fn test_new_order_is_placed_at_placement_time() {
        let placed_at = at(0, 9);
        let mut rng = ScriptedRandom::minimums();
        match decide(OrderStatus::New, 3, placed_at, &mut rng) {
            Decision::Advance(event) => {
                assert_eq!(event.status, OrderStatus::Placed);
                assert_eq!(event.at, placed_at);
                assert_eq!(event.notes, None);
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[test]
    fn test_placed_waits_until_gate_is_met() {
        let mut rng = ScriptedRandom::default();
        rng.push_int(1); // gate draw
        assert_eq!(
            decide(OrderStatus::Placed, 0, at(0, 0), &mut rng),
            Decision::NoOp
        );

        let mut rng = ScriptedRandom::default();
        rng.push_int(1).push_int(1).push_int(5); // gate, offset days, offset hours
        match decide(OrderStatus::Placed, 1, at(0, 0), &mut rng) {
            Decision::Advance(event) => {
                assert_eq!(event.status, OrderStatus::Processing);
                assert_eq!(event.at, at(1, 5));
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[test]
    fn test_processing_cancel_branch_carries_a_cancellation_note() {
        let mut rng = ScriptedRandom::default();
        rng.push_chance(true) // 5% draw
            .push_int(2) // gate
            .push_int(2) // offset days
            .push_int(3) // offset hours
            .push_index(1); // note pick
        match decide(OrderStatus::Processing, 2, at(0, 0), &mut rng) {
            Decision::Advance(event) => {
                assert_eq!(event.status, OrderStatus::Cancelled);
                assert_eq!(event.at, at(2, 3));
                assert_eq!(event.notes.as_deref(), Some("Payment issue"));
                assert_eq!(event.tracking_number, None);
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[test]
    fn test_processing_ship_branch_assigns_tracking_and_carrier() {
        let mut rng = ScriptedRandom::default();
        rng.push_int(1) // gate
            .push_int(2) // offset days
            .push_int(4) // offset hours
            .push_int(1_234_567_890_123_456) // tracking digits
            .push_index(2); // carrier pick
        match decide(OrderStatus::Processing, 3, at(0, 0), &mut rng) {
            Decision::Advance(event) => {
                assert_eq!(event.status, OrderStatus::Shipped);
                assert_eq!(event.at, at(2, 4));
                assert_eq!(event.tracking_number.as_deref(), Some("1Z1234567890123456"));
                assert_eq!(event.carrier.as_deref(), Some("USPS"));
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[test]
    fn test_processing_cancel_draw_under_gate_is_a_noop() {
        let mut rng = ScriptedRandom::default();
        rng.push_chance(true).push_int(4); // cancel chosen, gate 4 > elapsed 1
        assert_eq!(
            decide(OrderStatus::Processing, 1, at(0, 0), &mut rng),
            Decision::NoOp
        );
    }

    #[test]
    fn test_shipped_advances_to_delivered_with_carried_shipment_info() {
        let mut rng = ScriptedRandom::default();
        rng.push_int(2).push_int(3).push_int(6).push_index(0);
        match decide(OrderStatus::Shipped, 4, at(0, 0), &mut rng) {
            Decision::Advance(event) => {
                assert_eq!(event.status, OrderStatus::Delivered);
                assert!(event.carry_shipment_info);
                assert_eq!(event.notes.as_deref(), Some("Left at front door"));
                assert_eq!(event.at, at(3, 6));
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_refund_uses_full_order_total_trigger() {
        let mut rng = ScriptedRandom::default();
        rng.push_int(1).push_int(2).push_int(2);
        match decide(OrderStatus::Cancelled, 2, at(0, 0), &mut rng) {
            Decision::AdvanceWithRefund { event, trigger } => {
                assert_eq!(event.status, OrderStatus::Refunded);
                assert_eq!(event.notes.as_deref(), Some(CANCELLATION_REFUND_NOTE));
                assert_eq!(trigger, RefundTrigger::Cancellation);
            }
            other => panic!("expected refund advance, got {other:?}"),
        }
    }

    #[test]
    fn test_delivered_return_draw_under_pre_gate_falls_through_to_final_wait() {
        // Return draw hits, but elapsed < 2: the final-status edge is
        // evaluated instead, and 1 < 14 means no transition.
        let mut rng = ScriptedRandom::default();
        rng.push_chance(true);
        assert_eq!(
            decide(OrderStatus::Delivered, 1, at(0, 0), &mut rng),
            Decision::NoOp
        );
    }

    #[test]
    fn test_delivered_triggered_return_with_unmet_inner_gate_waits() {
        let mut rng = ScriptedRandom::default();
        rng.push_chance(true).push_int(10); // inner gate 10 > elapsed 5
        assert_eq!(
            decide(OrderStatus::Delivered, 5, at(0, 0), &mut rng),
            Decision::NoOp
        );
    }

    #[test]
    fn test_delivered_return_fires_when_both_gates_clear() {
        let mut rng = ScriptedRandom::default();
        rng.push_chance(true).push_int(3).push_int(4).push_int(2);
        match decide(OrderStatus::Delivered, 5, at(0, 0), &mut rng) {
            Decision::Advance(event) => {
                assert_eq!(event.status, OrderStatus::Returned);
                assert_eq!(event.notes.as_deref(), Some(RETURN_NOTE));
                assert_eq!(event.at, at(4, 2));
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[test]
    fn test_delivered_reaches_final_after_fourteen_days_exactly() {
        let last = at(0, 7);
        let mut rng = ScriptedRandom::minimums();
        assert_eq!(
            decide(OrderStatus::Delivered, 13, last, &mut rng),
            Decision::NoOp
        );
        match decide(OrderStatus::Delivered, 14, last, &mut rng) {
            Decision::Advance(event) => {
                assert_eq!(event.status, OrderStatus::Final);
                assert_eq!(event.at, last + Duration::days(14));
                assert_eq!(event.notes, None);
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[test]
    fn test_returned_refund_carries_return_trigger() {
        let mut rng = ScriptedRandom::default();
        rng.push_int(1).push_int(1).push_int(1);
        match decide(OrderStatus::Returned, 3, at(0, 0), &mut rng) {
            Decision::AdvanceWithRefund { event, trigger } => {
                assert_eq!(event.status, OrderStatus::Refunded);
                assert_eq!(event.notes.as_deref(), Some(RETURN_REFUND_NOTE));
                assert_eq!(trigger, RefundTrigger::Return);
            }
            other => panic!("expected refund advance, got {other:?}"),
        }
    }

    #[test]
    fn test_terminal_statuses_never_advance() {
        let mut rng = StdRandom::seeded(3);
        for elapsed in [0, 10, 1_000] {
            assert_eq!(
                decide(OrderStatus::Final, elapsed, at(0, 0), &mut rng),
                Decision::NoOp
            );
            assert_eq!(
                decide(OrderStatus::Refunded, elapsed, at(0, 0), &mut rng),
                Decision::NoOp
            );
        }
    }

    #[test]
    fn test_negative_elapsed_fails_every_gate() {
        // An event written with a future timestamp holds the order until
        // real time catches up.
        let mut rng = StdRandom::seeded(17);
        for status in [
            OrderStatus::Placed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Cancelled,
            OrderStatus::Delivered,
            OrderStatus::Returned,
        ] {
            for _ in 0..50 {
                assert_eq!(
                    decide(status, -1, at(5, 0), &mut rng),
                    Decision::NoOp,
                    "status {status}"
                );
            }
        }
    }

    #[test]
    fn test_decided_timestamps_always_move_forward() {
        let mut rng = StdRandom::seeded(99);
        let last = at(10, 3);
        for status in OrderStatus::ALL.iter().filter(|s| !s.is_terminal()) {
            for elapsed in 0..40 {
                let decision = decide(*status, elapsed, last, &mut rng);
                let event = match decision {
                    Decision::Advance(e) => e,
                    Decision::AdvanceWithRefund { event, .. } => event,
                    Decision::NoOp => continue,
                };
                if *status == OrderStatus::New {
                    assert_eq!(event.at, last);
                } else {
                    assert!(event.at > last, "{status}: {} !> {last}", event.at);
                }
            }
        }
    }

    #[test]
    fn test_elapsed_whole_days_floors() {
        assert_eq!(elapsed_whole_days(at(0, 0), at(3, 0)), 3);
        assert_eq!(elapsed_whole_days(at(0, 0), at(3, 23)), 3);
        assert_eq!(elapsed_whole_days(at(0, 12), at(3, 0)), 2);
        assert_eq!(elapsed_whole_days(at(3, 0), at(0, 12)), -3);
        assert_eq!(elapsed_whole_days(at(0, 0), at(0, 0)), 0);
    }
}
