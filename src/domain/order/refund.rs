use rust_decimal::Decimal;

use crate::models::{LineItem, ReturnedItem};
use crate::rng::RandomSource;

// ============================================================================
// Refund / Return Computer
// ============================================================================
//
// Derives refund amounts and returned-item payloads from stored order data
// at the moment a refund-triggering transition fires. Cancellations refund
// the order's full stored total; returns refund a sampled subset of line
// items at unit price × quantity.
//
// ============================================================================

pub const RETURN_REASONS: [&str; 4] = ["defective", "wrong_item", "changed_mind", "size_issue"];

pub const CANCELLATION_REASON: &str = "customer_cancelled";

/// Materialized refund: total amount, optional item breakdown, reason code.
#[derive(Debug, Clone, PartialEq)]
pub struct RefundBreakdown {
    pub amount: Decimal,
    pub items: Option<Vec<ReturnedItem>>,
    pub reason: String,
}

/// Full refund of the order's stored total. No item-level breakdown:
/// nothing shipped, everything comes back.
pub fn cancellation_refund(order_total: Decimal) -> RefundBreakdown {
    RefundBreakdown {
        amount: order_total,
        items: None,
        reason: CANCELLATION_REASON.to_string(),
    }
}

/// Partial refund over a random subset of 1 to `min(3, line_items.len())`
/// of the order's line items. Per-item refund is unit price × quantity;
/// the total is their sum.
///
/// Callers must not pass an empty slice; the driver treats an order
/// reaching this point without line items as corrupt upstream data.
pub fn return_refund(line_items: &[LineItem], rng: &mut dyn RandomSource) -> RefundBreakdown {
    debug_assert!(!line_items.is_empty());

    let max_items = line_items.len().min(3);
    let count = rng.int_between(1, max_items as i64) as usize;
    let picked = rng.sample(line_items.len(), count);

    let mut items = Vec::with_capacity(count);
    let mut total = Decimal::ZERO;
    for idx in picked {
        let line = &line_items[idx];
        let line_refund = line.unit_price * Decimal::from(line.quantity);
        total += line_refund;
        items.push(ReturnedItem {
            product_id: line.product_id.clone(),
            product_name: line.product_name.clone(),
            product_category: line.product_category.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            refund_amount: line_refund,
        });
    }

    let reason = RETURN_REASONS[rng.index(RETURN_REASONS.len())];
    RefundBreakdown {
        amount: total,
        items: Some(items),
        reason: reason.to_string(),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
