use crate::domain::order::ParseStatusError;

// ============================================================================
// Error Taxonomy
// ============================================================================
//
// Storage failures propagate to the caller immediately; retry policy is
// owned by the orchestrator, not this crate. Integrity violations abort
// the run rather than silently skipping the order, since they indicate
// upstream corruption. Transition decisions themselves are pure and
// cannot fail.
//
// ============================================================================

/// Failures of the order store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("corrupt status value for order {order_id}: {source}")]
    InvalidStatus {
        order_id: String,
        source: ParseStatusError,
    },
}

/// Failures of a simulation pass.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("order {order_id} is shipped but has no tracking or carrier on record")]
    MissingShipmentInfo { order_id: String },

    #[error("order {order_id} reached a return refund with no line items on record")]
    MissingLineItems { order_id: String },
}
