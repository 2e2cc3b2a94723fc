// Order lifecycle domain: the status enumeration, the pure transition
// engine, and refund computation.

pub mod refund;
pub mod status;
pub mod transitions;

pub use status::{OrderStatus, ParseStatusError};
pub use transitions::{decide, elapsed_whole_days, Decision, PendingEvent, RefundTrigger};
