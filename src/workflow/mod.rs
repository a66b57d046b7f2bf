pub mod batch_ctx;
pub mod batch_flow;
pub mod retry;
pub mod validation;

pub use batch_ctx::BatchCtx;
pub use batch_flow::{AbandonReason, BatchFlow, BatchOutcome};
pub use retry::{BackoffPolicy, PacingPolicy, RetryPolicy, RouteCursor};
pub use validation::ValidationMode;
