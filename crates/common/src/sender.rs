//! The contract every sender implements.

use async_trait::async_trait;

use crate::context::CallContext;
use crate::task::AggregationResult;

/// Delivers one task's aggregation results to an external backend.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Short sender name used in logs.
    fn name(&self) -> &'static str;

    /// Send `data`, honouring the cancellation and deadline of `ctx`.
    ///
    /// Partial delivery is reported as success; only a complete failure or
    /// a fatal setup error is returned as `Err`.
    async fn send(&self, ctx: &CallContext, data: &[AggregationResult]) -> anyhow::Result<()>;
}
