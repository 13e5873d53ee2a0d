//! Approval workflow hook for Drive writes.

use async_trait::async_trait;
use storage::ApprovalRecord;

use crate::ToolError;

/// Receives proposed Drive edits when the approval workflow is active.
///
/// The server wires this to the repository; write tools submit a pending
/// record here instead of side-effecting, and the edit is applied when the
/// user approves.
#[async_trait]
pub trait ApprovalSink: Send + Sync {
    /// Persist a pending approval request.
    async fn submit(&self, record: ApprovalRecord) -> Result<(), ToolError>;
}
