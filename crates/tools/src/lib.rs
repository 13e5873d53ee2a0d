//! Tool registry and executor.
//!
//! Centralizes tool definitions so every provider adapter speaks the same
//! intent: descriptors declare a strict JSON Schema for their arguments, the
//! registry validates and executes calls under the calling user's identity,
//! and the Drive tool family operates through a facade owning OAuth.

mod approval;
mod descriptor;
mod drive;
mod registry;
mod schema;

use std::{sync::Arc, time::Duration};

pub use approval::ApprovalSink;
pub use descriptor::{ToolDescriptor, ToolHandler};
pub use drive::{DriveError, DriveFacade, DriveFile, DriveResult, drive_tools};
pub use registry::ToolRegistry;
pub use schema::{SchemaBuilder, check_strict_subset};

/// Executor-level failures.
///
/// Tool failures are recorded on the call and returned to the model, which
/// may attempt an alternative path; they never abort the enclosing
/// generation on their own.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// No tool registered under this name.
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// Arguments failed schema validation.
    #[error("invalid arguments: {0}")]
    ArgumentInvalid(String),

    /// The calling user may not perform this operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The handler exceeded its per-call deadline and was cancelled.
    #[error("tool handler timed out")]
    HandlerTimeout,

    /// The handler failed.
    #[error("tool handler failed: {0}")]
    HandlerError(String),
}

impl ToolError {
    /// Stable snake_case kind string recorded on tool call results.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::ArgumentInvalid(_) => "argument_invalid",
            Self::Unauthorized(_) => "unauthorized",
            Self::HandlerTimeout => "handler_timeout",
            Self::HandlerError(_) => "handler_error",
        }
    }
}

/// Identity and capabilities a tool call executes under.
///
/// Drive clients are built per user and never shared across users.
#[derive(Clone)]
pub struct UserContext {
    /// The calling user.
    pub user_id: i64,
    /// The user's Drive facade, when Google is connected.
    pub drive: Option<Arc<dyn DriveFacade>>,
    /// Where proposed Drive edits go when the approval workflow is active.
    pub approvals: Option<Arc<dyn ApprovalSink>>,
    /// Route Drive writes through the approval workflow.
    pub require_approval: bool,
    /// Lifetime of a pending approval request.
    pub approval_ttl: Duration,
}

impl UserContext {
    /// A context with no Drive connection.
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            drive: None,
            approvals: None,
            require_approval: false,
            approval_ttl: Duration::from_secs(3_600),
        }
    }

    /// Attach a Drive facade.
    pub fn with_drive(mut self, drive: Arc<dyn DriveFacade>) -> Self {
        self.drive = Some(drive);
        self
    }

    /// Activate the approval workflow for Drive writes.
    pub fn with_approvals(mut self, sink: Arc<dyn ApprovalSink>, ttl: Duration) -> Self {
        self.approvals = Some(sink);
        self.require_approval = true;
        self.approval_ttl = ttl;
        self
    }
}
