//! The tool registry and executor.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use indexmap::IndexMap;
use llm::{ChatProvider, messages::ToolDefinition};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::{ToolDescriptor, ToolError, UserContext};

const DEFAULT_PER_USER_CONCURRENCY: usize = 4;
const DEFAULT_CALL_DEADLINE: Duration = Duration::from_secs(30);

/// Central tool registry.
///
/// Read-mostly and immutable after startup: tools are registered while the
/// process boots, then the registry is shared behind an `Arc`.
pub struct ToolRegistry {
    tools: IndexMap<String, ToolDescriptor>,
    user_slots: DashMap<i64, Arc<Semaphore>>,
    per_user_concurrency: usize,
    default_deadline: Duration,
}

impl ToolRegistry {
    /// An empty registry with default execution limits.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_PER_USER_CONCURRENCY, DEFAULT_CALL_DEADLINE)
    }

    /// An empty registry with explicit limits.
    pub fn with_limits(per_user_concurrency: usize, default_deadline: Duration) -> Self {
        Self {
            tools: IndexMap::new(),
            user_slots: DashMap::new(),
            per_user_concurrency: per_user_concurrency.max(1),
            default_deadline,
        }
    }

    /// Register a tool. Idempotent by name: a second registration under an
    /// existing name is a no-op.
    pub fn register(&mut self, descriptor: ToolDescriptor) {
        if self.tools.contains_key(descriptor.name()) {
            log::debug!("tool '{}' already registered, keeping existing", descriptor.name());
            return;
        }

        self.tools.insert(descriptor.name().to_string(), descriptor);
    }

    /// Look up a descriptor.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All canonical definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(ToolDescriptor::definition).collect()
    }

    /// The subset of definitions the given provider can represent. The
    /// adapter owns the final canonical → wire translation.
    pub fn list_for(&self, provider: &dyn ChatProvider) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(ToolDescriptor::definition)
            .filter(|definition| provider.can_represent(definition))
            .collect()
    }

    fn slot_for(&self, user_id: i64) -> Arc<Semaphore> {
        self.user_slots
            .entry(user_id)
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_user_concurrency)))
            .clone()
    }

    /// Validate arguments and execute the named tool under `ctx`.
    ///
    /// Handlers run on a bounded per-user pool; a handler exceeding the
    /// deadline is cancelled and reported as `HandlerTimeout`.
    pub async fn validate_and_execute(
        &self,
        name: &str,
        args: Value,
        ctx: &UserContext,
        deadline: Option<Duration>,
    ) -> Result<Value, ToolError> {
        let Some(descriptor) = self.tools.get(name) else {
            return Err(ToolError::UnknownTool(name.to_string()));
        };

        descriptor.validate(&args)?;

        let slot = self.slot_for(ctx.user_id);
        let _permit = slot
            .acquire()
            .await
            .map_err(|_| ToolError::HandlerError("executor shutting down".into()))?;

        let handler = descriptor.handler();
        let deadline = deadline.unwrap_or(self.default_deadline);

        match tokio::time::timeout(deadline, handler.run(ctx, args)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("tool '{name}' exceeded its {deadline:?} deadline, cancelled");
                Err(ToolError::HandlerTimeout)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use llm::messages::ToolCapability;
    use serde_json::json;

    use super::*;
    use crate::SchemaBuilder;

    struct EchoHandler;

    #[async_trait]
    impl crate::ToolHandler for EchoHandler {
        async fn run(&self, _ctx: &UserContext, args: Value) -> Result<Value, ToolError> {
            Ok(json!({"echo": args}))
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl crate::ToolHandler for SlowHandler {
        async fn run(&self, _ctx: &UserContext, _args: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(300)).await;
            Ok(json!({}))
        }
    }

    fn echo_descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "echo",
            "Echo the arguments back",
            SchemaBuilder::new().string("text", "Text to echo").build(),
            ToolCapability::Function,
            Arc::new(EchoHandler),
        )
        .unwrap()
    }

    #[test]
    fn registering_twice_is_a_no_op() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_descriptor());
        registry.register(echo_descriptor());

        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn idempotent_handler_yields_same_result_twice() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_descriptor());
        let ctx = UserContext::new(1);

        let args = json!({"text": "hi"});
        let first = registry
            .validate_and_execute("echo", args.clone(), &ctx, None)
            .await
            .unwrap();
        let second = registry.validate_and_execute("echo", args, &ctx, None).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let registry = ToolRegistry::new();
        let ctx = UserContext::new(1);

        let error = registry
            .validate_and_execute("nope", json!({}), &ctx, None)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), "unknown_tool");
    }

    #[tokio::test]
    async fn extra_arguments_fail_validation() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_descriptor());
        let ctx = UserContext::new(1);

        let error = registry
            .validate_and_execute("echo", json!({"text": "hi", "extra": 1}), &ctx, None)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), "argument_invalid");

        let error = registry
            .validate_and_execute("echo", json!({}), &ctx, None)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), "argument_invalid");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handlers_are_cancelled_at_the_deadline() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDescriptor::new(
                "slow",
                "Sleep forever",
                SchemaBuilder::new().build(),
                ToolCapability::Function,
                Arc::new(SlowHandler),
            )
            .unwrap(),
        );
        let ctx = UserContext::new(1);

        let error = registry
            .validate_and_execute("slow", json!({}), &ctx, Some(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), "handler_timeout");
    }
}
