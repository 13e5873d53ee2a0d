//! The tool loop driver.
//!
//! Within a single adapter call, alternates provider → tool execution →
//! provider until the model returns a final answer or a budget trips.
//! States: Calling → Executing → Resuming → Finalized / Aborted.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use jiff::Timestamp;
use llm::{
    SharedProvider,
    messages::{ChatMessage, GenerationRequest, ModelResponse, ResponseError, ToolCallRecord, ToolInvocation},
};
use tokio_util::sync::CancellationToken;
use tools::{ToolRegistry, UserContext};

/// Drives provider ↔ tool iterations for one model turn.
#[derive(Clone)]
pub struct ToolLoop {
    registry: Arc<ToolRegistry>,
    max_iterations: u32,
    tool_deadline: Duration,
}

impl ToolLoop {
    /// A driver over the given registry and budgets.
    pub fn new(registry: Arc<ToolRegistry>, max_iterations: u32, tool_deadline: Duration) -> Self {
        Self {
            registry,
            max_iterations: max_iterations.max(1),
            tool_deadline,
        }
    }

    /// Run the loop to a terminal [`ModelResponse`].
    ///
    /// Tool calls from one model turn execute in parallel; their results are
    /// returned to the model in request order. Adapter failures become the
    /// response's error slot; accumulated tool evidence survives every exit
    /// path.
    pub async fn run(
        &self,
        provider: SharedProvider,
        mut request: GenerationRequest,
        ctx: &UserContext,
        cancel: &CancellationToken,
    ) -> ModelResponse {
        let model_id = request.config.model_id.clone();
        let deadline_at = Instant::now() + request.config.deadline;
        let mut evidence: Vec<ToolCallRecord> = Vec::new();
        let mut last_content = String::new();

        for iteration in 0..self.max_iterations {
            let Some(remaining) = deadline_at.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()) else {
                return aborted(&model_id, last_content, evidence, "timeout", "generation deadline exceeded");
            };

            request.config.deadline = remaining;

            // Calling
            let generated = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return aborted(&model_id, last_content, evidence, "cancelled", "generation cancelled");
                }
                result = provider.generate(request.clone()) => result,
            };

            let mut response = match generated {
                Ok(response) => response,
                Err(error) => {
                    let mut response = ModelResponse::from_error(&model_id, &error);
                    response.tool_evidence = evidence;
                    return response;
                }
            };

            if response.pending_tool_calls.is_empty() {
                // Finalized
                response.tool_evidence = evidence;
                return response;
            }

            last_content = response.content.clone();
            let pending = response.pending_tool_calls.clone();

            log::debug!(
                "model {model_id} requested {count} tool call(s) in iteration {iteration}",
                count = pending.len()
            );

            // Executing: all calls of this turn run concurrently, results
            // keep request order.
            let executions = futures::future::join_all(
                pending.iter().map(|call| self.execute_call(call, ctx)),
            );

            let records = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return aborted(&model_id, last_content, evidence, "cancelled", "generation cancelled");
                }
                records = executions => records,
            };

            // Resuming: extend the conversation with the tool turn.
            request
                .messages
                .push(ChatMessage::assistant_tool_calls(response.content.clone(), pending.clone()));

            for record in &records {
                request
                    .messages
                    .push(ChatMessage::tool_result(record.id.clone(), result_payload(record)));
            }

            evidence.extend(records);
        }

        // Aborted: iteration cap reached.
        aborted(
            &model_id,
            last_content,
            evidence,
            "iteration_cap_exceeded",
            &format!("tool loop exceeded {} iterations", self.max_iterations),
        )
    }

    async fn execute_call(&self, call: &ToolInvocation, ctx: &UserContext) -> ToolCallRecord {
        let started_at = Timestamp::now();

        let outcome = self
            .registry
            .validate_and_execute(&call.name, call.arguments.clone(), ctx, Some(self.tool_deadline))
            .await;

        let finished_at = Timestamp::now();

        match outcome {
            Ok(result) => ToolCallRecord {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                result: Some(result),
                error: None,
                started_at: started_at.to_string(),
                finished_at: finished_at.to_string(),
            },
            Err(error) => {
                log::warn!("tool '{}' failed: {error}", call.name);

                ToolCallRecord {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: None,
                    error: Some(ResponseError {
                        kind: error.kind().to_string(),
                        message: error.to_string(),
                    }),
                    started_at: started_at.to_string(),
                    finished_at: finished_at.to_string(),
                }
            }
        }
    }
}

/// The payload handed back to the model for one completed call.
fn result_payload(record: &ToolCallRecord) -> String {
    let value = match (&record.result, &record.error) {
        (Some(result), _) => result.clone(),
        (None, Some(error)) => serde_json::json!({
            "error": {"kind": error.kind, "message": error.message}
        }),
        (None, None) => serde_json::Value::Null,
    };

    serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string())
}

fn aborted(
    model_id: &str,
    content: String,
    evidence: Vec<ToolCallRecord>,
    kind: &str,
    message: &str,
) -> ModelResponse {
    ModelResponse {
        model_id: model_id.to_string(),
        content,
        confidence: 0.0,
        reasoning: String::new(),
        pending_tool_calls: Vec::new(),
        tool_evidence: evidence,
        dropped_tools: Vec::new(),
        error: Some(ResponseError {
            kind: kind.to_string(),
            message: message.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use config::ProviderKind;
    use llm::{
        ChatProvider, LlmResult,
        messages::{GenerationConfig, ToolCapability, ToolDefinition},
    };
    use serde_json::{Value, json};
    use tools::{SchemaBuilder, ToolDescriptor, ToolHandler};

    use super::*;

    struct CountingHandler;

    #[async_trait]
    impl ToolHandler for CountingHandler {
        async fn run(&self, _ctx: &UserContext, args: Value) -> Result<Value, tools::ToolError> {
            Ok(json!({"seen": args["n"]}))
        }
    }

    /// Requests `calls_per_turn` tool calls for `tool_turns` turns, then
    /// finalizes.
    struct ScriptedProvider {
        tool_turns: u32,
        calls_per_turn: usize,
        turns_taken: Mutex<u32>,
    }

    impl ScriptedProvider {
        fn new(tool_turns: u32, calls_per_turn: usize) -> Self {
            Self {
                tool_turns,
                calls_per_turn,
                turns_taken: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenAi
        }

        fn can_represent(&self, _tool: &ToolDefinition) -> bool {
            true
        }

        async fn generate(&self, request: GenerationRequest) -> LlmResult<ModelResponse> {
            let mut turns = self.turns_taken.lock().unwrap();

            if *turns < self.tool_turns {
                *turns += 1;
                let turn = *turns;

                let pending = (0..self.calls_per_turn)
                    .map(|n| ToolInvocation {
                        id: format!("call_{turn}_{n}"),
                        name: "counting".into(),
                        arguments: json!({"n": n}),
                    })
                    .collect();

                return Ok(ModelResponse {
                    model_id: request.config.model_id,
                    content: String::new(),
                    confidence: 0.0,
                    reasoning: String::new(),
                    pending_tool_calls: pending,
                    tool_evidence: Vec::new(),
                    dropped_tools: Vec::new(),
                    error: None,
                });
            }

            // Tool results from the previous turn must be present in order.
            let tool_results: Vec<&ChatMessage> = request
                .messages
                .iter()
                .filter(|message| message.tool_call_id.is_some())
                .collect();
            assert!(!tool_results.is_empty());

            Ok(ModelResponse {
                model_id: request.config.model_id,
                content: "done".into(),
                confidence: 0.8,
                reasoning: String::new(),
                pending_tool_calls: Vec::new(),
                tool_evidence: Vec::new(),
                dropped_tools: Vec::new(),
                error: None,
            })
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDescriptor::new(
                "counting",
                "Counts calls",
                SchemaBuilder::new().number("n", "call index").build(),
                ToolCapability::Function,
                Arc::new(CountingHandler),
            )
            .unwrap(),
        );
        Arc::new(registry)
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: None,
            messages: vec![ChatMessage::user("go")],
            tools: Vec::new(),
            structured_output: None,
            config: GenerationConfig::new("test-model", 512, Duration::from_secs(30)),
        }
    }

    #[tokio::test]
    async fn resolves_tool_turns_and_finalizes() {
        let driver = ToolLoop::new(registry(), 10, Duration::from_secs(5));
        let provider = Arc::new(ScriptedProvider::new(2, 3));

        let response = driver
            .run(provider, request(), &UserContext::new(1), &CancellationToken::new())
            .await;

        assert!(response.error.is_none());
        assert_eq!(response.content, "done");
        assert_eq!(response.tool_evidence.len(), 6);

        // Evidence keeps request order within each turn.
        assert_eq!(response.tool_evidence[0].id, "call_1_0");
        assert_eq!(response.tool_evidence[1].id, "call_1_1");
        assert_eq!(response.tool_evidence[2].id, "call_1_2");
        assert_eq!(response.tool_evidence[3].id, "call_2_0");
    }

    #[tokio::test]
    async fn iteration_cap_aborts_with_partial_evidence() {
        let driver = ToolLoop::new(registry(), 3, Duration::from_secs(5));
        let provider = Arc::new(ScriptedProvider::new(100, 1));

        let response = driver
            .run(provider, request(), &UserContext::new(1), &CancellationToken::new())
            .await;

        let error = response.error.expect("cap must abort");
        assert_eq!(error.kind, "iteration_cap_exceeded");
        assert_eq!(response.tool_evidence.len(), 3);
    }

    #[tokio::test]
    async fn unknown_tool_errors_are_returned_to_the_model() {
        struct BadToolProvider {
            asked: Mutex<bool>,
        }

        #[async_trait]
        impl ChatProvider for BadToolProvider {
            fn kind(&self) -> ProviderKind {
                ProviderKind::OpenAi
            }

            fn can_represent(&self, _tool: &ToolDefinition) -> bool {
                true
            }

            async fn generate(&self, request: GenerationRequest) -> LlmResult<ModelResponse> {
                let mut asked = self.asked.lock().unwrap();

                if !*asked {
                    *asked = true;
                    return Ok(ModelResponse {
                        model_id: request.config.model_id,
                        content: String::new(),
                        confidence: 0.0,
                        reasoning: String::new(),
                        pending_tool_calls: vec![ToolInvocation {
                            id: "c1".into(),
                            name: "no_such_tool".into(),
                            arguments: json!({}),
                        }],
                        tool_evidence: Vec::new(),
                        dropped_tools: Vec::new(),
                        error: None,
                    });
                }

                // The error payload must have reached the model.
                let last = request.messages.last().unwrap();
                assert_eq!(last.tool_call_id.as_deref(), Some("c1"));
                assert!(last.content.contains("unknown_tool"));

                Ok(ModelResponse {
                    model_id: request.config.model_id,
                    content: "recovered".into(),
                    confidence: 0.8,
                    reasoning: String::new(),
                    pending_tool_calls: Vec::new(),
                    tool_evidence: Vec::new(),
                    dropped_tools: Vec::new(),
                    error: None,
                })
            }
        }

        let driver = ToolLoop::new(registry(), 5, Duration::from_secs(5));
        let provider = Arc::new(BadToolProvider {
            asked: Mutex::new(false),
        });

        let response = driver
            .run(provider, request(), &UserContext::new(1), &CancellationToken::new())
            .await;

        assert_eq!(response.content, "recovered");
        assert_eq!(response.tool_evidence.len(), 1);
        assert_eq!(response.tool_evidence[0].error.as_ref().unwrap().kind, "unknown_tool");
    }

    #[tokio::test]
    async fn cancellation_yields_a_cancelled_response() {
        let driver = ToolLoop::new(registry(), 5, Duration::from_secs(5));
        let provider = Arc::new(ScriptedProvider::new(100, 1));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let response = driver.run(provider, request(), &UserContext::new(1), &cancel).await;

        assert_eq!(response.error.unwrap().kind, "cancelled");
    }
}
