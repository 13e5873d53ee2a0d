//! Canonical message types shared by every provider adapter.
//!
//! Adapters translate these into their provider's wire format and back; the
//! orchestrator never sees a provider-specific shape. The conversion flow:
//!
//! ```text
//! GenerationRequest → provider wire request → provider wire response → ModelResponse
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message sender role in conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the whole conversation.
    System,
    /// End-user input.
    User,
    /// Model output, possibly carrying tool-call requests.
    Assistant,
    /// A tool execution result fed back to the model.
    Tool,
}

/// One conversation entry in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender role.
    pub role: Role,
    /// Plain text content. Empty for pure tool-call turns.
    pub content: String,
    /// Tool calls requested by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    /// For `Role::Tool` entries, the id of the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// A plain user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// A plain assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// An assistant turn consisting of tool-call requests.
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolInvocation>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// A tool result referencing the call that produced it.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A model-initiated request to invoke a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Provider-assigned call id, echoed back with the result.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// JSON arguments, parsed from the provider's argument payload.
    pub arguments: Value,
}

/// What a tool can do, beyond plain function calling.
///
/// Providers that cannot represent a capability silently drop the tool for
/// their call; the drop is recorded on the [`ModelResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCapability {
    /// Plain JSON-arguments function calling. Representable everywhere.
    Function,
    /// Live web search.
    WebSearch,
    /// Server-side code execution.
    CodeExecution,
    /// Image generation.
    ImageGeneration,
}

/// Canonical tool descriptor handed to adapters.
///
/// This is the single internal shape; each adapter owns a pure function from
/// it to its provider's wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Globally unique snake_case name.
    pub name: String,
    /// Model-facing description.
    pub description: String,
    /// JSON Schema (draft-07 subset) for the arguments object.
    pub parameters: Value,
    /// Whether the provider should enforce the schema strictly.
    pub strict: bool,
    /// Capability class, used for per-provider representability.
    pub capability: ToolCapability,
}

/// Controls whether the model must, may, or must not call tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides. Default; multi-step tool workflows require it.
    #[default]
    Auto,
    /// Tools are hidden from the model.
    None,
    /// The model must call at least one tool. Single-turn override only.
    Required,
}

/// A structured-output request for providers that support it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredSchema {
    /// Schema name, required by some providers.
    pub name: String,
    /// JSON Schema the output must satisfy.
    pub schema: Value,
}

/// Per-call generation parameters.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Catalog model id, e.g. `gpt-4.1-mini`.
    pub model_id: String,
    /// Output token budget. No implicit cap beyond this value.
    pub max_output_tokens: u32,
    /// Sampling temperature, provider default when unset.
    pub temperature: Option<f32>,
    /// Tool choice mode.
    pub tool_choice: ToolChoice,
    /// Hard wall-clock budget for the call including retries.
    pub deadline: Duration,
}

impl GenerationConfig {
    /// A config with the given model and deadline and neutral sampling.
    pub fn new(model_id: impl Into<String>, max_output_tokens: u32, deadline: Duration) -> Self {
        Self {
            model_id: model_id.into(),
            max_output_tokens,
            temperature: None,
            tool_choice: ToolChoice::Auto,
            deadline,
        }
    }
}

/// A complete adapter call: conversation, tools, and parameters.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// System instruction, kept separate because providers disagree on where
    /// it goes.
    pub system: Option<String>,
    /// Conversation in chronological order.
    pub messages: Vec<ChatMessage>,
    /// Tools offered for this call, pre-filtered by the registry.
    pub tools: Vec<ToolDefinition>,
    /// Structured output request, used by the judge call.
    pub structured_output: Option<StructuredSchema>,
    /// Generation parameters.
    pub config: GenerationConfig,
}

/// Error slot carried inside a [`ModelResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    /// Stable snake_case kind, see the error taxonomy.
    pub kind: String,
    /// Human-readable detail for developer consoles.
    pub message: String,
}

/// Outcome of one tool call, recorded as evidence on the response.
///
/// Never mutated after completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Call id assigned by the model.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments the model supplied.
    pub arguments: Value,
    /// Successful result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure, when the call did not succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    /// RFC 3339 start instant.
    pub started_at: String,
    /// RFC 3339 completion instant.
    pub finished_at: String,
}

/// The uniform result of one adapter call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Catalog model id that produced this response.
    pub model_id: String,
    /// Final text content. Empty while tool calls are pending.
    pub content: String,
    /// Adapter-derived confidence in `[0, 1]`.
    ///
    /// Providers expose no uniform signal, so finalized single-pass answers
    /// default to 0.8 and length-truncated answers to 0.6.
    pub confidence: f64,
    /// Model-reported reasoning, where the provider surfaces one.
    #[serde(default)]
    pub reasoning: String,
    /// Tool calls the model wants executed before it can finish.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_tool_calls: Vec<ToolInvocation>,
    /// Completed tool calls accumulated across the tool loop.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_evidence: Vec<ToolCallRecord>,
    /// Tools dropped because this provider cannot represent them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_tools: Vec<String>,
    /// Failure slot; a response with an error set contributes no content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ModelResponse {
    /// A response representing an adapter failure.
    pub fn from_error(model_id: impl Into<String>, error: &crate::LlmError) -> Self {
        Self {
            model_id: model_id.into(),
            content: String::new(),
            confidence: 0.0,
            reasoning: String::new(),
            pending_tool_calls: Vec::new(),
            tool_evidence: Vec::new(),
            dropped_tools: Vec::new(),
            error: Some(ResponseError {
                kind: error.kind().to_string(),
                message: error.to_string(),
            }),
        }
    }

    /// Whether the model finished with usable content.
    pub fn is_final(&self) -> bool {
        self.error.is_none() && self.pending_tool_calls.is_empty()
    }
}

/// Confidence assigned by adapters based on how generation stopped.
pub(crate) fn confidence_for_finish(truncated: bool) -> f64 {
    if truncated { 0.6 } else { 0.8 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_response_json_round_trips() {
        let response = ModelResponse {
            model_id: "gpt-4.1-mini".into(),
            content: "Paris".into(),
            confidence: 0.8,
            reasoning: "well-known fact".into(),
            pending_tool_calls: Vec::new(),
            tool_evidence: vec![ToolCallRecord {
                id: "call_1".into(),
                name: "search_drive_files".into(),
                arguments: serde_json::json!({"query": "capitals"}),
                result: Some(serde_json::json!({"files": []})),
                error: None,
                started_at: "2025-01-01T00:00:00Z".into(),
                finished_at: "2025-01-01T00:00:01Z".into(),
            }],
            dropped_tools: vec!["generate_image".into()],
            error: None,
        };

        let json = serde_json::to_string(&response).unwrap();
        let back: ModelResponse = serde_json::from_str(&json).unwrap();

        assert_eq!(back.model_id, response.model_id);
        assert_eq!(back.content, response.content);
        assert_eq!(back.tool_evidence.len(), 1);
        assert_eq!(back.dropped_tools, response.dropped_tools);
        assert!(back.is_final());
    }

    #[test]
    fn pending_tool_calls_mean_not_final() {
        let mut response = ModelResponse::from_error("m", &crate::LlmError::Timeout);
        assert!(!response.is_final());

        response.error = None;
        response.pending_tool_calls.push(ToolInvocation {
            id: "c1".into(),
            name: "copy_file".into(),
            arguments: serde_json::json!({}),
        });
        assert!(!response.is_final());

        response.pending_tool_calls.clear();
        assert!(response.is_final());
    }
}
