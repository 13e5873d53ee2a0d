//! Canonical → OpenAI wire request conversion.
//!
//! The adapter speaks two wire shapes: the Responses API with strict
//! top-level `{name, parameters}` tool declarations, and the legacy Chat
//! Completions API with nested `{function: {name, parameters}}` tools. Both
//! are produced here from the same canonical request; the shape decision
//! lives in the adapter and is a pure function of the model id.

use serde::Serialize;
use serde_json::Value;

use crate::messages::{ChatMessage, GenerationRequest, Role, ToolChoice, ToolDefinition};

pub(crate) fn tool_choice_str(choice: ToolChoice) -> &'static str {
    match choice {
        ToolChoice::Auto => "auto",
        ToolChoice::None => "none",
        ToolChoice::Required => "required",
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn arguments_string(arguments: &Value) -> String {
    serde_json::to_string(arguments).unwrap_or_else(|_| "{}".to_string())
}

// ── Chat Completions shape ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatWireMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<NestedTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatWireMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct NestedTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: NestedFunction,
}

#[derive(Debug, Serialize)]
pub(crate) struct NestedFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub strict: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<JsonSchemaFormat>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSchemaFormat {
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

pub(crate) fn chat_wire_message(message: &ChatMessage) -> ChatWireMessage {
    let tool_calls = if message.tool_calls.is_empty() {
        None
    } else {
        Some(
            message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: "function",
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: arguments_string(&call.arguments),
                    },
                })
                .collect(),
        )
    };

    ChatWireMessage {
        role: role_str(message.role),
        content: (!message.content.is_empty() || message.role == Role::Tool).then(|| message.content.clone()),
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

pub(crate) fn nested_tool(tool: &ToolDefinition) -> NestedTool {
    NestedTool {
        kind: "function",
        function: NestedFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
            strict: tool.strict,
        },
    }
}

pub(crate) fn chat_request(request: &GenerationRequest, tools: &[ToolDefinition]) -> ChatRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &request.system {
        messages.push(ChatWireMessage {
            role: "system",
            content: Some(system.clone()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    messages.extend(request.messages.iter().map(chat_wire_message));

    ChatRequest {
        model: request.config.model_id.clone(),
        messages,
        max_tokens: request.config.max_output_tokens,
        temperature: request.config.temperature,
        tools: (!tools.is_empty()).then(|| tools.iter().map(nested_tool).collect()),
        tool_choice: (!tools.is_empty()).then(|| tool_choice_str(request.config.tool_choice)),
        response_format: request.structured_output.as_ref().map(|output| ResponseFormat {
            kind: "json_schema",
            json_schema: Some(JsonSchemaFormat {
                name: output.name.clone(),
                schema: output.schema.clone(),
                strict: true,
            }),
        }),
    }
}

// ── Responses shape ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct ResponsesRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub input: Vec<InputItem>,
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<FlatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextConfig>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum InputItem {
    Message {
        role: &'static str,
        content: String,
    },
    FunctionCall {
        #[serde(rename = "type")]
        kind: &'static str,
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        #[serde(rename = "type")]
        kind: &'static str,
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct FlatTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub strict: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct TextConfig {
    pub format: TextFormat,
}

#[derive(Debug, Serialize)]
pub(crate) struct TextFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

pub(crate) fn responses_request(request: &GenerationRequest, tools: &[ToolDefinition]) -> ResponsesRequest {
    let mut input = Vec::with_capacity(request.messages.len());

    for message in &request.messages {
        match message.role {
            Role::Tool => {
                input.push(InputItem::FunctionCallOutput {
                    kind: "function_call_output",
                    call_id: message.tool_call_id.clone().unwrap_or_default(),
                    output: message.content.clone(),
                });
            }
            Role::Assistant if !message.tool_calls.is_empty() => {
                if !message.content.is_empty() {
                    input.push(InputItem::Message {
                        role: "assistant",
                        content: message.content.clone(),
                    });
                }
                for call in &message.tool_calls {
                    input.push(InputItem::FunctionCall {
                        kind: "function_call",
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: arguments_string(&call.arguments),
                    });
                }
            }
            role => {
                input.push(InputItem::Message {
                    role: role_str(role),
                    content: message.content.clone(),
                });
            }
        }
    }

    ResponsesRequest {
        model: request.config.model_id.clone(),
        instructions: request.system.clone(),
        input,
        max_output_tokens: request.config.max_output_tokens,
        temperature: request.config.temperature,
        tools: (!tools.is_empty()).then(|| {
            tools
                .iter()
                .map(|tool| FlatTool {
                    kind: "function",
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                    strict: tool.strict,
                })
                .collect()
        }),
        tool_choice: (!tools.is_empty()).then(|| tool_choice_str(request.config.tool_choice)),
        text: request.structured_output.as_ref().map(|output| TextConfig {
            format: TextFormat {
                kind: "json_schema",
                name: output.name.clone(),
                schema: output.schema.clone(),
                strict: true,
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::messages::{GenerationConfig, ToolCapability, ToolInvocation};

    fn request_with_tool_turn() -> GenerationRequest {
        GenerationRequest {
            system: Some("be brief".into()),
            messages: vec![
                ChatMessage::user("copy the file"),
                ChatMessage::assistant_tool_calls(
                    String::new(),
                    vec![ToolInvocation {
                        id: "call_1".into(),
                        name: "copy_file".into(),
                        arguments: serde_json::json!({"file_id": "f1"}),
                    }],
                ),
                ChatMessage::tool_result("call_1", r#"{"ok":true}"#),
            ],
            tools: vec![ToolDefinition {
                name: "copy_file".into(),
                description: "Copy a Drive file".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}, "required": [], "additionalProperties": false}),
                strict: true,
                capability: ToolCapability::Function,
            }],
            structured_output: None,
            config: GenerationConfig::new("gpt-4.1", 1024, Duration::from_secs(30)),
        }
    }

    #[test]
    fn chat_shape_nests_tools_under_function() {
        let request = request_with_tool_turn();
        let wire = chat_request(&request, &request.tools);
        let json = serde_json::to_value(&wire).unwrap();

        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "copy_file");
        assert_eq!(json["tool_choice"], "auto");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][2]["tool_calls"][0]["function"]["arguments"], r#"{"file_id":"f1"}"#);
        assert_eq!(json["messages"][3]["role"], "tool");
        assert_eq!(json["messages"][3]["tool_call_id"], "call_1");
    }

    #[test]
    fn responses_shape_uses_flat_tools_and_call_items() {
        let request = request_with_tool_turn();
        let wire = responses_request(&request, &request.tools);
        let json = serde_json::to_value(&wire).unwrap();

        assert_eq!(json["tools"][0]["name"], "copy_file");
        assert!(json["tools"][0].get("function").is_none());
        assert_eq!(json["instructions"], "be brief");
        assert_eq!(json["input"][1]["type"], "function_call");
        assert_eq!(json["input"][1]["call_id"], "call_1");
        assert_eq!(json["input"][2]["type"], "function_call_output");
    }

    #[test]
    fn structured_output_maps_to_json_schema_format() {
        let mut request = request_with_tool_turn();
        request.tools.clear();
        request.structured_output = Some(crate::messages::StructuredSchema {
            name: "consensus".into(),
            schema: serde_json::json!({"type": "object"}),
        });

        let chat = serde_json::to_value(chat_request(&request, &[])).unwrap();
        assert_eq!(chat["response_format"]["type"], "json_schema");
        assert_eq!(chat["response_format"]["json_schema"]["name"], "consensus");

        let responses = serde_json::to_value(responses_request(&request, &[])).unwrap();
        assert_eq!(responses["text"]["format"]["type"], "json_schema");
    }
}
