//! Canonical → Anthropic messages API conversion.
//!
//! Anthropic keeps the system prompt out of the message list, declares tools
//! with a top-level `input_schema`, and receives tool results as
//! `tool_result` blocks inside a user message.

use serde::Serialize;
use serde_json::Value;

use crate::messages::{GenerationRequest, Role, ToolChoice, ToolDefinition};

#[derive(Debug, Serialize)]
pub(crate) struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<AnthropicToolChoice>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub(crate) enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },
    #[serde(rename = "tool_result")]
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize)]
pub(crate) struct AnthropicTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnthropicToolChoice {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

pub(crate) fn anthropic_request(request: &GenerationRequest, tools: &[ToolDefinition]) -> AnthropicRequest {
    let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(request.messages.len());

    for message in &request.messages {
        match message.role {
            Role::Tool => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message.content.clone(),
                };

                // Results for one assistant turn share a single user message.
                match messages.last_mut() {
                    Some(last) if last.role == "user" && matches!(last.content.first(), Some(ContentBlock::ToolResult { .. })) => {
                        last.content.push(block);
                    }
                    _ => messages.push(AnthropicMessage {
                        role: "user",
                        content: vec![block],
                    }),
                }
            }
            Role::Assistant => {
                let mut content = Vec::new();

                if !message.content.is_empty() {
                    content.push(ContentBlock::Text {
                        text: message.content.clone(),
                    });
                }

                for call in &message.tool_calls {
                    content.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    });
                }

                if !content.is_empty() {
                    messages.push(AnthropicMessage {
                        role: "assistant",
                        content,
                    });
                }
            }
            Role::User | Role::System => {
                messages.push(AnthropicMessage {
                    role: "user",
                    content: vec![ContentBlock::Text {
                        text: message.content.clone(),
                    }],
                });
            }
        }
    }

    let mut system = request.system.clone();

    // No native structured-output mode; fold the schema into the system
    // instruction and let the caller's parse ladder handle deviations.
    if let Some(output) = &request.structured_output {
        let schema = serde_json::to_string(&output.schema).unwrap_or_else(|_| "{}".to_string());
        let instruction = format!("Respond with a single JSON object conforming to this JSON Schema, and nothing else:\n{schema}");
        system = Some(match system {
            Some(existing) => format!("{existing}\n\n{instruction}"),
            None => instruction,
        });
    }

    let tool_choice = match request.config.tool_choice {
        _ if tools.is_empty() => None,
        ToolChoice::Auto => Some(AnthropicToolChoice { kind: "auto" }),
        ToolChoice::Required => Some(AnthropicToolChoice { kind: "any" }),
        ToolChoice::None => None,
    };

    let tools = match request.config.tool_choice {
        ToolChoice::None => None,
        _ if tools.is_empty() => None,
        _ => Some(
            tools
                .iter()
                .map(|tool| AnthropicTool {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.parameters.clone(),
                })
                .collect(),
        ),
    };

    AnthropicRequest {
        model: request.config.model_id.clone(),
        max_tokens: request.config.max_output_tokens,
        system,
        messages,
        temperature: request.config.temperature,
        tools,
        tool_choice,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::messages::{ChatMessage, GenerationConfig, ToolCapability, ToolInvocation};

    fn tool_turn_request() -> GenerationRequest {
        GenerationRequest {
            system: Some("be brief".into()),
            messages: vec![
                ChatMessage::user("copy the file"),
                ChatMessage::assistant_tool_calls(
                    String::new(),
                    vec![
                        ToolInvocation {
                            id: "toolu_1".into(),
                            name: "find_folder_by_name".into(),
                            arguments: serde_json::json!({"name": "Archive"}),
                        },
                        ToolInvocation {
                            id: "toolu_2".into(),
                            name: "search_drive_files".into(),
                            arguments: serde_json::json!({"query": "Q4.md"}),
                        },
                    ],
                ),
                ChatMessage::tool_result("toolu_1", r#"{"folder_id":"a"}"#),
                ChatMessage::tool_result("toolu_2", r#"{"files":[]}"#),
            ],
            tools: vec![ToolDefinition {
                name: "find_folder_by_name".into(),
                description: "Find a folder".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}, "required": [], "additionalProperties": false}),
                strict: true,
                capability: ToolCapability::Function,
            }],
            structured_output: None,
            config: GenerationConfig::new("claude-sonnet-4-20250514", 1024, Duration::from_secs(30)),
        }
    }

    #[test]
    fn tools_use_top_level_input_schema() {
        let request = tool_turn_request();
        let wire = anthropic_request(&request, &request.tools);
        let json = serde_json::to_value(&wire).unwrap();

        assert_eq!(json["tools"][0]["name"], "find_folder_by_name");
        assert!(json["tools"][0].get("input_schema").is_some());
        assert!(json["tools"][0].get("parameters").is_none());
        assert_eq!(json["tool_choice"]["type"], "auto");
        assert_eq!(json["system"], "be brief");
    }

    #[test]
    fn tool_results_merge_into_one_user_message() {
        let request = tool_turn_request();
        let wire = anthropic_request(&request, &request.tools);

        assert_eq!(wire.messages.len(), 3);
        assert_eq!(wire.messages[2].role, "user");
        assert_eq!(wire.messages[2].content.len(), 2);
    }

    #[test]
    fn structured_output_folds_schema_into_system() {
        let mut request = tool_turn_request();
        request.structured_output = Some(crate::messages::StructuredSchema {
            name: "consensus".into(),
            schema: serde_json::json!({"type": "object"}),
        });

        let wire = anthropic_request(&request, &[]);
        let system = wire.system.unwrap();

        assert!(system.starts_with("be brief"));
        assert!(system.contains("JSON Schema"));
    }

    #[test]
    fn required_tool_choice_maps_to_any() {
        let mut request = tool_turn_request();
        request.config.tool_choice = ToolChoice::Required;

        let wire = anthropic_request(&request, &request.tools);
        assert_eq!(wire.tool_choice.unwrap().kind, "any");
    }
}
