//! OpenAI wire response → canonical conversion.

use serde::Deserialize;
use serde_json::Value;

use crate::messages::{ModelResponse, ToolInvocation, confidence_for_finish};

fn parse_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

// ── Chat Completions shape ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ChatToolCall>,
    /// Surfaced by reasoning models on OpenAI-compatible APIs.
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatToolCall {
    pub id: String,
    pub function: ChatFunctionCall,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatFunctionCall {
    pub name: String,
    pub arguments: String,
}

impl ChatResponse {
    pub(crate) fn into_model_response(self, model_id: &str, dropped_tools: Vec<String>) -> ModelResponse {
        let mut content = String::new();
        let mut reasoning = String::new();
        let mut pending = Vec::new();
        let mut truncated = false;

        if let Some(choice) = self.choices.into_iter().next() {
            truncated = choice.finish_reason.as_deref() == Some("length");
            content = choice.message.content.unwrap_or_default();
            reasoning = choice.message.reasoning_content.unwrap_or_default();

            pending = choice
                .message
                .tool_calls
                .into_iter()
                .map(|call| ToolInvocation {
                    id: call.id,
                    name: call.function.name,
                    arguments: parse_arguments(&call.function.arguments),
                })
                .collect();
        }

        let confidence = if pending.is_empty() {
            confidence_for_finish(truncated)
        } else {
            0.0
        };

        ModelResponse {
            model_id: model_id.to_string(),
            content,
            confidence,
            reasoning,
            pending_tool_calls: pending,
            tool_evidence: Vec::new(),
            dropped_tools,
            error: None,
        }
    }
}

// ── Responses shape ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ResponsesResponse {
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum OutputItem {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum OutputContent {
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(other)]
    Unknown,
}

impl ResponsesResponse {
    pub(crate) fn into_model_response(self, model_id: &str, dropped_tools: Vec<String>) -> ModelResponse {
        let mut content = String::new();
        let mut pending = Vec::new();

        for item in self.output {
            match item {
                OutputItem::Message { content: parts } => {
                    for part in parts {
                        if let OutputContent::OutputText { text } = part {
                            content.push_str(&text);
                        }
                    }
                }
                OutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => {
                    pending.push(ToolInvocation {
                        id: call_id,
                        name,
                        arguments: parse_arguments(&arguments),
                    });
                }
                OutputItem::Unknown => {}
            }
        }

        let truncated = self.status.as_deref() == Some("incomplete");
        let confidence = if pending.is_empty() {
            confidence_for_finish(truncated)
        } else {
            0.0
        };

        ModelResponse {
            model_id: model_id.to_string(),
            content,
            confidence,
            reasoning: String::new(),
            pending_tool_calls: pending,
            tool_evidence: Vec::new(),
            dropped_tools,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_response_with_tool_calls_is_pending() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "search_drive_files", "arguments": "{\"query\":\"Q4\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;

        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let response = parsed.into_model_response("gpt-4o", Vec::new());

        assert_eq!(response.pending_tool_calls.len(), 1);
        assert_eq!(response.pending_tool_calls[0].name, "search_drive_files");
        assert_eq!(response.pending_tool_calls[0].arguments["query"], "Q4");
        assert!(!response.is_final());
    }

    #[test]
    fn chat_response_final_answer_gets_default_confidence() {
        let raw = r#"{"choices": [{"message": {"content": "Paris"}, "finish_reason": "stop"}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let response = parsed.into_model_response("gpt-4o", Vec::new());

        assert_eq!(response.content, "Paris");
        assert!((response.confidence - 0.8).abs() < f64::EPSILON);
        assert!(response.is_final());
    }

    #[test]
    fn truncated_chat_response_lowers_confidence() {
        let raw = r#"{"choices": [{"message": {"content": "Par"}, "finish_reason": "length"}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let response = parsed.into_model_response("gpt-4o", Vec::new());

        assert!((response.confidence - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn responses_output_collects_text_and_calls() {
        let raw = r#"{
            "status": "completed",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [{"type": "output_text", "text": "Done."}]},
                {"type": "function_call", "call_id": "c1", "name": "copy_file", "arguments": "{}"}
            ]
        }"#;

        let parsed: ResponsesResponse = serde_json::from_str(raw).unwrap();
        let response = parsed.into_model_response("gpt-4.1", vec!["generate_image".into()]);

        assert_eq!(response.content, "Done.");
        assert_eq!(response.pending_tool_calls.len(), 1);
        assert_eq!(response.dropped_tools, ["generate_image"]);
    }

    #[test]
    fn malformed_arguments_fall_back_to_raw_string() {
        let value = parse_arguments("not json");
        assert_eq!(value, serde_json::Value::String("not json".into()));
    }
}
