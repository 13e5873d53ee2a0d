//! Anthropic wire response → canonical conversion.

use serde::Deserialize;
use serde_json::Value;

use crate::messages::{ModelResponse, ToolInvocation, confidence_for_finish};

#[derive(Debug, Deserialize)]
pub(crate) struct AnthropicResponse {
    #[serde(default)]
    pub content: Vec<ResponseBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum ResponseBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Unknown,
}

impl AnthropicResponse {
    pub(crate) fn into_model_response(self, model_id: &str, dropped_tools: Vec<String>) -> ModelResponse {
        let mut content = String::new();
        let mut reasoning = String::new();
        let mut pending = Vec::new();

        for block in self.content {
            match block {
                ResponseBlock::Text { text } => content.push_str(&text),
                ResponseBlock::Thinking { thinking } => reasoning.push_str(&thinking),
                ResponseBlock::ToolUse { id, name, input } => {
                    pending.push(ToolInvocation {
                        id,
                        name,
                        arguments: input,
                    });
                }
                ResponseBlock::Unknown => {}
            }
        }

        let truncated = self.stop_reason.as_deref() == Some("max_tokens");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_use_blocks_become_pending_calls() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "Let me look that up."},
                {"type": "tool_use", "id": "toolu_1", "name": "list_folder", "input": {"folder_id": "root"}}
            ],
            "stop_reason": "tool_use"
        }"#;

        let parsed: AnthropicResponse = serde_json::from_str(raw).unwrap();
        let response = parsed.into_model_response("claude-sonnet-4-20250514", Vec::new());

        assert_eq!(response.pending_tool_calls.len(), 1);
        assert_eq!(response.pending_tool_calls[0].arguments["folder_id"], "root");
        assert!(!response.is_final());
    }

    #[test]
    fn end_turn_answer_is_final_with_default_confidence() {
        let raw = r#"{"content": [{"type": "text", "text": "Paris."}], "stop_reason": "end_turn"}"#;
        let parsed: AnthropicResponse = serde_json::from_str(raw).unwrap();
        let response = parsed.into_model_response("claude-sonnet-4-20250514", Vec::new());

        assert_eq!(response.content, "Paris.");
        assert!((response.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn thinking_blocks_feed_reasoning() {
        let raw = r#"{
            "content": [
                {"type": "thinking", "thinking": "The user wants the capital."},
                {"type": "text", "text": "Paris."}
            ],
            "stop_reason": "end_turn"
        }"#;

        let parsed: AnthropicResponse = serde_json::from_str(raw).unwrap();
        let response = parsed.into_model_response("claude-sonnet-4-20250514", Vec::new());

        assert_eq!(response.reasoning, "The user wants the capital.");
    }
}
