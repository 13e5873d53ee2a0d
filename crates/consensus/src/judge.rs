//! Judge invocation support: prompt construction, the structured verdict
//! schema, and the parse ladder for judge output.

use llm::messages::ModelResponse;
use serde::Deserialize;
use serde_json::{Value, json};

pub(crate) const JUDGE_SCHEMA_NAME: &str = "consensus_verdict";

pub(crate) const JUDGE_SYSTEM: &str = "You are the judge in a multi-model consensus system. You receive \
     several model answers to the same user question and synthesize one \
     consensus answer. Weigh agreement, factual support and tool evidence. \
     The final_consensus field must be the user-facing answer in plain \
     prose or markdown. Never put raw JSON, schemas or field names into \
     final_consensus. List concrete disagreements between the models as \
     debate points.";

/// The structured output schema the judge must satisfy.
pub(crate) fn judge_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "final_consensus": {"type": "string", "minLength": 1},
            "confidence_score": {"type": "number", "minimum": 0, "maximum": 1},
            "reasoning": {"type": "string"},
            "debate_points": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["final_consensus", "confidence_score", "reasoning", "debate_points"],
        "additionalProperties": false
    })
}

/// A parsed judge verdict.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JudgeVerdict {
    pub final_consensus: String,
    pub confidence_score: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub debate_points: Vec<String>,
}

/// One contributor presented to the judge.
pub(crate) struct JudgeInput<'a> {
    pub model_id: &'a str,
    pub response: &'a ModelResponse,
    pub had_realtime_tools: bool,
}

/// Build the judge's user prompt from the question and the per-model
/// responses.
pub(crate) fn judge_prompt(question: &str, inputs: &[JudgeInput<'_>]) -> String {
    let mut prompt = format!("# User question\n\n{question}\n\n# Model answers\n");

    for input in inputs {
        prompt.push_str(&format!(
            "\n## {model}{realtime}\n\n{content}\n",
            model = input.model_id,
            realtime = if input.had_realtime_tools {
                " (had access to real-time tools)"
            } else {
                ""
            },
            content = input.response.content,
        ));

        if !input.response.reasoning.is_empty() {
            prompt.push_str(&format!("\nReasoning: {}\n", input.response.reasoning));
        }

        if !input.response.tool_evidence.is_empty() {
            let names: Vec<&str> = input
                .response
                .tool_evidence
                .iter()
                .map(|record| record.name.as_str())
                .collect();
            prompt.push_str(&format!("\nTools used: {}\n", names.join(", ")));
        }
    }

    prompt.push_str(
        "\nSynthesize the single best consensus answer, score your confidence \
         between 0 and 1, explain your reasoning, and list debate points \
         where the models disagreed.",
    );

    prompt
}

/// Parse judge output: first as the structured verdict, then as loose JSON
/// carrying at least `final_consensus`. Returns `None` when both rungs fail
/// and the caller must fall back to the best model.
pub(crate) fn parse_verdict(raw: &str) -> Option<JudgeVerdict> {
    let candidate = strip_fences(raw);

    if let Ok(verdict) = serde_json::from_str::<JudgeVerdict>(candidate)
        && !verdict.final_consensus.is_empty()
    {
        return Some(verdict);
    }

    let value: Value = serde_json::from_str(candidate).ok()?;
    let final_consensus = value.get("final_consensus")?.as_str()?.to_string();

    if final_consensus.is_empty() {
        return None;
    }

    Some(JudgeVerdict {
        final_consensus,
        confidence_score: value.get("confidence_score").and_then(Value::as_f64).unwrap_or(0.5),
        reasoning: value
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        debate_points: value
            .get("debate_points")
            .and_then(Value::as_array)
            .map(|points| {
                points
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

/// Strip a markdown code fence around a JSON payload, if present.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();

    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Token-level Jaccard overlap between two texts, in `[0, 1]`.
pub(crate) fn jaccard_overlap(a: &str, b: &str) -> f64 {
    let tokens = |text: &str| {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(str::to_lowercase)
            .collect::<std::collections::HashSet<String>>()
    };

    let a = tokens(a);
    let b = tokens(b);

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();

    intersection as f64 / union as f64
}
