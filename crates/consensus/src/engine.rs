//! The consensus engine.
//!
//! Fans a user turn out to the selected models in parallel, runs each
//! model's tool loop, then synthesizes a single consensus answer through the
//! judge model. Partial provider failure is tolerated; the generation fails
//! only when every model fails.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use indexmap::IndexMap;
use llm::{
    LlmError, ModelCatalog, ProviderSet,
    messages::{
        ChatMessage, GenerationConfig, GenerationRequest, ModelResponse, ResponseError, StructuredSchema, ToolChoice,
    },
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tools::{ToolRegistry, UserContext};

use crate::{
    context::ContextEnvelope,
    judge::{self, JUDGE_SCHEMA_NAME, JUDGE_SYSTEM, JudgeInput, JudgeVerdict},
    tool_loop::ToolLoop,
};

/// Consensus-level failures that terminate a generation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConsensusError {
    /// The request selected no models.
    #[error("no models selected")]
    NoModelsSelected,

    /// Every selected model failed to produce a usable response.
    #[error("all providers failed")]
    AllProvidersFailed,

    /// The generation was cancelled.
    #[error("generation cancelled")]
    Cancelled,
}

impl ConsensusError {
    /// Stable snake_case kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoModelsSelected => "argument_invalid",
            Self::AllProvidersFailed => "all_providers_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Engine progress points, surfaced as processing-status events upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Parallel model calls are starting.
    FanOut,
    /// The judge is synthesizing the consensus.
    Judge,
}

/// Callback invoked at engine phase boundaries.
pub type PhaseHook = Arc<dyn Fn(EnginePhase) + Send + Sync>;

/// The consensus attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// The user-facing answer. Never raw JSON.
    pub final_consensus: String,
    /// Synthesis confidence in `[0, 1]`.
    pub confidence: f64,
    /// The judge's (or fallback's) reasoning.
    pub reasoning: String,
    /// Disagreements between models, sorted.
    pub debate_points: Vec<String>,
    /// Per-model responses in selected order, failures included.
    pub per_model: IndexMap<String, ModelResponse>,
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Model used for synthesis.
    pub judge_model: String,
    /// Output token budget per model call.
    pub max_output_tokens: u32,
    /// Overall deadline for one consensus generation.
    pub deadline: Duration,
    /// Fraction of a model's context window the envelope may consume.
    pub window_fraction: f64,
}

impl EngineOptions {
    /// Derive options from configuration.
    pub fn from_config(config: &config::Config) -> Self {
        Self {
            judge_model: config.llm.judge_model.clone(),
            max_output_tokens: config.llm.max_output_tokens,
            deadline: Duration::from_secs(config.llm.generation_deadline_secs),
            window_fraction: config.context.window_fraction,
        }
    }
}

/// Orchestrates fan-out, tool loops and judge synthesis.
pub struct ConsensusEngine {
    providers: Arc<ProviderSet>,
    catalog: Arc<ModelCatalog>,
    registry: Arc<ToolRegistry>,
    tool_loop: ToolLoop,
    options: EngineOptions,
}

impl ConsensusEngine {
    /// Build the engine.
    pub fn new(
        providers: Arc<ProviderSet>,
        catalog: Arc<ModelCatalog>,
        registry: Arc<ToolRegistry>,
        tool_loop: ToolLoop,
        options: EngineOptions,
    ) -> Self {
        Self {
            providers,
            catalog,
            registry,
            tool_loop,
            options,
        }
    }

    /// The model catalog this engine serves.
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Produce a consensus for one user turn.
    ///
    /// Results are keyed in `selected_models` order, not completion order.
    pub async fn generate_consensus(
        &self,
        envelope: ContextEnvelope,
        selected_models: &[String],
        ctx: &UserContext,
        cancel: CancellationToken,
        on_phase: Option<PhaseHook>,
    ) -> Result<ConsensusResult, ConsensusError> {
        if selected_models.is_empty() {
            return Err(ConsensusError::NoModelsSelected);
        }

        let started = Instant::now();
        emit(&on_phase, EnginePhase::FanOut);

        let mut slots: Vec<Option<ModelResponse>> = Vec::new();
        slots.resize_with(selected_models.len(), || None);

        let fan_out_cancel = cancel.child_token();
        let mut tasks: JoinSet<(usize, ModelResponse)> = JoinSet::new();

        for (index, model_id) in selected_models.iter().enumerate() {
            let Some(descriptor) = self.catalog.get_active(model_id) else {
                slots[index] = Some(error_response(
                    model_id,
                    "unsupported_capability",
                    "model is not active in the catalog",
                ));
                continue;
            };

            let Some(provider) = self.providers.get(descriptor.provider) else {
                slots[index] = Some(error_response(
                    model_id,
                    "provider_unavailable",
                    "provider has no credentials in this process",
                ));
                continue;
            };

            let tools = self.registry.list_for(provider.as_ref());

            let mut fitted = envelope.clone();
            let dropped = fitted.fit_to_window(descriptor.context_window, self.options.window_fraction);
            if dropped > 0 {
                log::debug!("dropped {dropped} history entries to fit {model_id}'s context window");
            }

            let request = GenerationRequest {
                system: Some(fitted.system_prompt()),
                messages: fitted.to_messages(),
                tools,
                structured_output: None,
                config: GenerationConfig {
                    model_id: model_id.clone(),
                    max_output_tokens: self.options.max_output_tokens,
                    temperature: None,
                    tool_choice: ToolChoice::Auto,
                    deadline: self.options.deadline,
                },
            };

            let loop_driver = self.tool_loop.clone();
            let ctx = ctx.clone();
            let task_cancel = fan_out_cancel.child_token();

            tasks.spawn(async move {
                let response = loop_driver.run(provider, request, &ctx, &task_cancel).await;
                (index, response)
            });
        }

        let gather = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((index, response)) => slots[index] = Some(response),
                    Err(e) => log::error!("consensus fan-out task failed: {e}"),
                }
            }
        };

        if tokio::time::timeout(self.options.deadline, gather).await.is_err() {
            log::warn!("consensus deadline reached with adapters still running, cancelling them");
            fan_out_cancel.cancel();
            tasks.abort_all();

            while let Some(joined) = tasks.join_next().await {
                if let Ok((index, response)) = joined {
                    slots[index] = Some(response);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(ConsensusError::Cancelled);
        }

        let per_model: IndexMap<String, ModelResponse> = selected_models
            .iter()
            .zip(slots)
            .map(|(model_id, slot)| {
                let response =
                    slot.unwrap_or_else(|| ModelResponse::from_error(model_id, &LlmError::Timeout));
                (model_id.clone(), response)
            })
            .collect();

        let successes: Vec<(&String, &ModelResponse)> = per_model
            .iter()
            .filter(|(_, response)| response.error.is_none() && !response.content.is_empty())
            .collect();

        if successes.is_empty() {
            return Err(ConsensusError::AllProvidersFailed);
        }

        // Single-model short-circuit: no judge involved.
        if selected_models.len() == 1 {
            let (_, response) = successes[0];
            let content = response.content.clone();

            let reasoning = if response.reasoning.is_empty() {
                "single model response, no consensus debate".to_string()
            } else {
                response.reasoning.clone()
            };

            let confidence = response.confidence.min(0.9).clamp(0.0, 1.0);

            return Ok(ConsensusResult {
                final_consensus: guard_final_consensus(content, &reasoning, confidence),
                confidence,
                reasoning,
                debate_points: Vec::new(),
                per_model,
            });
        }

        emit(&on_phase, EnginePhase::Judge);

        let remaining = self.options.deadline.saturating_sub(started.elapsed());
        let verdict = if remaining.is_zero() {
            None
        } else {
            self.invoke_judge(&envelope.user, &per_model, remaining).await
        };

        let single_source = successes.len() == 1;
        let mut result = match verdict {
            Some(verdict) => self.result_from_verdict(verdict, per_model),
            None => self.fallback_result(per_model),
        };

        if single_source {
            result
                .reasoning
                .push_str(" Only one model response contributed to this consensus.");
        }

        result.debate_points.sort();
        result.confidence = result.confidence.clamp(0.0, 1.0);

        Ok(result)
    }

    async fn invoke_judge(
        &self,
        question: &str,
        per_model: &IndexMap<String, ModelResponse>,
        deadline: Duration,
    ) -> Option<JudgeVerdict> {
        let descriptor = self.catalog.get_active(&self.options.judge_model);

        let Some(descriptor) = descriptor else {
            log::warn!(
                "judge model '{}' is not active, falling back to best model",
                self.options.judge_model
            );
            return None;
        };

        let provider = self.providers.get(descriptor.provider)?;

        let inputs: Vec<JudgeInput<'_>> = per_model
            .iter()
            .filter(|(_, response)| response.error.is_none() && !response.content.is_empty())
            .map(|(model_id, response)| JudgeInput {
                model_id,
                response,
                had_realtime_tools: self
                    .catalog
                    .get(model_id)
                    .is_some_and(|entry| entry.capabilities.realtime_search),
            })
            .collect();

        let request = GenerationRequest {
            system: Some(JUDGE_SYSTEM.to_string()),
            messages: vec![ChatMessage::user(judge::judge_prompt(question, &inputs))],
            tools: Vec::new(),
            structured_output: Some(StructuredSchema {
                name: JUDGE_SCHEMA_NAME.to_string(),
                schema: judge::judge_schema(),
            }),
            config: GenerationConfig {
                model_id: self.options.judge_model.clone(),
                max_output_tokens: self.options.max_output_tokens,
                temperature: None,
                tool_choice: ToolChoice::None,
                deadline,
            },
        };

        match provider.generate(request).await {
            Ok(response) => {
                let verdict = judge::parse_verdict(&response.content);
                if verdict.is_none() {
                    log::warn!("judge output unparseable, falling back to best model");
                }
                verdict
            }
            Err(error) => {
                log::warn!("judge call failed ({error}), falling back to best model");
                None
            }
        }
    }

    fn result_from_verdict(&self, verdict: JudgeVerdict, per_model: IndexMap<String, ModelResponse>) -> ConsensusResult {
        let confidence = verdict.confidence_score.clamp(0.0, 1.0);

        ConsensusResult {
            final_consensus: guard_final_consensus(verdict.final_consensus, &verdict.reasoning, confidence),
            confidence,
            reasoning: verdict.reasoning,
            debate_points: verdict.debate_points,
            per_model,
        }
    }

    /// Ladder step (c): synthesize from the highest-confidence model.
    fn fallback_result(&self, per_model: IndexMap<String, ModelResponse>) -> ConsensusResult {
        let best = per_model
            .iter()
            .filter(|(_, response)| response.error.is_none() && !response.content.is_empty())
            .max_by(|a, b| a.1.confidence.total_cmp(&b.1.confidence));

        let Some((best_model, best_response)) = best else {
            // Callers only reach this with at least one success.
            return ConsensusResult {
                final_consensus: "No model produced a usable answer.".to_string(),
                confidence: 0.0,
                reasoning: "judge output unparseable; fell back to best model".to_string(),
                debate_points: Vec::new(),
                per_model,
            };
        };

        let debate_points: Vec<String> = per_model
            .iter()
            .filter(|(model_id, response)| {
                *model_id != best_model
                    && response.error.is_none()
                    && !response.content.is_empty()
                    && judge::jaccard_overlap(&response.content, &best_response.content) < 0.5
            })
            .map(|(model_id, _)| format!("{model_id} materially diverged from the selected answer"))
            .collect();

        let final_consensus = format!(
            "Synthesized from the strongest of {count} model answers ({best_model}):\n\n{content}",
            count = per_model.len(),
            content = best_response.content
        );

        let reasoning = "judge output unparseable; fell back to best model".to_string();

        ConsensusResult {
            final_consensus: guard_final_consensus(final_consensus, &reasoning, 0.5),
            confidence: 0.5,
            reasoning,
            debate_points,
            per_model,
        }
    }
}

fn emit(hook: &Option<PhaseHook>, phase: EnginePhase) {
    if let Some(hook) = hook {
        hook(phase);
    }
}

fn error_response(model_id: &str, kind: &str, message: &str) -> ModelResponse {
    ModelResponse {
        model_id: model_id.to_string(),
        content: String::new(),
        confidence: 0.0,
        reasoning: String::new(),
        pending_tool_calls: Vec::new(),
        tool_evidence: Vec::new(),
        dropped_tools: Vec::new(),
        error: Some(ResponseError {
            kind: kind.to_string(),
            message: message.to_string(),
        }),
    }
}

/// Replace a final consensus that is empty or raw JSON with a deterministic
/// human summary (the no-JSON-leak invariant).
fn guard_final_consensus(final_consensus: String, reasoning: &str, confidence: f64) -> String {
    let trimmed = final_consensus.trim_start();

    if !trimmed.is_empty() && !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        return final_consensus;
    }

    log::warn!("final consensus was empty or raw JSON, substituting summary template");

    let mut summary = format!(
        "The models reached a consensus with {percent:.0}% confidence.",
        percent = confidence * 100.0
    );

    if !reasoning.trim().is_empty() {
        summary.push(' ');
        summary.push_str(reasoning.trim());
    }

    summary
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use async_trait::async_trait;
    use config::{Config, ProviderKind};
    use llm::{ChatProvider, LlmResult, messages::ToolDefinition};

    use super::*;
    use crate::context::ContextBuilder;

    struct FakeProvider {
        kind: ProviderKind,
        answer: Mutex<LlmResult<ModelResponse>>,
        judge_reply: Option<String>,
        answer_calls: AtomicU32,
        judge_calls: AtomicU32,
    }

    impl FakeProvider {
        fn answering(kind: ProviderKind, content: &str, confidence: f64) -> Self {
            Self {
                kind,
                answer: Mutex::new(Ok(answer(content, confidence))),
                judge_reply: None,
                answer_calls: AtomicU32::new(0),
                judge_calls: AtomicU32::new(0),
            }
        }

        fn failing(kind: ProviderKind, error: LlmError) -> Self {
            Self {
                kind,
                answer: Mutex::new(Err(error)),
                judge_reply: None,
                answer_calls: AtomicU32::new(0),
                judge_calls: AtomicU32::new(0),
            }
        }

        fn with_judge(mut self, reply: &str) -> Self {
            self.judge_reply = Some(reply.to_string());
            self
        }
    }

    fn answer(content: &str, confidence: f64) -> ModelResponse {
        ModelResponse {
            model_id: String::new(),
            content: content.to_string(),
            confidence,
            reasoning: String::new(),
            pending_tool_calls: Vec::new(),
            tool_evidence: Vec::new(),
            dropped_tools: Vec::new(),
            error: None,
        }
    }

    #[async_trait]
    impl ChatProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn can_represent(&self, _tool: &ToolDefinition) -> bool {
            true
        }

        async fn generate(&self, request: GenerationRequest) -> LlmResult<ModelResponse> {
            if request.structured_output.is_some() {
                self.judge_calls.fetch_add(1, Ordering::SeqCst);

                let reply = self.judge_reply.clone().unwrap_or_default();
                let mut response = answer(&reply, 0.9);
                response.model_id = request.config.model_id;
                return Ok(response);
            }

            self.answer_calls.fetch_add(1, Ordering::SeqCst);

            match &*self.answer.lock().unwrap() {
                Ok(response) => {
                    let mut response = response.clone();
                    response.model_id = request.config.model_id;
                    Ok(response)
                }
                Err(error) => Err(error.clone()),
            }
        }
    }

    fn active_catalog() -> Arc<ModelCatalog> {
        let mut config = Config::default();
        config.apply_env_from(|key| {
            matches!(key, "OPENAI_API_KEY" | "GROK_API_KEY").then(|| "sk-test".to_string())
        });
        Arc::new(ModelCatalog::for_config(&config.llm))
    }

    fn engine(providers: Vec<Arc<dyn ChatProvider>>) -> ConsensusEngine {
        let mut set = ProviderSet::empty();
        for provider in providers {
            set.insert(provider);
        }

        let registry = Arc::new(ToolRegistry::new());

        ConsensusEngine::new(
            Arc::new(set),
            active_catalog(),
            registry.clone(),
            ToolLoop::new(registry, 10, Duration::from_secs(5)),
            EngineOptions {
                judge_model: "gpt-4.1".to_string(),
                max_output_tokens: 512,
                deadline: Duration::from_secs(30),
                window_fraction: 0.6,
            },
        )
    }

    fn envelope(question: &str) -> ContextEnvelope {
        ContextBuilder::new(config::ContextConfig::default()).build(None, &[], question, &[], &[])
    }

    #[tokio::test]
    async fn single_model_skips_the_judge() {
        let openai = Arc::new(FakeProvider::answering(ProviderKind::OpenAi, "Hello back", 1.0));
        let engine = engine(vec![openai.clone()]);

        let result = engine
            .generate_consensus(
                envelope("Hello"),
                &["gpt-4.1-mini".to_string()],
                &UserContext::new(1),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.final_consensus, "Hello back");
        assert!(result.confidence <= 0.9);
        assert!(result.debate_points.is_empty());
        assert_eq!(result.per_model.len(), 1);
        assert!(result.per_model.contains_key("gpt-4.1-mini"));
        assert_eq!(openai.judge_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn two_models_reach_a_judged_consensus() {
        let judge_reply = r#"{
            "final_consensus": "The capital of France is Paris.",
            "confidence_score": 0.97,
            "reasoning": "Both models agree.",
            "debate_points": ["grok-3-latest mentioned Lyon as a distractor"]
        }"#;

        let openai =
            Arc::new(FakeProvider::answering(ProviderKind::OpenAi, "Paris is the capital.", 0.8).with_judge(judge_reply));
        let xai = Arc::new(FakeProvider::answering(ProviderKind::Xai, "Paris, of course.", 0.8));

        let phases: Arc<Mutex<Vec<EnginePhase>>> = Arc::default();
        let seen = phases.clone();

        let engine = engine(vec![openai.clone(), xai]);
        let result = engine
            .generate_consensus(
                envelope("What's the capital of France?"),
                &["gpt-4.1".to_string(), "grok-3-latest".to_string()],
                &UserContext::new(1),
                CancellationToken::new(),
                Some(Arc::new(move |phase| seen.lock().unwrap().push(phase))),
            )
            .await
            .unwrap();

        assert!(result.final_consensus.contains("Paris"));
        assert!((0.0..=1.0).contains(&result.confidence));

        let keys: Vec<&String> = result.per_model.keys().collect();
        assert_eq!(keys, ["gpt-4.1", "grok-3-latest"]);

        assert_eq!(openai.judge_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*phases.lock().unwrap(), [EnginePhase::FanOut, EnginePhase::Judge]);
    }

    #[tokio::test]
    async fn survives_partial_provider_failure() {
        let judge_reply = r#"{
            "final_consensus": "Paris.",
            "confidence_score": 0.8,
            "reasoning": "One source only.",
            "debate_points": []
        }"#;

        let openai =
            Arc::new(FakeProvider::answering(ProviderKind::OpenAi, "Paris.", 0.8).with_judge(judge_reply));
        let xai = Arc::new(FakeProvider::failing(
            ProviderKind::Xai,
            LlmError::ProviderUnavailable("upstream down".into()),
        ));

        let engine = engine(vec![openai, xai]);
        let result = engine
            .generate_consensus(
                envelope("capital?"),
                &["gpt-4.1".to_string(), "grok-3-latest".to_string()],
                &UserContext::new(1),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        assert!(result.final_consensus.contains("Paris"));
        assert!(result.reasoning.contains("Only one model response contributed"));

        let failed = &result.per_model["grok-3-latest"];
        assert_eq!(failed.error.as_ref().unwrap().kind, "provider_unavailable");
    }

    #[tokio::test]
    async fn all_failures_terminate_the_generation() {
        let openai = Arc::new(FakeProvider::failing(
            ProviderKind::OpenAi,
            LlmError::Unauthorized("bad key".into()),
        ));
        let xai = Arc::new(FakeProvider::failing(ProviderKind::Xai, LlmError::Timeout));

        let engine = engine(vec![openai, xai]);
        let error = engine
            .generate_consensus(
                envelope("anyone?"),
                &["gpt-4.1".to_string(), "grok-3-latest".to_string()],
                &UserContext::new(1),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(error, ConsensusError::AllProvidersFailed));
    }

    #[tokio::test]
    async fn unparseable_judge_output_falls_back_to_best_model() {
        let openai = Arc::new(
            FakeProvider::answering(ProviderKind::OpenAi, "The answer is Paris, the French capital.", 0.9)
                .with_judge("I refuse to answer in JSON."),
        );
        let xai = Arc::new(FakeProvider::answering(
            ProviderKind::Xai,
            "Berlin obviously. Germany's biggest city.",
            0.6,
        ));

        let engine = engine(vec![openai, xai]);
        let result = engine
            .generate_consensus(
                envelope("capital of France?"),
                &["gpt-4.1".to_string(), "grok-3-latest".to_string()],
                &UserContext::new(1),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        assert!(result.final_consensus.contains("Paris"));
        assert!((result.confidence - 0.5).abs() < f64::EPSILON);
        assert_eq!(result.reasoning, "judge output unparseable; fell back to best model");
        assert_eq!(result.debate_points.len(), 1);
        assert!(result.debate_points[0].contains("grok-3-latest"));
    }

    #[tokio::test]
    async fn json_leak_guard_replaces_raw_json_answers() {
        let judge_reply = r#"{
            "final_consensus": "{\"answer\": \"Paris\"}",
            "confidence_score": 0.9,
            "reasoning": "Models agree on Paris.",
            "debate_points": []
        }"#;

        let openai = Arc::new(FakeProvider::answering(ProviderKind::OpenAi, "Paris.", 0.8).with_judge(judge_reply));
        let xai = Arc::new(FakeProvider::answering(ProviderKind::Xai, "Paris.", 0.8));

        let engine = engine(vec![openai, xai]);
        let result = engine
            .generate_consensus(
                envelope("capital?"),
                &["gpt-4.1".to_string(), "grok-3-latest".to_string()],
                &UserContext::new(1),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        let first = result.final_consensus.trim_start().chars().next().unwrap();
        assert!(first != '{' && first != '[');
        assert!(result.final_consensus.contains("Models agree on Paris."));
    }

    #[tokio::test]
    async fn consensus_result_round_trips_through_json() {
        let mut per_model = IndexMap::new();
        per_model.insert("gpt-4.1".to_string(), answer("Paris", 0.8));

        let result = ConsensusResult {
            final_consensus: "Paris.".into(),
            confidence: 0.92,
            reasoning: "agreement".into(),
            debate_points: vec!["one model hedged".into()],
            per_model,
        };

        let json = serde_json::to_string(&result).unwrap();
        let back: ConsensusResult = serde_json::from_str(&json).unwrap();

        assert_eq!(back.final_consensus, result.final_consensus);
        assert_eq!(back.confidence, result.confidence);
        assert_eq!(back.debate_points, result.debate_points);
        assert_eq!(back.per_model.len(), 1);
        assert_eq!(back.per_model["gpt-4.1"].content, "Paris");
    }
}
