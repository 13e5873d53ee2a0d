//! Context assembly.
//!
//! Builds the bounded envelope fed to provider adapters from conversation
//! history, attached files and the user's knowledge base. Building is pure:
//! the same inputs always produce the same envelope, so the policy is unit
//! testable without a database.

use std::sync::OnceLock;

use config::ContextConfig;
use llm::messages::{ChatMessage, Role};
use storage::{MessageRole, StoredFile, StoredMessage};
use tiktoken_rs::CoreBPE;

const KB_TRUNCATION_MARKER: &str = "… (additional files truncated)";

/// The bounded bundle of system prompt, history, attachments and
/// knowledge-base content delivered to a model.
#[derive(Debug, Clone)]
pub struct ContextEnvelope {
    /// Base system instruction.
    pub system: String,
    /// Trailing conversation history, chronological.
    pub history: Vec<ChatMessage>,
    /// The current user message.
    pub user: String,
    /// "Attached Files" section, when files were attached to this turn.
    pub attachments_summary: Option<String>,
    /// Knowledge-base section, when the user has eligible files.
    pub knowledge_base: Option<String>,
}

impl ContextEnvelope {
    /// The full system prompt: instruction plus file context sections.
    pub fn system_prompt(&self) -> String {
        let mut prompt = self.system.clone();

        if let Some(attachments) = &self.attachments_summary {
            prompt.push_str("\n\n");
            prompt.push_str(attachments);
        }

        if let Some(kb) = &self.knowledge_base {
            prompt.push_str("\n\n");
            prompt.push_str(kb);
        }

        prompt
    }

    /// The conversation for an adapter call: history plus the current turn.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = self.history.clone();
        messages.push(ChatMessage::user(self.user.clone()));
        messages
    }

    /// Fit the envelope into a model's token budget by dropping history
    /// oldest-first. Returns the number of dropped history entries.
    pub fn fit_to_window(&mut self, context_window: u32, window_fraction: f64) -> usize {
        let budget = (f64::from(context_window) * window_fraction) as usize;
        let mut dropped = 0;

        while self.estimated_tokens() > budget && !self.history.is_empty() {
            self.history.remove(0);
            dropped += 1;
        }

        dropped
    }

    /// Token estimate over everything the adapter will send.
    pub fn estimated_tokens(&self) -> usize {
        let mut total = estimate_tokens(&self.system_prompt());
        total += estimate_tokens(&self.user);

        for message in &self.history {
            total += estimate_tokens(&message.content);
        }

        total
    }
}

/// Estimate the token count of a text.
///
/// Uses the o200k byte-pair encoding; counts are approximate across
/// providers by design. Falls back to a four-chars-per-token heuristic if
/// the encoder cannot initialize.
pub fn estimate_tokens(text: &str) -> usize {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();

    let bpe = BPE.get_or_init(|| match tiktoken_rs::o200k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            log::warn!("token encoder unavailable, falling back to character estimate: {e}");
            None
        }
    });

    match bpe {
        Some(bpe) => bpe.encode_ordinary(text).len(),
        None => text.chars().count().div_ceil(4),
    }
}

/// Truncate to a character budget, appending an ellipsis when cut.
fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let mut truncated: String = text.chars().take(limit).collect();
    truncated.push('…');
    truncated
}

/// Context builder implementing the envelope assembly policy.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    /// A builder with the given budgets.
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Assemble the envelope for one user turn.
    ///
    /// `history` is the session's messages in chronological order;
    /// `kb_files` the user's files newest-first. Only processed files with
    /// extracted text contribute; attached ids are skipped in the
    /// knowledge-base pass.
    pub fn build(
        &self,
        user_name: Option<&str>,
        history: &[StoredMessage],
        current_message: &str,
        attached_files: &[StoredFile],
        kb_files: &[StoredFile],
    ) -> ContextEnvelope {
        let system = system_instruction(user_name);

        let start = history.len().saturating_sub(self.config.max_messages);
        let history: Vec<ChatMessage> = history[start..]
            .iter()
            .map(|message| ChatMessage {
                role: match message.role {
                    MessageRole::User => Role::User,
                    MessageRole::Assistant => Role::Assistant,
                    MessageRole::System => Role::System,
                },
                content: truncate_chars(&message.content, self.config.message_chars),
                tool_calls: Vec::new(),
                tool_call_id: None,
            })
            .collect();

        ContextEnvelope {
            system,
            history,
            user: current_message.to_string(),
            attachments_summary: self.attachments_section(attached_files),
            knowledge_base: self.knowledge_base_section(attached_files, kb_files),
        }
    }

    fn attachments_section(&self, attached: &[StoredFile]) -> Option<String> {
        let mut entries = Vec::new();

        for file in attached {
            if !file.context_eligible() {
                continue;
            }

            let Some(text) = file.extracted_text.as_deref() else {
                continue;
            };

            entries.push(format!(
                "## {name}\n{content}",
                name = file.filename,
                content = truncate_chars(text, self.config.file_chars)
            ));
        }

        if entries.is_empty() {
            return None;
        }

        Some(format!("# Attached Files\n\n{}", entries.join("\n\n")))
    }

    fn knowledge_base_section(&self, attached: &[StoredFile], kb_files: &[StoredFile]) -> Option<String> {
        let mut entries = Vec::new();
        let mut used = 0usize;
        let mut elided = false;

        for file in kb_files {
            if !file.context_eligible() {
                continue;
            }

            if attached.iter().any(|a| a.id == file.id) {
                continue;
            }

            let Some(text) = file.extracted_text.as_deref() else {
                continue;
            };

            let entry = format!(
                "## {name}\n{content}",
                name = file.filename,
                content = truncate_chars(text, self.config.file_chars)
            );

            if used + entry.chars().count() > self.config.max_kb_chars {
                elided = true;
                break;
            }

            used += entry.chars().count();
            entries.push(entry);
        }

        if entries.is_empty() {
            return None;
        }

        let mut section = format!("# Knowledge Base\n\n{}", entries.join("\n\n"));

        if elided {
            section.push_str("\n\n");
            section.push_str(KB_TRUNCATION_MARKER);
        }

        Some(section)
    }
}

fn system_instruction(user_name: Option<&str>) -> String {
    let mut instruction = String::from(
        "You are a careful assistant in a multi-model consensus chat. \
         Answer the user's question directly and note when you rely on \
         attached files or live information.",
    );

    if let Some(name) = user_name {
        instruction.push_str(&format!(" The user's name is {name}."));
    }

    instruction
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;

    use super::*;

    fn file(id: i64, name: &str, text: &str) -> StoredFile {
        StoredFile {
            id,
            user_id: 1,
            filename: name.to_string(),
            content_type: "text/plain".into(),
            processed: true,
            extracted_text: Some(text.to_string()),
            uploaded_at: Timestamp::UNIX_EPOCH,
        }
    }

    fn message(id: i64, role: MessageRole, content: &str) -> StoredMessage {
        StoredMessage {
            id,
            session_id: 1,
            role,
            content: content.to_string(),
            model_used: None,
            consensus_data: None,
            created_at: Timestamp::UNIX_EPOCH,
        }
    }

    fn builder() -> ContextBuilder {
        ContextBuilder::new(ContextConfig::default())
    }

    #[test]
    fn keeps_the_last_ten_messages_in_order() {
        let history: Vec<StoredMessage> = (0..15)
            .map(|n| message(n, MessageRole::User, &format!("message {n}")))
            .collect();

        let envelope = builder().build(None, &history, "now", &[], &[]);

        assert_eq!(envelope.history.len(), 10);
        assert_eq!(envelope.history[0].content, "message 5");
        assert_eq!(envelope.history[9].content, "message 14");
    }

    #[test]
    fn long_messages_are_truncated_with_ellipsis() {
        let history = [message(1, MessageRole::Assistant, &"x".repeat(800))];
        let envelope = builder().build(None, &history, "now", &[], &[]);

        assert_eq!(envelope.history[0].content.chars().count(), 501);
        assert!(envelope.history[0].content.ends_with('…'));
    }

    #[test]
    fn attachments_render_under_their_heading() {
        let attached = [file(1, "notes.txt", "important notes")];
        let envelope = builder().build(None, &[], "summarize", &attached, &[]);

        let section = envelope.attachments_summary.unwrap();
        assert!(section.starts_with("# Attached Files"));
        assert!(section.contains("## notes.txt"));
        assert!(section.contains("important notes"));
    }

    #[test]
    fn knowledge_base_skips_attached_ids_and_caps_per_file() {
        let attached = [file(1, "attached.txt", "attached")];
        let kb = [
            file(1, "attached.txt", "attached"),
            file(2, "big.txt", &"k".repeat(5_000)),
        ];

        let envelope = builder().build(None, &[], "q", &attached, &kb);
        let section = envelope.knowledge_base.unwrap();

        assert!(!section.contains("## attached.txt"));
        assert!(section.contains("## big.txt"));
        // Per-file cap holds.
        assert!(section.chars().count() < 3_200);
    }

    #[test]
    fn knowledge_base_stops_at_the_running_cap_with_marker() {
        let kb: Vec<StoredFile> = (0..10)
            .map(|n| file(n, &format!("f{n}.txt"), &"v".repeat(2_900)))
            .collect();

        let envelope = builder().build(None, &[], "q", &[], &kb);
        let section = envelope.knowledge_base.unwrap();

        assert!(section.chars().count() <= 15_000 + KB_TRUNCATION_MARKER.chars().count() + 32);
        assert!(section.ends_with(KB_TRUNCATION_MARKER));
    }

    #[test]
    fn unprocessed_files_contribute_nothing() {
        let mut raw = file(3, "raw.bin", "binary");
        raw.processed = false;

        let envelope = builder().build(None, &[], "q", &[raw.clone()], &[raw]);

        assert!(envelope.attachments_summary.is_none());
        assert!(envelope.knowledge_base.is_none());
    }

    #[test]
    fn fitting_drops_history_oldest_first() {
        let history: Vec<StoredMessage> = (0..10)
            .map(|n| message(n, MessageRole::User, &format!("padding padding padding {n}")))
            .collect();

        let mut envelope = builder().build(None, &history, "question", &[], &[]);
        let before = envelope.history.len();

        // A tiny window forces history drops.
        let dropped = envelope.fit_to_window(100, 0.6);

        assert!(dropped > 0);
        assert_eq!(envelope.history.len(), before - dropped);
        if let Some(first) = envelope.history.first() {
            // Oldest entries went first.
            assert!(first.content.ends_with(&format!("{dropped}")));
        }
    }

    #[test]
    fn building_is_reproducible() {
        let history = [message(1, MessageRole::User, "hello")];
        let kb = [file(2, "kb.txt", "knowledge")];

        let a = builder().build(Some("Ada"), &history, "question", &[], &kb);
        let b = builder().build(Some("Ada"), &history, "question", &[], &kb);

        assert_eq!(a.system_prompt(), b.system_prompt());
        assert_eq!(a.to_messages().len(), b.to_messages().len());
        assert_eq!(a.user, b.user);
    }
}
