//! Prompt assembly and chat-completion calls for both chat modes.
//!
//! Message layout, shared by RAG and direct mode:
//! 1. one system message (persona, grounding rules, guardrail)
//! 2. prior turns, oldest first, optionally limited to the most recent N
//! 3. one user message carrying the context block and the question

use std::sync::Arc;
use std::time::Instant;

use crate::chat::{ChatBackend, ChatMessage, ChatRequest, ChatStream};
use crate::config::ChatSettings;
use crate::error::RagError;
use crate::models::{ConversationTurn, RetrievedDocument, Role, SummaryRecord};
use crate::prompts::PromptSet;
use crate::retriever::Retriever;

/// Context block used when retrieval returns nothing.
pub const NO_RESULTS_MARKER: &str = "No relevant call summaries found.";

const RAG_INSTRUCTION: &str =
    "Please answer the question based on the retrieved call summaries above.";

pub struct Orchestrator {
    chat: Arc<dyn ChatBackend>,
    prompts: PromptSet,
    settings: ChatSettings,
}

impl Orchestrator {
    pub fn new(chat: Arc<dyn ChatBackend>, prompts: PromptSet, settings: ChatSettings) -> Self {
        Self {
            chat,
            prompts,
            settings,
        }
    }

    pub fn prompts(&self) -> &PromptSet {
        &self.prompts
    }

    // ========================================================================
    // Prompt assembly
    // ========================================================================

    /// One labelled section per document, in retrieval order.
    pub fn render_context(results: &[RetrievedDocument]) -> String {
        if results.is_empty() {
            return NO_RESULTS_MARKER.to_string();
        }

        let mut context = String::from("## Retrieved Call Summaries:\n\n");
        for (i, result) in results.iter().enumerate() {
            context.push_str(&format!("### Document {}\n", i + 1));
            context.push_str(&result.content);
            context.push_str("\n\n");
        }
        context
    }

    fn assemble(&self, history: &[ConversationTurn], final_user: String) -> Vec<ChatMessage> {
        let replay = match self.settings.history_turn_limit {
            Some(limit) => &history[history.len().saturating_sub(limit)..],
            None => history,
        };

        let mut messages = Vec::with_capacity(replay.len() + 2);
        messages.push(ChatMessage::system(self.prompts.system_message()));
        messages.extend(replay.iter().map(|turn| match turn.role {
            Role::User => ChatMessage::user(turn.content.clone()),
            Role::Assistant => ChatMessage::assistant(turn.content.clone()),
        }));
        messages.push(ChatMessage::user(final_user));
        messages
    }

    pub fn rag_messages(
        &self,
        query: &str,
        results: &[RetrievedDocument],
        history: &[ConversationTurn],
    ) -> Vec<ChatMessage> {
        let context = Self::render_context(results);
        let final_user = format!("{context}\n\nUser Question: {query}\n\n{RAG_INSTRUCTION}");
        self.assemble(history, final_user)
    }

    /// Direct mode: every record, as pretty JSON, in the user template.
    pub fn direct_messages(
        &self,
        query: &str,
        records: &[SummaryRecord],
        history: &[ConversationTurn],
    ) -> Result<Vec<ChatMessage>, RagError> {
        let context = serde_json::to_string_pretty(records)?;
        let final_user = format!("{}\n\nUser Question: {query}", self.prompts.render_user(&context));
        Ok(self.assemble(history, final_user))
    }

    pub fn request(&self, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }

    // ========================================================================
    // RAG mode
    // ========================================================================

    pub async fn respond(
        &self,
        retriever: &Retriever,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<String, RagError> {
        let started = Instant::now();
        let results = retriever.query(query).await?;
        let request = self.request(self.rag_messages(query, &results, history));

        let answer = self.chat.complete(&request).await?;
        tracing::info!(
            retrieved = results.len(),
            history = history.len(),
            answer_chars = answer.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "RAG answer generated"
        );
        Ok(answer)
    }

    pub async fn respond_stream(
        &self,
        retriever: &Retriever,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<ChatStream, RagError> {
        let results = retriever.query(query).await?;
        let request = self.request(self.rag_messages(query, &results, history));
        tracing::debug!(retrieved = results.len(), history = history.len(), "Streaming RAG answer");
        Ok(self.chat.stream(&request).await?)
    }

    // ========================================================================
    // Direct mode
    // ========================================================================

    pub async fn respond_direct(
        &self,
        records: &[SummaryRecord],
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<String, RagError> {
        let started = Instant::now();
        let request = self.request(self.direct_messages(query, records, history)?);

        let answer = self.chat.complete(&request).await?;
        tracing::info!(
            records = records.len(),
            history = history.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Direct answer generated"
        );
        Ok(answer)
    }

    pub async fn respond_direct_stream(
        &self,
        records: &[SummaryRecord],
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<ChatStream, RagError> {
        let request = self.request(self.direct_messages(query, records, history)?);
        Ok(self.chat.stream(&request).await?)
    }
}
