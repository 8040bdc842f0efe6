use serde::{Deserialize, Serialize};

/// Placeholder in `user_template` replaced by the rendered context.
pub const CONTEXT_PLACEHOLDER: &str = "{{context}}";

const DEFAULT_SYSTEM: &str = "\
You are an expert call center analyst with deep knowledge of customer service interactions.
You analyze call summaries to provide insights about customer satisfaction, agent performance, and service quality.

Instructions:
1. Answer questions based on the call summaries provided to you
2. Always cite specific calls and agent names when referencing data
3. Provide quantitative analysis when asked about metrics (e.g., average scores, resolution rates)
4. Highlight patterns and trends across multiple calls
5. Be concise but thorough in your responses
6. Use the metadata (agent scores, ratings, resolution status) to support your analysis

When answering:
- Reference specific call IDs and agent names
- Use exact metrics from the summaries
- Organize information clearly with bullet points or tables when appropriate";

const DEFAULT_GUARDRAIL: &str = "\
Only use information contained in the supplied call summaries. If they do not contain the answer, \
say so plainly. Never invent call IDs, agent names, customers or metrics.";

const DEFAULT_USER_TEMPLATE: &str = "Call summaries:\n\n{{context}}";

/// Instruction texts used to assemble chat prompts. Fields left out of a
/// `[prompts]` config section keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSet {
    pub system: String,
    /// Appended to the system prompt when non-empty.
    pub guardrail: Option<String>,
    /// Direct-mode user prompt. Must contain [`CONTEXT_PLACEHOLDER`].
    pub user_template: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM.to_string(),
            guardrail: Some(DEFAULT_GUARDRAIL.to_string()),
            user_template: DEFAULT_USER_TEMPLATE.to_string(),
        }
    }
}

impl PromptSet {
    /// System prompt with the guardrail appended.
    pub fn system_message(&self) -> String {
        match self.guardrail.as_deref().map(str::trim) {
            Some(guardrail) if !guardrail.is_empty() => format!("{}\n\n{}", self.system, guardrail),
            _ => self.system.clone(),
        }
    }

    /// `user_template` with the context substituted. A template without the
    /// placeholder gets the context appended.
    pub fn render_user(&self, context: &str) -> String {
        if self.user_template.contains(CONTEXT_PLACEHOLDER) {
            self.user_template.replace(CONTEXT_PLACEHOLDER, context)
        } else if self.user_template.trim().is_empty() {
            context.to_string()
        } else {
            format!("{}\n\n{}", self.user_template, context)
        }
    }
}
