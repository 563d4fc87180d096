//! Prompt templates for retrieval-augmented answering.
//!
//! A [`PromptTemplate`] renders to a list of [`ChatMessage`]s:
//!
//! ```text
//! [system]      optional, placeholders filled
//! [history...]  one message per turn, only if `history_messages` is set
//! [user]        human template, placeholders filled
//! ```
//!
//! Placeholders are `{context}`, `{question}` and `{history}`. They are
//! filled in a single pass, so text substituted for one placeholder is
//! never scanned for another. Unknown `{...}` sequences are left as is.

use crate::history::ConversationHistory;
use crate::llm::ChatMessage;

/// Instruction used to turn a follow-up question into a standalone one.
pub const REWRITE_SYSTEM_PROMPT: &str = "Given the chat history and a recent user question \
generate a new standalone question that can be understood without the chat history. \
Do NOT answer the question, just reformulate it if needed or otherwise return it as is.";

const QA_INSTRUCTIONS: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. \
If you don't know the answer, just say that you don't know. \
Use three sentences maximum and keep the answer concise.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    system: Option<String>,
    human: String,
    history_messages: bool,
}

impl PromptTemplate {
    pub fn new(human: impl Into<String>) -> Self {
        Self {
            system: None,
            human: human.into(),
            history_messages: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Insert history turns as messages between the system and human message.
    pub fn with_history_messages(mut self, enabled: bool) -> Self {
        self.history_messages = enabled;
        self
    }

    pub fn render(
        &self,
        context: &str,
        question: &str,
        history: &ConversationHistory,
    ) -> Vec<ChatMessage> {
        let rendered_history = history.render();
        let vars = [
            ("context", context),
            ("question", question),
            ("history", rendered_history.as_str()),
        ];

        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = &self.system {
            messages.push(ChatMessage::system(fill(system, &vars)));
        }
        if self.history_messages {
            messages.extend(history.turns().iter().map(ChatMessage::from));
        }
        messages.push(ChatMessage::user(fill(&self.human, &vars)));
        messages
    }
}

/// Single-message QA prompt.
pub fn rag_prompt() -> PromptTemplate {
    PromptTemplate::new(format!(
        "{} \nQuestion: {{question}} \nContext: {{context}} \nAnswer:",
        QA_INSTRUCTIONS
    ))
}

/// QA prompt with context in the system message and history as messages.
pub fn conversational_qa_prompt() -> PromptTemplate {
    PromptTemplate::new("{question}")
        .with_system(format!("{}\n\n{{context}}", QA_INSTRUCTIONS))
        .with_history_messages(true)
}

/// Prompt asking for a standalone rewrite of `{question}` given the history.
pub fn rewrite_prompt() -> PromptTemplate {
    PromptTemplate::new("{question}")
        .with_system(REWRITE_SYSTEM_PROMPT)
        .with_history_messages(true)
}

fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
