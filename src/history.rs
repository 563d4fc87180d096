//! Conversation history: an append-only list of user/assistant turns.

use serde::{Deserialize, Serialize};

/// Speaker of a [`ChatTurn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Ordered turns of one conversation. Turns are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<ChatTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
    }

    /// Return a copy with `question` and `answer` appended, user turn first.
    pub fn with_exchange(&self, question: &str, answer: &str) -> Self {
        let mut next = self.clone();
        next.push(ChatTurn::user(question));
        next.push(ChatTurn::assistant(answer));
        next
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Render as `"Human: …\nAssistant: …"` lines for string-style prompts.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| match t.role {
                Role::User => format!("Human: {}", t.text),
                Role::Assistant => format!("Assistant: {}", t.text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
