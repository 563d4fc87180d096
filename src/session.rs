//! Interactive chat session.
//!
//! A [`ChatSession`] owns the conversation history and walks one question
//! at a time through the chain:
//!
//! ```text
//! Idle → AwaitingQuestion → Rewriting → Retrieving → Generating → Idle
//! ```
//!
//! The exchange is appended to the history only when generation finishes.
//! Any failure puts the session back in [`SessionState::Idle`] with the
//! history untouched and returns the error.

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::{Answer, RagChain};
use crate::error::Result;
use crate::history::ConversationHistory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingQuestion,
    Rewriting,
    Retrieving,
    Generating,
}

pub struct ChatSession {
    chain: Arc<RagChain>,
    history: ConversationHistory,
    state: SessionState,
    #[cfg(test)]
    trail: Vec<SessionState>,
}

impl ChatSession {
    pub fn new(chain: Arc<RagChain>) -> Self {
        Self {
            chain,
            history: ConversationHistory::new(),
            state: SessionState::Idle,
            #[cfg(test)]
            trail: Vec::new(),
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Mark the session as waiting for user input.
    pub fn begin_turn(&mut self) {
        self.state = SessionState::AwaitingQuestion;
    }

    /// Answer `question` in one call.
    pub async fn ask(&mut self, question: &str) -> Result<Answer> {
        let result = self.run(question, None).await;
        self.finish(result)
    }

    /// Answer `question`, passing each fragment to `sink` as it arrives.
    pub async fn ask_streaming<F>(&mut self, question: &str, mut sink: F) -> Result<Answer>
    where
        F: FnMut(&str) + Send,
    {
        let result = self.run(question, Some(&mut sink)).await;
        self.finish(result)
    }

    async fn run(
        &mut self,
        question: &str,
        sink: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> Result<Answer> {
        self.transition(SessionState::AwaitingQuestion);
        self.transition(SessionState::Rewriting);
        let standalone = self
            .chain
            .standalone_question(question, &self.history)
            .await?;

        self.transition(SessionState::Retrieving);
        let hits = self.chain.retrieve(&standalone).await?;

        self.transition(SessionState::Generating);
        let Some(sink) = sink else {
            return self
                .chain
                .generate(question, standalone, hits, &self.history)
                .await;
        };
        let mut stream = self
            .chain
            .generate_stream(question, standalone, hits, &self.history)
            .await?;
        while let Some(fragment) = stream.next().await {
            sink(&fragment?);
        }
        stream.collect().await
    }

    fn finish(&mut self, result: Result<Answer>) -> Result<Answer> {
        self.transition(SessionState::Idle);
        match result {
            Ok(answer) => {
                self.history = answer.history.clone();
                Ok(answer)
            }
            Err(e) => {
                warn!(error = %e, "question failed; history unchanged");
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
        #[cfg(test)]
        self.trail.push(next);
    }
}
