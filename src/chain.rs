//! Retrieval-augmented generation chain.
//!
//! # Pipeline
//!
//! ```text
//! question + history
//!   → rewrite      (standalone question; skipped for empty history)
//!   → retrieve     (embed standalone question, index.search(k))
//!   → assemble     (segment texts joined by a blank line, closest first)
//!   → prompt       (PromptTemplate with {context} {question} {history})
//!   → generate     (complete, or stream fragments)
//! ```
//!
//! A [`RagChain`] holds no per-conversation state: history goes in as an
//! argument and the extended history comes back in the [`Answer`]. Use
//! [`crate::session::ChatSession`] to carry history across questions.
//!
//! The retrieval step searches with the standalone question, while the
//! answer prompt receives the question exactly as the user asked it
//! together with the history.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, info};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::history::ConversationHistory;
use crate::index::Index;
use crate::llm::{ChatMessage, ChatModel, FragmentStream};
use crate::models::SearchHit;
use crate::prompt::{self, PromptTemplate};

const DEFAULT_K: usize = 6;

/// Result of one question.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// The question used for retrieval after rewriting.
    pub standalone_question: String,
    /// Retrieved segments, closest first.
    pub hits: Vec<SearchHit>,
    /// Input history with the user question and this answer appended.
    pub history: ConversationHistory,
}

/// Turns a follow-up question into one that stands on its own.
pub struct QuestionRewriter {
    model: Arc<dyn ChatModel>,
    prompt: PromptTemplate,
}

impl QuestionRewriter {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            prompt: prompt::rewrite_prompt(),
        }
    }

    /// Rewrite `question` against `history`. Empty history returns the
    /// question unchanged without calling the model.
    pub async fn rewrite(&self, question: &str, history: &ConversationHistory) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }
        let messages = self.prompt.render("", question, history);
        let rewritten = self.model.complete(&messages).await?;
        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            return Ok(question.to_string());
        }
        debug!(original = question, standalone = rewritten, "rewrote question");
        Ok(rewritten.to_string())
    }
}

pub struct RagChain {
    embedder: Arc<dyn Embedder>,
    index: Arc<Index>,
    model: Arc<dyn ChatModel>,
    prompt: PromptTemplate,
    k: usize,
    rewriter: Option<QuestionRewriter>,
}

impl RagChain {
    /// Chain with the conversational prompt, `k = 6` and rewriting enabled.
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<Index>, model: Arc<dyn ChatModel>) -> Self {
        let rewriter = Some(QuestionRewriter::new(model.clone()));
        Self {
            embedder,
            index,
            model,
            prompt: prompt::conversational_qa_prompt(),
            k: DEFAULT_K,
            rewriter,
        }
    }

    /// Chain configured from `[retrieval]` and `[chat]`.
    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<Index>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self::new(embedder, index, model)
            .with_k(config.retrieval.k)
            .with_rewrite(config.chat.rewrite_history)
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_rewrite(mut self, enabled: bool) -> Self {
        self.rewriter = enabled.then(|| QuestionRewriter::new(self.model.clone()));
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Rewrite step. Returns `question` unchanged when rewriting is disabled.
    pub async fn standalone_question(
        &self,
        question: &str,
        history: &ConversationHistory,
    ) -> Result<String> {
        match &self.rewriter {
            Some(rewriter) => rewriter.rewrite(question, history).await,
            None => Ok(question.to_string()),
        }
    }

    /// Retrieval step: the `k` segments closest to `query`.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.embed_query(query).await?;
        let hits = self.index.search(&vector, self.k)?;
        info!(k = self.k, hits = hits.len(), "retrieved context");
        Ok(hits)
    }

    /// Context assembly and prompt rendering.
    pub fn build_messages(
        &self,
        question: &str,
        hits: &[SearchHit],
        history: &ConversationHistory,
    ) -> Vec<ChatMessage> {
        let context = assemble_context(hits);
        self.prompt.render(&context, question, history)
    }

    /// Answer `question` in one call.
    pub async fn invoke(&self, question: &str, history: &ConversationHistory) -> Result<Answer> {
        let standalone_question = self.standalone_question(question, history).await?;
        let hits = self.retrieve(&standalone_question).await?;
        self.generate(question, standalone_question, hits, history)
            .await
    }

    /// Generate a complete answer over already retrieved `hits`.
    pub async fn generate(
        &self,
        question: &str,
        standalone_question: String,
        hits: Vec<SearchHit>,
        history: &ConversationHistory,
    ) -> Result<Answer> {
        let messages = self.build_messages(question, &hits, history);
        let text = self.model.complete(&messages).await?;
        debug!(chars = text.len(), "generated answer");
        Ok(Answer {
            history: history.with_exchange(question, &text),
            text,
            standalone_question,
            hits,
        })
    }

    /// Answer `question` as a stream of fragments.
    ///
    /// Rewriting and retrieval complete before this returns; only
    /// generation is streamed.
    pub async fn stream(
        &self,
        question: &str,
        history: &ConversationHistory,
    ) -> Result<AnswerStream> {
        let standalone_question = self.standalone_question(question, history).await?;
        let hits = self.retrieve(&standalone_question).await?;
        self.generate_stream(question, standalone_question, hits, history)
            .await
    }

    /// Start streaming generation over already retrieved `hits`.
    pub async fn generate_stream(
        &self,
        question: &str,
        standalone_question: String,
        hits: Vec<SearchHit>,
        history: &ConversationHistory,
    ) -> Result<AnswerStream> {
        let messages = self.build_messages(question, &hits, history);
        let fragments = self.model.stream(&messages).await?;
        Ok(AnswerStream {
            fragments,
            text: String::new(),
            question: question.to_string(),
            standalone_question,
            hits,
            history: history.clone(),
            state: StreamState::Open,
        })
    }
}

/// Join segment texts with a blank line, in the given order.
pub fn assemble_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|h| h.segment.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Done,
    Failed,
}

/// Streaming answer.
///
/// Yields fragments in production order and accumulates them. After the
/// first error the stream ends; [`AnswerStream::collect`] then fails with
/// [`RagError::StreamAborted`]. Dropping the stream cancels generation.
pub struct AnswerStream {
    fragments: FragmentStream,
    text: String,
    question: String,
    standalone_question: String,
    hits: Vec<SearchHit>,
    history: ConversationHistory,
    state: StreamState,
}

impl AnswerStream {
    pub fn hits(&self) -> &[SearchHit] {
        &self.hits
    }

    pub fn standalone_question(&self) -> &str {
        &self.standalone_question
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Drain the remaining fragments and return the complete [`Answer`].
    pub async fn collect(mut self) -> Result<Answer> {
        if self.state == StreamState::Failed {
            return Err(RagError::StreamAborted);
        }
        while let Some(fragment) = self.next().await {
            fragment?;
        }
        Ok(Answer {
            history: self.history.with_exchange(&self.question, &self.text),
            text: self.text,
            standalone_question: self.standalone_question,
            hits: self.hits,
        })
    }
}

impl Stream for AnswerStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state != StreamState::Open {
            return Poll::Ready(None);
        }
        match this.fragments.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(fragment))) => {
                this.text.push_str(&fragment);
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.state = StreamState::Failed;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.state = StreamState::Done;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
