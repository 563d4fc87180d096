//! # RAG Harness
//!
//! Retrieval-augmented question answering over local documents.
//!
//! Documents are split into overlapping segments, embedded by an external
//! service and stored in an exact nearest-neighbour index persisted as a
//! single SQLite file. Questions are answered by retrieving the closest
//! segments and handing them to a language model as context, optionally
//! rewriting follow-up questions against the conversation history first.
//!
//! ## Architecture
//!
//! ```text
//!  build path
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌──────────┐
//! │  Loader  │──▶│ Chunker │──▶│ Embedder │──▶│  Index   │──▶ SQLite file
//! │ PDF/text │   │         │   │  (HTTP)  │   │ (exact)  │
//! └──────────┘   └─────────┘   └──────────┘   └────┬─────┘
//!                                                  │
//!  query path                                      ▼
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │ Session  │──▶│ Rewriter │──▶│ Retrieve │──▶│ ChatModel│──▶ answer /
//! │ history  │   │  (LLM)   │   │  top-k   │   │  (HTTP)  │    fragments
//! └──────────┘   └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Pages, segments and search hits |
//! | [`loader`] | PDF and text loading, directory scanning |
//! | [`chunk`] | Overlapping, separator-aware text splitting |
//! | [`embedding`] | Embedding provider abstraction and batching |
//! | [`index`] | Exact k-NN index and its SQLite persistence |
//! | [`llm`] | Chat model abstraction with SSE streaming |
//! | [`prompt`] | Prompt templates |
//! | [`history`] | Conversation history |
//! | [`chain`] | Rewrite → retrieve → generate composition |
//! | [`session`] | Stateful chat session |
//! | [`pipeline`] | Index build pipeline |
//! | [`commands`] | Runners behind the `rag` binary |
//! | [`error`] | Library error type |

pub mod chain;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod error;
mod http;
pub mod history;
pub mod index;
pub mod llm;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod session;

pub use error::{RagError, Result};
