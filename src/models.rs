//! Core data models used throughout the RAG pipeline.
//!
//! These types represent the pages, segments, and search hits that flow
//! through the index-build and query-serve paths.

use serde::{Deserialize, Serialize};

/// Fixed-length embedding produced from a segment or a query.
pub type Vector = Vec<f32>;

/// One page of raw text extracted from a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Source identifier (the path the page was loaded from).
    pub source: String,
    /// Zero-based page number within the source.
    pub page: usize,
    pub text: String,
}

/// A loaded source file: its identifier and pages in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub pages: Vec<Page>,
}

/// A bounded slice of one page's text; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    /// Source identifier copied from the page.
    pub source: String,
    /// Page number copied from the page.
    pub page: usize,
    /// Position of this segment within its document, contiguous from 0.
    pub chunk_index: usize,
    /// Character offset of the segment start within its page.
    pub start_char: usize,
}

/// A segment returned by [`Index::search`](crate::index::Index::search).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Stable internal id of the matching index entry.
    pub id: u64,
    pub segment: Segment,
    /// Distance from the query under the index metric (lower is closer).
    pub distance: f32,
}
