//! Overlapping fixed-size text chunker.
//!
//! Splits page text into [`Segment`]s of at most `chunk_size` characters,
//! where each segment after the first starts `chunk_overlap` characters
//! before the end of its predecessor. Segments never span pages.
//!
//! # Algorithm
//!
//! 1. Measure the page in characters (not bytes), so multi-byte text is
//!    never cut inside a code point.
//! 2. Open a window of `chunk_size` characters at the current start.
//! 3. If a separator is configured, cut just after its last occurrence
//!    inside the window, as long as the cut keeps more than
//!    `chunk_overlap` characters; otherwise cut at the window end.
//! 4. Start the next window `chunk_overlap` characters before the cut.
//! 5. The last window always ends at the end of the page.
//!
//! Dropping the first `chunk_overlap` characters of every segment but the
//! first and concatenating the rest reproduces the page text exactly.
//!
//! # Example
//!
//! ```rust
//! use rag_harness::chunk::Chunker;
//! use rag_harness::models::Page;
//!
//! let chunker = Chunker::new(1000, 150, Some("\n".to_string())).unwrap();
//! let page = Page { source: "notes.txt".into(), page: 0, text: "Hello world.".into() };
//! let segments = chunker.split_pages(&[page]);
//! assert_eq!(segments.len(), 1);
//! assert_eq!(segments[0].text, "Hello world.");
//! ```

use tracing::debug;

use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::models::{Document, Page, Segment};

/// Splits pages into overlapping segments.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separator: Option<String>,
}

impl Chunker {
    /// Create a chunker.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ChunkConfig`] when `chunk_size` is zero or not
    /// strictly greater than `chunk_overlap`.
    pub fn new(chunk_size: usize, chunk_overlap: usize, separator: Option<String>) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::ChunkConfig("chunk_size must be > 0".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::ChunkConfig(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        let separator = separator.filter(|s| !s.is_empty());
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separator,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(
            config.chunk_size,
            config.chunk_overlap,
            config.separator.clone(),
        )
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split pages into segments, numbering them contiguously from 0 in
    /// page order.
    pub fn split_pages(&self, pages: &[Page]) -> Vec<Segment> {
        let mut segments = Vec::new();
        for page in pages {
            for (start, text) in self.split_text(&page.text) {
                segments.push(Segment {
                    text,
                    source: page.source.clone(),
                    page: page.page,
                    chunk_index: segments.len(),
                    start_char: start,
                });
            }
        }
        segments
    }

    /// Split every document; chunk indices restart at 0 for each document.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Segment> {
        let mut all = Vec::new();
        for doc in documents {
            let segments = self.split_pages(&doc.pages);
            debug!(document = %doc.id, pages = doc.pages.len(), segments = segments.len(), "chunked document");
            all.extend(segments);
        }
        all
    }

    /// Split one text into `(start_char, segment_text)` pairs.
    ///
    /// Empty text yields no segments; text of at most `chunk_size`
    /// characters yields exactly one.
    pub fn split_text(&self, text: &str) -> Vec<(usize, String)> {
        // Byte offset of every char, plus the end of the string.
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = offsets.len() - 1;

        let mut out = Vec::new();
        if total == 0 {
            return out;
        }

        let mut start = 0;
        loop {
            let hard_end = (start + self.chunk_size).min(total);
            let end = if hard_end == total {
                total
            } else {
                self.cut_point(text, &offsets, start, hard_end)
            };
            out.push((start, text[offsets[start]..offsets[end]].to_string()));
            if end == total {
                break;
            }
            start = end - self.chunk_overlap;
        }
        out
    }

    /// Pick the end (exclusive, in chars) of the window `[start, hard_end)`.
    fn cut_point(&self, text: &str, offsets: &[usize], start: usize, hard_end: usize) -> usize {
        let Some(sep) = self.separator.as_deref() else {
            return hard_end;
        };
        let base = offsets[start];
        let window = &text[base..offsets[hard_end]];
        let Some(pos) = window.rfind(sep) else {
            return hard_end;
        };
        let cut_byte = base + pos + sep.len();
        match offsets.binary_search(&cut_byte) {
            Ok(cut) if cut > start + self.chunk_overlap => cut,
            _ => hard_end,
        }
    }
}
