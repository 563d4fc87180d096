//! Exact nearest-neighbour vector index.
//!
//! An [`Index`] holds `(vector, segment)` entries in insertion order and
//! answers k-nearest-neighbour queries by brute-force distance over every
//! entry. Indexes persist to a single SQLite file (see [`store`]) together
//! with the [`EmbedderDescriptor`] and [`Metric`] they were built with.
//!
//! # Search semantics
//!
//! - Results are sorted by non-decreasing distance; equal distances keep
//!   insertion order, so `search(q, k)` is always a prefix of
//!   `search(q, k + m)`.
//! - `k = 0` returns an empty list; `k > 0` on an empty index fails with
//!   [`RagError::EmptyIndex`].
//! - The query must have the index dimension.
//!
//! # Descriptor check
//!
//! Vectors from different embedding models are not comparable. [`Index::load`]
//! therefore rejects a descriptor that differs from the stored one unless
//! the caller passes [`DescriptorPolicy::AllowMismatch`].

pub mod store;

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::embedding::EmbedderDescriptor;
use crate::error::{RagError, Result};
use crate::models::{SearchHit, Segment, Vector};

/// Distance function used for search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// L2 distance.
    #[default]
    Euclidean,
    /// Negated dot product, so larger products rank first.
    InnerProduct,
    /// `1 - cosine similarity`.
    Cosine,
}

impl Metric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            Metric::InnerProduct => -a.iter().zip(b.iter()).map(|(x, y)| x * y).sum::<f32>(),
            Metric::Cosine => 1.0 - cosine_similarity(a, b),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Euclidean => "euclidean",
            Metric::InnerProduct => "inner_product",
            Metric::Cosine => "cosine",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "euclidean" => Some(Metric::Euclidean),
            "inner_product" => Some(Metric::InnerProduct),
            "cosine" => Some(Metric::Cosine),
            _ => None,
        }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// How [`Index::load`] treats a descriptor that differs from the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescriptorPolicy {
    /// Fail with [`RagError::DescriptorMismatch`].
    #[default]
    Require,
    /// Load anyway and log a warning. Distances may be meaningless.
    AllowMismatch,
}

/// One stored vector with its segment and stable id.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: u64,
    pub vector: Vector,
    pub segment: Segment,
}

/// In-memory, insertion-ordered vector index.
#[derive(Debug, Clone)]
pub struct Index {
    descriptor: EmbedderDescriptor,
    metric: Metric,
    entries: Vec<IndexEntry>,
    next_id: u64,
}

impl Index {
    /// Create an empty index.
    pub fn new(descriptor: EmbedderDescriptor, metric: Metric) -> Self {
        Self {
            descriptor,
            metric,
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Build an index from scratch, assigning ids in input order.
    ///
    /// # Errors
    ///
    /// [`RagError::DimensionMismatch`] if any vector's length differs from
    /// `descriptor.dims`.
    pub fn build(
        descriptor: EmbedderDescriptor,
        metric: Metric,
        entries: impl IntoIterator<Item = (Vector, Segment)>,
    ) -> Result<Self> {
        let mut index = Self::new(descriptor, metric);
        for (vector, segment) in entries {
            index.insert(vector, segment)?;
        }
        debug!(entries = index.len(), metric = metric.as_str(), "built index");
        Ok(index)
    }

    /// Append one entry and return its id.
    pub fn insert(&mut self, vector: Vector, segment: Segment) -> Result<u64> {
        self.check_dims(&vector)?;
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(IndexEntry {
            id,
            vector,
            segment,
        });
        Ok(id)
    }

    pub fn descriptor(&self) -> &EmbedderDescriptor {
        &self.descriptor
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Return up to `k` entries closest to `query`, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if self.entries.is_empty() {
            return Err(RagError::EmptyIndex);
        }
        self.check_dims(query)?;

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, self.metric.distance(query, &e.vector)))
            .collect();
        // Stable sort: ties stay in insertion order.
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, distance)| {
                let entry = &self.entries[i];
                SearchHit {
                    id: entry.id,
                    segment: entry.segment.clone(),
                    distance,
                }
            })
            .collect())
    }

    /// Persist the index to `path`, replacing any previous content.
    pub async fn save(&self, path: &Path) -> Result<()> {
        store::save(self, path).await?;
        info!(path = %path.display(), entries = self.len(), "saved index");
        Ok(())
    }

    /// Load an index saved by [`Index::save`].
    ///
    /// `descriptor` must describe the embedder that will produce query
    /// vectors. With [`DescriptorPolicy::Require`] a different model or
    /// dimension fails with [`RagError::DescriptorMismatch`].
    pub async fn load(
        path: &Path,
        descriptor: &EmbedderDescriptor,
        policy: DescriptorPolicy,
    ) -> Result<Self> {
        let index = store::load(path).await?;
        if index.descriptor != *descriptor {
            let err = RagError::DescriptorMismatch {
                expected_model: descriptor.model.clone(),
                expected_dims: descriptor.dims,
                found_model: index.descriptor.model.clone(),
                found_dims: index.descriptor.dims,
            };
            match policy {
                DescriptorPolicy::Require => return Err(err),
                DescriptorPolicy::AllowMismatch => {
                    warn!(path = %path.display(), "{}; loading anyway", err);
                }
            }
        }
        info!(path = %path.display(), entries = index.len(), "loaded index");
        Ok(index)
    }

    fn check_dims(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.descriptor.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.descriptor.dims,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn from_parts(
        descriptor: EmbedderDescriptor,
        metric: Metric,
        entries: Vec<IndexEntry>,
    ) -> Self {
        let next_id = entries.iter().map(|e| e.id + 1).max().unwrap_or(0);
        Self {
            descriptor,
            metric,
            entries,
            next_id,
        }
    }
}
