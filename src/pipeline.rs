//! Index build pipeline: load → chunk → embed → build → save.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::{embed_all, Embedder};
use crate::error::Result;
use crate::index::{Index, Metric};
use crate::loader;
use crate::models::Document;

/// Counts reported after a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildStats {
    pub documents: usize,
    pub pages: usize,
    pub segments: usize,
}

/// Options for [`build_index_from_documents`].
pub struct BuildOptions<'a> {
    pub chunker: &'a Chunker,
    pub metric: Metric,
    pub batch_size: usize,
    pub concurrency: usize,
}

/// Chunk and embed already loaded documents into a fresh [`Index`].
pub async fn build_index_from_documents(
    documents: &[Document],
    embedder: &dyn Embedder,
    options: &BuildOptions<'_>,
) -> Result<(Index, BuildStats)> {
    let segments = options.chunker.split_documents(documents);
    let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
    let vectors = embed_all(embedder, &texts, options.batch_size, options.concurrency).await?;

    let stats = BuildStats {
        documents: documents.len(),
        pages: documents.iter().map(|d| d.pages.len()).sum(),
        segments: segments.len(),
    };
    let index = Index::build(
        embedder.descriptor().clone(),
        options.metric,
        vectors.into_iter().zip(segments),
    )?;
    Ok((index, stats))
}

/// Load `paths`, build an index with the configured chunker and metric, and
/// save it to `index_path`.
pub async fn build_index(
    config: &Config,
    paths: &[PathBuf],
    embedder: &dyn Embedder,
    index_path: &Path,
) -> Result<BuildStats> {
    let documents = loader::load_documents(paths, &config.loader)?;
    let chunker = Chunker::from_config(&config.chunking)?;
    let options = BuildOptions {
        chunker: &chunker,
        metric: config.index.metric,
        batch_size: config.embedding.batch_size,
        concurrency: config.embedding.concurrency,
    };
    let (index, stats) = build_index_from_documents(&documents, embedder, &options).await?;
    index.save(index_path).await?;
    info!(
        documents = stats.documents,
        pages = stats.pages,
        segments = stats.segments,
        path = %index_path.display(),
        "index build complete"
    );
    Ok(stats)
}
