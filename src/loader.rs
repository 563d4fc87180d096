//! Document loading: PDF and plain-text sources into [`Page`]s.
//!
//! PDF parsing is delegated to `pdf-extract`; this module only maps its
//! per-page output onto [`Page`] values with source metadata, and walks
//! directories to find loadable files.
//!
//! | Extension | Pages produced |
//! |-----------|----------------|
//! | `.pdf` | one per PDF page, numbered from 0 |
//! | `.txt`, `.md` | a single page 0 |
//!
//! Any other extension is rejected with [`RagError::Load`].

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::LoaderConfig;
use crate::error::{RagError, Result};
use crate::models::{Document, Page};

/// Kind of source, decided from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Text,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(SourceKind::Pdf),
            "txt" | "md" => Some(SourceKind::Text),
            _ => None,
        }
    }
}

/// Load a single file into a [`Document`].
pub fn load_document(path: &Path) -> Result<Document> {
    let kind = SourceKind::from_path(path)
        .ok_or_else(|| RagError::load(path, "unsupported file type"))?;
    let bytes = std::fs::read(path).map_err(|e| RagError::load(path, e))?;
    let source = path.to_string_lossy().to_string();
    let doc = load_bytes(&source, &bytes, kind)?;
    debug!(source = %doc.id, pages = doc.pages.len(), "loaded document");
    Ok(doc)
}

/// Load an in-memory byte buffer identified by `source`.
pub fn load_bytes(source: &str, bytes: &[u8], kind: SourceKind) -> Result<Document> {
    let pages = match kind {
        SourceKind::Pdf => pdf_pages(source, bytes)?,
        SourceKind::Text => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| RagError::load(source, format!("invalid UTF-8: {}", e)))?;
            vec![Page {
                source: source.to_string(),
                page: 0,
                text: text.to_string(),
            }]
        }
    };
    Ok(Document {
        id: source.to_string(),
        pages,
    })
}

fn pdf_pages(source: &str, bytes: &[u8]) -> Result<Vec<Page>> {
    let texts = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| RagError::load(source, format!("PDF extraction failed: {}", e)))?;
    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(page, text)| Page {
            source: source.to_string(),
            page,
            text,
        })
        .collect())
}

/// Load every path in argument order. Directories are walked recursively
/// and filtered by the configured globs; their files load in sorted order.
pub fn load_documents(paths: &[PathBuf], config: &LoaderConfig) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for path in paths {
        if path.is_dir() {
            for file in scan_directory(path, config)? {
                documents.push(load_document(&file)?);
            }
        } else {
            documents.push(load_document(path)?);
        }
    }
    let pages: usize = documents.iter().map(|d| d.pages.len()).sum();
    info!(documents = documents.len(), pages, "loaded sources");
    Ok(documents)
}

/// List loadable files under `root`, sorted by path.
pub fn scan_directory(root: &Path, config: &LoaderConfig) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&config.include_globs).map_err(|e| RagError::load(root, e))?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/target/**".to_string()];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes).map_err(|e| RagError::load(root, e))?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| RagError::load(root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        if SourceKind::from_path(path).is_none() {
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> std::result::Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}
