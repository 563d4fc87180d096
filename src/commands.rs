//! Command runners behind the `rag` binary.
//!
//! Each `run_*` function loads what it needs from the [`Config`], performs
//! one command and prints human-readable output on stdout. Progress and
//! diagnostics go through `tracing` to stderr.

use anyhow::{Context, Result};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::chain::{Answer, RagChain};
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::history::ConversationHistory;
use crate::index::{DescriptorPolicy, Index};
use crate::llm::create_chat_model;
use crate::pipeline;
use crate::prompt;
use crate::session::ChatSession;

const EXCERPT_CHARS: usize = 200;

fn descriptor_policy(allow_mismatch: bool) -> DescriptorPolicy {
    if allow_mismatch {
        DescriptorPolicy::AllowMismatch
    } else {
        DescriptorPolicy::Require
    }
}

async fn open_index(
    config: &Config,
    embedder: &dyn Embedder,
    allow_mismatch: bool,
) -> Result<Index> {
    Index::load(
        &config.index.path,
        embedder.descriptor(),
        descriptor_policy(allow_mismatch),
    )
    .await
    .with_context(|| format!("Failed to open index {}", config.index.path.display()))
}

async fn build_chain(config: &Config, allow_mismatch: bool) -> Result<RagChain> {
    let embedder = create_embedder(&config.embedding)?;
    let index = open_index(config, embedder.as_ref(), allow_mismatch).await?;
    let model = create_chat_model(&config.llm)?;
    Ok(RagChain::from_config(config, embedder, Arc::new(index), model))
}

/// `rag index <paths…>`: build and save a fresh index.
pub async fn run_index(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let stats = pipeline::build_index(config, paths, embedder.as_ref(), &config.index.path)
        .await
        .context("Index build failed")?;

    println!(
        "Indexed {} documents ({} pages, {} segments) into {}",
        stats.documents,
        stats.pages,
        stats.segments,
        config.index.path.display()
    );
    Ok(())
}

/// `rag search <query>`: print the nearest segments.
pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    allow_mismatch: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let embedder = create_embedder(&config.embedding)?;
    let index = open_index(config, embedder.as_ref(), allow_mismatch).await?;
    let vector = embedder.embed_query(query).await?;
    let hits = index.search(&vector, k.unwrap_or(config.retrieval.k))?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} (page {})",
            i + 1,
            hit.distance,
            hit.segment.source,
            hit.segment.page
        );
        println!("    excerpt: \"{}\"", excerpt(&hit.segment.text));
        println!("    id: {}", hit.id);
        println!();
    }
    Ok(())
}

/// `rag ask <question>`: answer one question with the single-message QA
/// prompt, streaming by default.
pub async fn run_ask(
    config: &Config,
    question: &str,
    stream: bool,
    allow_mismatch: bool,
) -> Result<()> {
    let chain = build_chain(config, allow_mismatch)
        .await?
        .with_prompt(prompt::rag_prompt());
    let history = ConversationHistory::new();

    let answer = if stream {
        let mut answer_stream = chain.stream(question, &history).await?;
        let mut stdout = std::io::stdout();
        while let Some(fragment) = answer_stream.next().await {
            write!(stdout, "{}", fragment?)?;
            stdout.flush()?;
        }
        println!();
        answer_stream.collect().await?
    } else {
        let answer = chain.invoke(question, &history).await?;
        println!("{}", answer.text);
        answer
    };
    print_sources(&answer);
    Ok(())
}

/// `rag chat`: read questions from stdin until EOF or `exit`.
pub async fn run_chat(config: &Config, allow_mismatch: bool) -> Result<()> {
    let chain = Arc::new(build_chain(config, allow_mismatch).await?);
    let mut session = ChatSession::new(chain);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        session.begin_turn();
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        let result = session
            .ask_streaming(question, |fragment| {
                print!("{}", fragment);
                if let Err(e) = std::io::stdout().flush() {
                    warn!(error = %e, "failed to flush stdout");
                }
            })
            .await;
        println!();
        if let Err(e) = result {
            eprintln!("Error: {}", e);
        }
    }
    Ok(())
}

/// `rag info`: describe the saved index.
pub async fn run_info(config: &Config) -> Result<()> {
    let descriptor = crate::embedding::EmbedderDescriptor::new(
        config.embedding.model.clone(),
        config.embedding.dims,
    );
    let index = Index::load(
        &config.index.path,
        &descriptor,
        DescriptorPolicy::AllowMismatch,
    )
    .await
    .with_context(|| format!("Failed to open index {}", config.index.path.display()))?;

    let size = std::fs::metadata(&config.index.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let mut sources: Vec<&str> = index
        .entries()
        .iter()
        .map(|e| e.segment.source.as_str())
        .collect();
    sources.sort_unstable();
    sources.dedup();

    println!("RAG Harness — Index Info");
    println!("========================");
    println!();
    println!("  Index:       {}", config.index.path.display());
    println!("  Size:        {}", format_bytes(size));
    println!("  Model:       {}", index.descriptor().model);
    println!("  Dimensions:  {}", index.descriptor().dims);
    println!("  Metric:      {}", index.metric().as_str());
    println!("  Segments:    {}", index.len());
    println!("  Sources:     {}", sources.len());
    if *index.descriptor() != descriptor {
        println!();
        println!(
            "  Warning: configured embedder is {} ({} dims); queries will be rejected.",
            descriptor.model, descriptor.dims
        );
    }
    println!();
    Ok(())
}

fn print_sources(answer: &Answer) {
    if answer.hits.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for hit in &answer.hits {
        println!(
            "  - {} (page {}, segment {})",
            hit.segment.source, hit.segment.page, hit.segment.chunk_index
        );
    }
}

fn excerpt(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
