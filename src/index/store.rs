//! SQLite persistence for [`Index`].
//!
//! An index is saved as a single SQLite file with two tables:
//!
//! ```text
//! index_meta (key TEXT PRIMARY KEY, value TEXT)
//!     format_version, model, dims, metric, count
//!
//! entries (position INTEGER PRIMARY KEY, id INTEGER, source TEXT,
//!          page INTEGER, chunk_index INTEGER, start_char INTEGER,
//!          text TEXT, embedding BLOB)
//! ```
//!
//! `embedding` holds little-endian `f32`s (see
//! [`vec_to_blob`](crate::embedding::vec_to_blob)), so a reloaded index
//! returns bit-identical distances. Saving runs in one transaction and
//! replaces whatever the file held before.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;

use super::{Index, IndexEntry, Metric};
use crate::embedding::{blob_to_vec, vec_to_blob, EmbedderDescriptor};
use crate::error::{RagError, Result};
use crate::models::Segment;

const FORMAT_VERSION: &str = "1";

async fn connect(path: &Path, create: bool) -> std::result::Result<SqlitePool, sqlx::Error> {
    let mut options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create);
    if create {
        // Rollback journal keeps the index a single self-contained file.
        options = options.journal_mode(SqliteJournalMode::Delete);
    }

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

pub(crate) async fn save(index: &Index, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| RagError::Storage(e.to_string()))?;
        }
    }

    let pool = connect(path, true).await?;
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            position INTEGER PRIMARY KEY,
            id INTEGER NOT NULL,
            source TEXT NOT NULL,
            page INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            start_char INTEGER NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM index_meta").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM entries").execute(&mut *tx).await?;

    let descriptor = index.descriptor();
    let meta = [
        ("format_version", FORMAT_VERSION.to_string()),
        ("model", descriptor.model.clone()),
        ("dims", descriptor.dims.to_string()),
        ("metric", index.metric().as_str().to_string()),
        ("count", index.len().to_string()),
    ];
    for (key, value) in meta {
        sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    for (position, entry) in index.entries().iter().enumerate() {
        sqlx::query(
            "INSERT INTO entries (position, id, source, page, chunk_index, start_char, text, embedding)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(position as i64)
        .bind(entry.id as i64)
        .bind(&entry.segment.source)
        .bind(entry.segment.page as i64)
        .bind(entry.segment.chunk_index as i64)
        .bind(entry.segment.start_char as i64)
        .bind(&entry.segment.text)
        .bind(vec_to_blob(&entry.vector))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    pool.close().await;
    Ok(())
}

pub(crate) async fn load(path: &Path) -> Result<Index> {
    if !path.is_file() {
        return Err(RagError::load(path, "index file not found"));
    }
    let not_an_index = |e: sqlx::Error| RagError::load(path, format!("not a valid index: {}", e));

    let pool = connect(path, false).await.map_err(not_an_index)?;

    let meta: HashMap<String, String> =
        sqlx::query_as::<_, (String, String)>("SELECT key, value FROM index_meta")
            .fetch_all(&pool)
            .await
            .map_err(not_an_index)?
            .into_iter()
            .collect();

    let field = |key: &str| {
        meta.get(key)
            .cloned()
            .ok_or_else(|| RagError::load(path, format!("index metadata is missing '{}'", key)))
    };

    let version = field("format_version")?;
    if version != FORMAT_VERSION {
        return Err(RagError::load(
            path,
            format!("unsupported index format version {}", version),
        ));
    }
    let model = field("model")?;
    let dims: usize = field("dims")?
        .parse()
        .map_err(|_| RagError::load(path, "index metadata has invalid 'dims'"))?;
    let metric_name = field("metric")?;
    let metric = Metric::parse(&metric_name)
        .ok_or_else(|| RagError::load(path, format!("unknown metric '{}'", metric_name)))?;

    let rows = sqlx::query(
        "SELECT id, source, page, chunk_index, start_char, text, embedding
         FROM entries ORDER BY position",
    )
    .fetch_all(&pool)
    .await
    .map_err(not_an_index)?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let blob: Vec<u8> = row.try_get("embedding").map_err(not_an_index)?;
        if blob.len() != dims * 4 {
            return Err(RagError::load(
                path,
                format!(
                    "stored vector has {} bytes, expected {}",
                    blob.len(),
                    dims * 4
                ),
            ));
        }
        let id: i64 = row.try_get("id").map_err(not_an_index)?;
        let page: i64 = row.try_get("page").map_err(not_an_index)?;
        let chunk_index: i64 = row.try_get("chunk_index").map_err(not_an_index)?;
        let start_char: i64 = row.try_get("start_char").map_err(not_an_index)?;
        entries.push(IndexEntry {
            id: id as u64,
            vector: blob_to_vec(&blob),
            segment: Segment {
                text: row.try_get("text").map_err(not_an_index)?,
                source: row.try_get("source").map_err(not_an_index)?,
                page: page as usize,
                chunk_index: chunk_index as usize,
                start_char: start_char as usize,
            },
        });
    }
    pool.close().await;

    if let Some(count) = meta.get("count").and_then(|c| c.parse::<usize>().ok()) {
        if count != entries.len() {
            return Err(RagError::load(
                path,
                format!("index metadata lists {} entries but {} are stored", count, entries.len()),
            ));
        }
    }

    Ok(Index::from_parts(
        EmbedderDescriptor::new(model, dims),
        metric,
        entries,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::DescriptorPolicy;
    use tempfile::TempDir;

    fn sample_index(metric: Metric) -> Index {
        let segment = |text: &str, i: usize| Segment {
            text: text.to_string(),
            source: "Data/herbal.pdf".to_string(),
            page: i / 2,
            chunk_index: i,
            start_char: 10 * i,
        };
        Index::build(
            EmbedderDescriptor::new("text-embedding-3-small", 3),
            metric,
            vec![
                (vec![0.1, 0.2, 0.3], segment("Aetherfloris Ventus", 0)),
                (vec![-1.5, 0.0, 2.25], segment("Noctis Umbraherba", 1)),
                (vec![0.1, 0.2, 0.3], segment("duplicate vector", 2)),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_load_preserves_entries_and_results() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/index.sqlite");
        let index = sample_index(Metric::Cosine);
        index.save(&path).await.unwrap();

        let loaded = Index::load(&path, index.descriptor(), DescriptorPolicy::Require)
            .await
            .unwrap();
        assert_eq!(loaded.metric(), Metric::Cosine);
        assert_eq!(loaded.entries(), index.entries());

        let q = [0.2, 0.1, 0.4];
        assert_eq!(loaded.search(&q, 3).unwrap(), index.search(&q, 3).unwrap());
    }

    #[tokio::test]
    async fn test_save_replaces_previous_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        sample_index(Metric::Euclidean).save(&path).await.unwrap();

        let small = Index::build(
            EmbedderDescriptor::new("text-embedding-3-small", 3),
            Metric::Euclidean,
            vec![(
                vec![1.0, 1.0, 1.0],
                Segment {
                    text: "only".into(),
                    source: "a.txt".into(),
                    page: 0,
                    chunk_index: 0,
                    start_char: 0,
                },
            )],
        )
        .unwrap();
        small.save(&path).await.unwrap();

        let loaded = Index::load(&path, small.descriptor(), DescriptorPolicy::Require)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries()[0].segment.text, "only");
    }

    #[tokio::test]
    async fn test_inserted_ids_continue_after_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        let index = sample_index(Metric::Euclidean);
        index.save(&path).await.unwrap();

        let mut loaded = Index::load(&path, index.descriptor(), DescriptorPolicy::Require)
            .await
            .unwrap();
        let seg = loaded.entries()[0].segment.clone();
        assert_eq!(loaded.insert(vec![0.0, 0.0, 0.0], seg).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_descriptor_mismatch_policy() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        sample_index(Metric::Euclidean).save(&path).await.unwrap();

        let other = EmbedderDescriptor::new("nomic-embed-text", 3);
        let err = Index::load(&path, &other, DescriptorPolicy::Require)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DescriptorMismatch { .. }));

        let loaded = Index::load(&path, &other, DescriptorPolicy::AllowMismatch)
            .await
            .unwrap();
        assert_eq!(loaded.descriptor().model, "text-embedding-3-small");
    }

    #[tokio::test]
    async fn test_missing_file_is_load_error() {
        let tmp = TempDir::new().unwrap();
        let descriptor = EmbedderDescriptor::new("m", 3);
        let err = Index::load(
            &tmp.path().join("absent.sqlite"),
            &descriptor,
            DescriptorPolicy::Require,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RagError::Load { .. }));
    }

    #[tokio::test]
    async fn test_non_index_file_is_load_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("junk.sqlite");
        std::fs::write(&path, b"this is not a database").unwrap();
        let descriptor = EmbedderDescriptor::new("m", 3);
        let err = Index::load(&path, &descriptor, DescriptorPolicy::Require)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Load { .. }));
    }
}
