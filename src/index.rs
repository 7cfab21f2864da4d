//! Corpus indexing.
//!
//! Coordinates the full load → split → index flow over everything in the
//! documents directory. Re-running is idempotent: chunk ids are
//! deterministic, unchanged chunks are skipped by hash, changed chunks are
//! replaced, and chunks whose id no longer exists for a file are deleted.
//! Documents whose file has disappeared from the directory are pruned.
//! Embedding runs inline, batched, and is non-fatal on failure.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::chunk::chunk_pages;
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::loader;
use crate::models::{Chunk, LoadedPdf};

/// Summary of one re-index run.
#[derive(Debug, Default, Clone)]
pub struct IndexReport {
    pub files_discovered: u64,
    pub files_indexed: u64,
    pub files_skipped: u64,
    pub files_removed: u64,
    pub chunks_written: u64,
    pub chunks_unchanged: u64,
    pub chunks_deleted: u64,
    pub embeddings_written: u64,
    pub embeddings_unchanged: u64,
    pub embeddings_pending: u64,
}

/// Re-index the whole corpus: every PDF currently in the documents
/// directory. The trigger is full-corpus on purpose — the per-chunk
/// hash check makes repeat runs touch only new or changed content.
pub async fn reindex_corpus(config: &Config) -> Result<IndexReport> {
    let load = loader::load_documents(config)?;

    let pool = db::connect(config).await?;
    let mut report = IndexReport {
        files_discovered: (load.loaded.len() + load.skipped.len()) as u64,
        files_skipped: load.skipped.len() as u64,
        ..Default::default()
    };

    for doc in &load.loaded {
        let doc_id = upsert_document(&pool, doc).await?;
        let chunks = chunk_pages(
            &doc.file_name,
            &doc.pages,
            config.chunking.max_tokens,
            config.chunking.overlap_tokens,
        );
        let stats = sync_chunks(&pool, &doc_id, &doc.file_name, &chunks).await?;
        report.chunks_written += stats.written;
        report.chunks_unchanged += stats.unchanged;
        report.chunks_deleted += stats.deleted;

        let emb = embed_chunks_inline(config, &pool, &chunks).await;
        report.embeddings_written += emb.written;
        report.embeddings_unchanged += emb.unchanged;
        report.embeddings_pending += emb.pending;

        report.files_indexed += 1;
    }

    // Files deleted from the directory lose their index entries; files
    // that still exist but failed extraction keep theirs.
    let present: Vec<String> = load
        .loaded
        .iter()
        .map(|d| d.file_name.clone())
        .chain(load.skipped.iter().map(|(name, _)| name.clone()))
        .collect();
    let (removed_files, removed_chunks) = prune_missing_files(&pool, &present).await?;
    report.files_removed = removed_files;
    report.chunks_deleted += removed_chunks;

    pool.close().await;
    Ok(report)
}

/// Delete documents (and their chunks, FTS rows, and vectors) whose file
/// is no longer on disk. Returns (files removed, chunks removed).
async fn prune_missing_files(pool: &SqlitePool, present: &[String]) -> Result<(u64, u64)> {
    let stored: Vec<String> = sqlx::query_scalar("SELECT file_name FROM documents")
        .fetch_all(pool)
        .await?;

    let mut removed_files = 0u64;
    let mut removed_chunks = 0u64;

    for file_name in stored.iter().filter(|f| !present.contains(f)) {
        let mut tx = pool.begin().await?;

        let chunk_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM chunks WHERE file_name = ?")
                .bind(file_name)
                .fetch_all(&mut *tx)
                .await?;
        for chunk_id in &chunk_ids {
            delete_chunk(&mut tx, chunk_id).await?;
        }
        sqlx::query("DELETE FROM documents WHERE file_name = ?")
            .bind(file_name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(file = %file_name, chunks = chunk_ids.len(), "removed deleted file from index");
        removed_files += 1;
        removed_chunks += chunk_ids.len() as u64;
    }

    Ok((removed_files, removed_chunks))
}

/// Insert or update the document row for one loaded PDF.
pub async fn upsert_document(pool: &SqlitePool, doc: &LoadedPdf) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(doc.file_name.as_bytes());
    for page in &doc.pages {
        hasher.update(page.text.as_bytes());
    }
    let dedup_hash = format!("{:x}", hasher.finalize());

    let existing_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM documents WHERE file_name = ?")
            .bind(&doc.file_name)
            .fetch_optional(pool)
            .await?;

    let doc_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO documents (id, file_name, page_count, dedup_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(file_name) DO UPDATE SET
            page_count = excluded.page_count,
            dedup_hash = excluded.dedup_hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&doc_id)
    .bind(&doc.file_name)
    .bind(doc.pages.len() as i64)
    .bind(&dedup_hash)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(doc_id)
}

#[derive(Debug, Default)]
pub struct ChunkSyncStats {
    pub written: u64,
    pub unchanged: u64,
    pub deleted: u64,
}

/// Reconcile the stored chunks for one file with the freshly split set.
/// Upserts by the stable composite id: unchanged hashes are left alone,
/// changed text is rewritten (and its FTS row refreshed), ids that no
/// longer exist are deleted along with their embeddings.
pub async fn sync_chunks(
    pool: &SqlitePool,
    document_id: &str,
    file_name: &str,
    chunks: &[Chunk],
) -> Result<ChunkSyncStats> {
    let mut tx = pool.begin().await?;
    let mut stats = ChunkSyncStats::default();

    let existing_rows = sqlx::query("SELECT id, hash FROM chunks WHERE file_name = ?")
        .bind(file_name)
        .fetch_all(&mut *tx)
        .await?;
    let existing: HashMap<String, String> = existing_rows
        .iter()
        .map(|row| (row.get("id"), row.get("hash")))
        .collect();

    // Delete chunks whose id disappeared (shorter file, fewer pages)
    let new_ids: std::collections::HashSet<&str> =
        chunks.iter().map(|c| c.id.as_str()).collect();
    for stale_id in existing.keys().filter(|id| !new_ids.contains(id.as_str())) {
        delete_chunk(&mut tx, stale_id).await?;
        stats.deleted += 1;
    }

    for chunk in chunks {
        if existing.get(&chunk.id).map(String::as_str) == Some(chunk.hash.as_str()) {
            stats.unchanged += 1;
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, file_name, page, chunk_index, text, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document_id = excluded.document_id,
                text = excluded.text,
                hash = excluded.hash
            "#,
        )
        .bind(&chunk.id)
        .bind(document_id)
        .bind(&chunk.file_name)
        .bind(chunk.page)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        // FTS5 has no upsert; replace the row
        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO chunks_fts (chunk_id, file_name, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.file_name)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;

        stats.written += 1;
    }

    tx.commit().await?;
    Ok(stats)
}

async fn delete_chunk(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    chunk_id: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
        .bind(chunk_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM embeddings WHERE chunk_id = ?")
        .bind(chunk_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
        .bind(chunk_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE id = ?")
        .bind(chunk_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Per-run embedding counts: writes, hash-current skips, and failures
/// left for a later run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmbedStats {
    pub written: u64,
    pub unchanged: u64,
    pub pending: u64,
}

/// Embed chunks during indexing. Non-fatal: a failed batch is counted as
/// pending and the run continues. Chunks whose stored embedding already
/// matches the current hash are counted as unchanged, not written.
pub async fn embed_chunks_inline(
    config: &Config,
    pool: &SqlitePool,
    chunks: &[Chunk],
) -> EmbedStats {
    let mut stats = EmbedStats::default();
    if !config.embedding.is_enabled() {
        return stats;
    }

    let provider = match embedding::create_provider(&config.embedding) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "could not create embedding provider");
            stats.pending = chunks.len() as u64;
            return stats;
        }
    };

    let model_name = provider.model_name().to_string();

    for batch in chunks.chunks(config.embedding.batch_size) {
        let mut need_embedding = Vec::new();
        for chunk in batch {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT hash FROM embeddings WHERE chunk_id = ? AND model = ?")
                    .bind(&chunk.id)
                    .bind(&model_name)
                    .fetch_optional(pool)
                    .await
                    .unwrap_or(None);

            if existing.as_deref() == Some(chunk.hash.as_str()) {
                stats.unchanged += 1;
                continue;
            }
            need_embedding.push(chunk);
        }

        if need_embedding.is_empty() {
            continue;
        }

        let texts: Vec<String> = need_embedding.iter().map(|c| c.text.clone()).collect();

        match embedding::embed_texts(&config.embedding, &texts).await {
            Ok(vectors) => {
                for (chunk, vec) in need_embedding.iter().zip(vectors.iter()) {
                    let blob = embedding::vec_to_blob(vec);
                    if let Err(e) =
                        upsert_embedding(pool, chunk, &model_name, provider.dims(), &blob).await
                    {
                        tracing::warn!(chunk = %chunk.id, error = %e, "failed to store embedding");
                        stats.pending += 1;
                    } else {
                        stats.written += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding batch failed");
                stats.pending += need_embedding.len() as u64;
            }
        }
    }

    stats
}

async fn upsert_embedding(
    pool: &SqlitePool,
    chunk: &Chunk,
    model: &str,
    dims: usize,
    blob: &[u8],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO embeddings (chunk_id, model, dims, created_at, hash)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            created_at = excluded.created_at,
            hash = excluded.hash
        "#,
    )
    .bind(&chunk.id)
    .bind(model)
    .bind(dims as i64)
    .bind(now)
    .bind(&chunk.hash)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, file_name, embedding)
        VALUES (?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            file_name = excluded.file_name,
            embedding = excluded.embedding
        "#,
    )
    .bind(&chunk.id)
    .bind(&chunk.file_name)
    .bind(blob)
    .execute(pool)
    .await?;

    Ok(())
}
