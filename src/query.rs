//! Retrieval and answer synthesis.
//!
//! Candidates come from two channels: FTS5 keyword match and cosine
//! similarity over stored chunk vectors. Scores are min-max normalized per
//! channel and merged with `hybrid_alpha` (0 = pure keyword, 1 = pure
//! vector). When embeddings are disabled the engine degrades to
//! keyword-only. An optional source filter restricts both channels to one
//! file.
//!
//! Source attribution for an answer is best-effort and typed: a failed
//! lookup yields [`SourceAttribution::Unavailable`] rather than failing
//! the whole question.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::llm;
use crate::models::RetrievedChunk;

/// Outcome of the best-effort source lookup attached to an answer.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceAttribution {
    /// Chunk ids backing the answer, in relevance order. May be empty
    /// when nothing relevant was indexed.
    Resolved(Vec<String>),
    /// The lookup itself failed; distinct from "no sources found".
    Unavailable,
}

impl SourceAttribution {
    /// Session representation: `None` only when the lookup failed.
    pub fn into_option(self) -> Option<Vec<String>> {
        match self {
            SourceAttribution::Resolved(ids) => Some(ids),
            SourceAttribution::Unavailable => None,
        }
    }
}

/// A synthesized answer with its attribution.
#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub text: String,
    pub sources: SourceAttribution,
}

/// Answer a question over the indexed corpus. `source_filter` of `None`
/// searches everything; `Some(file)` restricts retrieval to that file.
pub async fn answer_question(
    config: &Config,
    question: &str,
    source_filter: Option<&str>,
) -> Result<RagAnswer> {
    if !config.llm.is_enabled() {
        bail!("Completion provider is disabled. Set [llm] provider in config.");
    }

    let pool = db::connect(config).await?;
    let mode = if config.embedding.is_enabled() {
        "hybrid"
    } else {
        "keyword"
    };

    let retrieved = retrieve_chunks(
        &pool,
        config,
        question,
        mode,
        source_filter,
        config.retrieval.context_chunks,
    )
    .await?;

    let context: Vec<String> = retrieved.iter().map(|c| c.text.clone()).collect();
    let answer = llm::synthesize_answer(&config.llm, question, &context).await?;

    let ids: Vec<String> = retrieved.into_iter().map(|c| c.chunk_id).collect();
    let sources = attribute_sources(&pool, &ids).await;

    pool.close().await;
    Ok(RagAnswer {
        text: answer,
        sources,
    })
}

/// Retrieve the top `limit` chunks for a query.
pub async fn retrieve_chunks(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    mode: &str,
    source_filter: Option<&str>,
    limit: usize,
) -> Result<Vec<RetrievedChunk>> {
    match mode {
        "keyword" | "semantic" | "hybrid" => {}
        _ => bail!(
            "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
            mode
        ),
    }
    if (mode == "semantic" || mode == "hybrid") && !config.embedding.is_enabled() {
        bail!(
            "Mode '{}' requires embeddings. Set [embedding] provider in config.",
            mode
        );
    }

    let keyword_candidates = if mode == "keyword" || mode == "hybrid" {
        fetch_keyword_candidates(
            pool,
            query,
            source_filter,
            config.retrieval.candidate_k_keyword,
        )
        .await?
    } else {
        Vec::new()
    };

    let vector_candidates = if mode == "semantic" || mode == "hybrid" {
        fetch_vector_candidates(
            pool,
            config,
            query,
            source_filter,
            config.retrieval.candidate_k_vector,
        )
        .await?
    } else {
        Vec::new()
    };

    let effective_alpha = match mode {
        "keyword" => 0.0,
        "semantic" => 1.0,
        _ => config.retrieval.hybrid_alpha,
    };

    let mut merged = merge_candidates(&keyword_candidates, &vector_candidates, effective_alpha);
    merged.truncate(limit);
    Ok(merged)
}

/// CLI debug retrieval: print ranked chunks with scores.
pub async fn run_search(
    config: &Config,
    query: &str,
    mode: &str,
    source_filter: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let limit = limit.unwrap_or(config.retrieval.context_chunks);
    let results =
        retrieve_chunks(&pool, config, query, mode, source_filter.as_deref(), limit).await?;

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let excerpt: String = result.text.chars().take(240).collect();
        println!(
            "{}. [{:.2}] {} (page {})",
            i + 1,
            result.score,
            result.file_name,
            result.page
        );
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", result.chunk_id);
        println!();
    }

    pool.close().await;
    Ok(())
}

/// CLI one-shot question.
pub async fn run_ask(config: &Config, question: &str, source_filter: Option<String>) -> Result<()> {
    if question.trim().is_empty() {
        bail!("Question must not be empty");
    }

    let answer = answer_question(config, question, source_filter.as_deref()).await?;
    println!("{}", answer.text);
    match answer.sources {
        SourceAttribution::Resolved(ids) if !ids.is_empty() => {
            println!();
            println!("sources: {}", ids.join(", "));
        }
        SourceAttribution::Resolved(_) => {}
        SourceAttribution::Unavailable => {
            println!();
            println!("sources: (unavailable)");
        }
    }
    Ok(())
}

// ============ Candidates ============

#[derive(Debug, Clone)]
struct ChunkCandidate {
    chunk_id: String,
    file_name: String,
    page: i64,
    raw_score: f64,
    text: String,
}

/// Reduce free text to an FTS5-safe query: each term stripped to
/// alphanumerics, double-quoted so operator words like OR/NOT/NEAR stay
/// literal terms, then joined with OR for recall.
fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}

async fn fetch_keyword_candidates(
    pool: &SqlitePool,
    query: &str,
    source_filter: Option<&str>,
    candidate_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let fts_query = sanitize_fts_query(query);
    if fts_query.is_empty() {
        return Ok(Vec::new());
    }

    let rows = if let Some(file) = source_filter {
        sqlx::query(
            r#"
            SELECT chunks_fts.chunk_id, chunks_fts.file_name, chunks.page,
                   chunks_fts.text, chunks_fts.rank
            FROM chunks_fts
            JOIN chunks ON chunks.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ? AND chunks_fts.file_name = ?
            ORDER BY chunks_fts.rank
            LIMIT ?
            "#,
        )
        .bind(&fts_query)
        .bind(file)
        .bind(candidate_k)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query(
            r#"
            SELECT chunks_fts.chunk_id, chunks_fts.file_name, chunks.page,
                   chunks_fts.text, chunks_fts.rank
            FROM chunks_fts
            JOIN chunks ON chunks.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?
            ORDER BY chunks_fts.rank
            LIMIT ?
            "#,
        )
        .bind(&fts_query)
        .bind(candidate_k)
        .fetch_all(pool)
        .await?
    };

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                file_name: row.get("file_name"),
                page: row.get("page"),
                raw_score: -rank, // negate so higher = better
                text: row.get("text"),
            }
        })
        .collect())
}

async fn fetch_vector_candidates(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    source_filter: Option<&str>,
    candidate_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let query_vec = embedding::embed_query(&config.embedding, query).await?;

    let rows = if let Some(file) = source_filter {
        sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.file_name, cv.embedding, c.page, c.text
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.file_name = ?
            "#,
        )
        .bind(file)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.file_name, cv.embedding, c.page, c.text
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            "#,
        )
        .fetch_all(pool)
        .await?
    };

    let mut candidates: Vec<ChunkCandidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            let similarity = embedding::cosine_similarity(&query_vec, &vec) as f64;
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                file_name: row.get("file_name"),
                page: row.get("page"),
                raw_score: similarity,
                text: row.get("text"),
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(candidate_k as usize);

    Ok(candidates)
}

// ============ Merging ============

/// Merge the two candidate channels into one ranked list using
/// `alpha`-weighted normalized scores. Ties break on chunk id for
/// deterministic output.
fn merge_candidates(
    keyword: &[ChunkCandidate],
    vector: &[ChunkCandidate],
    alpha: f64,
) -> Vec<RetrievedChunk> {
    let norm_keyword = normalize_scores(keyword);
    let norm_vector = normalize_scores(vector);

    let kw_map: HashMap<&str, f64> = norm_keyword
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();
    let vec_map: HashMap<&str, f64> = norm_vector
        .iter()
        .map(|(c, s)| (c.chunk_id.as_str(), *s))
        .collect();

    let mut all_chunks: HashMap<&str, &ChunkCandidate> = HashMap::new();
    for c in keyword.iter().chain(vector.iter()) {
        all_chunks.entry(c.chunk_id.as_str()).or_insert(c);
    }

    let mut merged: Vec<RetrievedChunk> = all_chunks
        .values()
        .map(|cand| {
            let k = kw_map.get(cand.chunk_id.as_str()).copied().unwrap_or(0.0);
            let v = vec_map.get(cand.chunk_id.as_str()).copied().unwrap_or(0.0);
            RetrievedChunk {
                chunk_id: cand.chunk_id.clone(),
                file_name: cand.file_name.clone(),
                page: cand.page,
                text: cand.text.clone(),
                score: (1.0 - alpha) * k + alpha * v,
            }
        })
        .collect();

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    merged
}

/// Min-max normalize raw scores to [0, 1] per channel.
fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

/// Best-effort attribution: confirm the retrieved chunk ids against the
/// store, degrading to [`SourceAttribution::Unavailable`] if the lookup
/// itself fails.
pub async fn attribute_sources(pool: &SqlitePool, ids: &[String]) -> SourceAttribution {
    match resolve_sources(pool, ids).await {
        Ok(ids) => SourceAttribution::Resolved(ids),
        Err(e) => {
            tracing::warn!(error = %e, "source attribution lookup failed");
            SourceAttribution::Unavailable
        }
    }
}

/// Check that every attributed chunk id still exists in the store,
/// preserving relevance order.
async fn resolve_sources(pool: &SqlitePool, ids: &[String]) -> Result<Vec<String>> {
    let mut resolved = Vec::with_capacity(ids.len());
    for id in ids {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM chunks WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?;
        if exists {
            resolved.push(id.clone());
        }
    }
    Ok(resolved)
}
