//! Core data models used throughout docchat.
//!
//! These types represent the PDF files, pages, and chunks that flow through
//! the ingestion pipeline, and the retrieval results the query engine
//! returns.

use chrono::{DateTime, Utc};

/// A PDF discovered in the documents directory, before extraction.
#[derive(Debug, Clone)]
pub struct PdfFile {
    /// Path relative to the documents directory, e.g. `manual.pdf`.
    pub file_name: String,
    pub path: std::path::PathBuf,
    pub modified: DateTime<Utc>,
}

/// One page of extracted text. Pages are numbered from 0, matching the
/// page component of chunk ids.
#[derive(Debug, Clone)]
pub struct PageText {
    pub page: i64,
    pub text: String,
}

/// A loaded PDF with all of its page text.
#[derive(Debug, Clone)]
pub struct LoadedPdf {
    pub file_name: String,
    pub pages: Vec<PageText>,
    pub modified: DateTime<Utc>,
}

/// A chunk of one page's text. The id is the deterministic composite
/// `file_name:page:chunk_index`, stable across re-index runs so the
/// indexer can upsert without duplicating entries.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub file_name: String,
    pub page: i64,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of the chunk text, for staleness detection.
    pub hash: String,
}

/// Builds the composite chunk id shared by the splitter and the store.
pub fn chunk_id(file_name: &str, page: i64, chunk_index: i64) -> String {
    format!("{}:{}:{}", file_name, page, chunk_index)
}

/// A retrieved chunk with its merged relevance score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub file_name: String,
    pub page: i64,
    pub text: String,
    pub score: f64,
}
