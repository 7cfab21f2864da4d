//! PDF discovery and text extraction.
//!
//! Scans the documents directory for PDFs and extracts their text page by
//! page, so chunk ids can carry a real page number. Extraction failure for
//! one file never aborts a load; the file is reported in the skip list and
//! the rest of the corpus proceeds.

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::{LoadedPdf, PageText, PdfFile};

/// Extraction error. Returned instead of panicking so the pipeline can skip
/// the offending file.
#[derive(Debug)]
pub enum ExtractError {
    Io(String),
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Io(e) => write!(f, "read failed: {}", e),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Outcome of loading the corpus: extracted documents plus the files that
/// had to be skipped, with the reason.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<LoadedPdf>,
    pub skipped: Vec<(String, String)>,
}

/// List every PDF under the documents directory, sorted by file name.
pub fn list_pdfs(config: &Config) -> Result<Vec<PdfFile>> {
    let root = &config.storage.documents_dir;
    if !root.exists() {
        bail!("Documents directory does not exist: {}", root.display());
    }

    let include_set = pdf_globset()?;
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if !include_set.is_match(&rel_str) {
            continue;
        }

        files.push(PdfFile {
            file_name: rel_str,
            path: path.to_path_buf(),
            modified: file_mtime(path),
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    Ok(files)
}

/// Load the whole corpus: discover PDFs and extract per-page text.
pub fn load_documents(config: &Config) -> Result<LoadReport> {
    let files = list_pdfs(config)?;
    let mut report = LoadReport::default();

    for file in files {
        match extract_file(&file.path) {
            Ok(pages) => report.loaded.push(LoadedPdf {
                file_name: file.file_name,
                pages,
                modified: file.modified,
            }),
            Err(e) => {
                tracing::warn!(file = %file.file_name, error = %e, "skipping unextractable PDF");
                report.skipped.push((file.file_name, e.to_string()));
            }
        }
    }

    Ok(report)
}

/// Extract per-page text from one PDF on disk.
pub fn extract_file(path: &Path) -> Result<Vec<PageText>, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::Io(e.to_string()))?;
    extract_pages(&bytes)
}

/// Extract per-page text from in-memory PDF bytes. Pages are numbered from
/// 0 to match chunk ids.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            page: i as i64,
            text,
        })
        .collect())
}

fn pdf_globset() -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new("**/*.pdf")?);
    builder.add(Glob::new("**/*.PDF")?);
    Ok(builder.build()?)
}

fn file_mtime(path: &Path) -> chrono::DateTime<Utc> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let secs = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}
