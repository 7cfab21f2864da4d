//! End-to-end CLI tests that spawn the built `docchat` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docchat");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("documents")).unwrap();

    let config_content = format!(
        r#"[storage]
documents_dir = "{}/documents"
db_path = "{}/data/docchat.sqlite"

[chunking]
max_tokens = 700
overlap_tokens = 80

[server]
bind = "127.0.0.1:0"
session_secret = "0123456789abcdef0123456789abcdef"
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("docchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Minimal single-page PDF with correct xref offsets so pdf-extract can
/// parse it.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET\n", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!("4 0 obj << /Length {} >> stream\n{}endstream endobj\n", stream.len(), stream)
            .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

#[test]
fn init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docchat(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/docchat.sqlite").exists());
}

#[test]
fn init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_docchat(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_docchat(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn ingest_empty_corpus_reports_zero() {
    let (_tmp, config_path) = setup_test_env();

    run_docchat(&config_path, &["init"]);
    let (stdout, stderr, success) = run_docchat(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("0 discovered"), "got: {}", stdout);
    assert!(stdout.contains("ok"));
}

#[test]
fn ingest_skips_corrupt_pdf() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("documents/bad.pdf"), b"not a valid pdf").unwrap();

    run_docchat(&config_path, &["init"]);
    let (stdout, stderr, success) = run_docchat(&config_path, &["ingest"]);
    assert!(success, "ingest must succeed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1 discovered"), "got: {}", stdout);
    assert!(stdout.contains("1 skipped"), "got: {}", stdout);
}

#[test]
fn ingest_is_idempotent() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("documents/sample.pdf"), minimal_pdf("hello")).unwrap();

    run_docchat(&config_path, &["init"]);
    let (stdout1, _, success1) = run_docchat(&config_path, &["ingest"]);
    assert!(success1, "first ingest failed: {}", stdout1);

    let (stdout2, _, success2) = run_docchat(&config_path, &["ingest"]);
    assert!(success2, "second ingest failed: {}", stdout2);
    // Whatever the extractor yields for the fixture, a repeat run writes
    // no new chunks
    assert!(stdout2.contains("0 written"), "got: {}", stdout2);
}

#[test]
fn search_with_no_matches_prints_no_results() {
    let (_tmp, config_path) = setup_test_env();

    run_docchat(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_docchat(&config_path, &["search", "nonexistent phrase xyzzy"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("No results."));
}

#[test]
fn search_rejects_unknown_mode() {
    let (_tmp, config_path) = setup_test_env();

    run_docchat(&config_path, &["init"]);
    let (_, stderr, success) =
        run_docchat(&config_path, &["search", "anything", "--mode", "psychic"]);
    assert!(!success);
    assert!(stderr.contains("Unknown search mode"), "got: {}", stderr);
}

#[test]
fn semantic_search_requires_embedding_provider() {
    let (_tmp, config_path) = setup_test_env();

    run_docchat(&config_path, &["init"]);
    let (_, stderr, success) =
        run_docchat(&config_path, &["search", "anything", "--mode", "semantic"]);
    assert!(!success);
    assert!(stderr.contains("requires embeddings"), "got: {}", stderr);
}

#[test]
fn ask_fails_without_llm_provider() {
    let (_tmp, config_path) = setup_test_env();

    run_docchat(&config_path, &["init"]);
    let (_, stderr, success) = run_docchat(&config_path, &["ask", "What is this about?"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "got: {}", stderr);
}

#[test]
fn missing_config_fails_with_context() {
    let (tmp, _) = setup_test_env();
    let bogus = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_docchat(&bogus, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config"), "got: {}", stderr);
}
