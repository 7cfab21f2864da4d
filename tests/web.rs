//! Web UI tests: spawn `docchat serve` and drive it over HTTP.
//!
//! Each test gets its own temp directory and port so they can run in
//! parallel. POST flows are followed manually (redirects disabled) so the
//! session cookie handoff is asserted explicitly.

use std::fs;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn docchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("docchat");
    path
}

struct ServerGuard {
    child: Child,
    _tmp: TempDir,
    base_url: String,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn start_server(port: u16) -> ServerGuard {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("documents")).unwrap();

    let config_content = format!(
        r#"[storage]
documents_dir = "{}/documents"
db_path = "{}/data/docchat.sqlite"

[chunking]
max_tokens = 700

[server]
bind = "127.0.0.1:{}"
session_secret = "0123456789abcdef0123456789abcdef"
"#,
        root.display(),
        root.display(),
        port
    );
    let config_path = root.join("config/docchat.toml");
    fs::write(&config_path, config_content).unwrap();

    let child = Command::new(docchat_binary())
        .arg("--config")
        .arg(&config_path)
        .arg("serve")
        .spawn()
        .expect("failed to spawn docchat serve");

    let guard = ServerGuard {
        child,
        _tmp: tmp,
        base_url: format!("http://127.0.0.1:{}", port),
    };

    // Wait for the server to come up
    let client = client();
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        if let Ok(resp) = client.get(format!("{}/health", guard.base_url)).send() {
            if resp.status().is_success() {
                break;
            }
        }
        assert!(Instant::now() < deadline, "server did not start in time");
        std::thread::sleep(Duration::from_millis(100));
    }

    guard
}

fn client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Pull the session cookie pair out of a response's Set-Cookie header.
fn session_cookie(resp: &reqwest::blocking::Response) -> String {
    resp.headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .expect("response should set the session cookie")
        .to_string()
}

fn get_page(base_url: &str, cookie: &str) -> String {
    client()
        .get(format!("{}/", base_url))
        .header("Cookie", cookie)
        .send()
        .unwrap()
        .text()
        .unwrap()
}

#[test]
fn health_reports_ok_and_version() {
    let server = start_server(7411);

    let resp = client()
        .get(format!("{}/health", server.base_url))
        .send()
        .unwrap();
    assert!(resp.status().is_success());

    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[test]
fn index_renders_chat_page() {
    let server = start_server(7412);

    let resp = client().get(format!("{}/", server.base_url)).send().unwrap();
    assert!(resp.status().is_success());
    let cookie = session_cookie(&resp);
    assert!(cookie.starts_with("docchat_session="));

    let body = resp.text().unwrap();
    assert!(body.contains("All documents"));
    assert!(body.contains("action=\"/upload\""));
    assert!(body.contains("action=\"/ask\""));
}

#[test]
fn empty_question_flashes_without_recording() {
    let server = start_server(7413);

    let resp = client()
        .post(format!("{}/ask", server.base_url))
        .form(&[("question", "   "), ("source", "__all__")])
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 303);
    let cookie = session_cookie(&resp);

    let page = get_page(&server.base_url, &cookie);
    assert!(page.contains("Please enter a question."));
    // No chat turns were appended
    assert!(!page.contains("class=\"turn"));
}

#[test]
fn upload_without_file_part_flashes() {
    let server = start_server(7414);

    let form = reqwest::blocking::multipart::Form::new().text("other", "ignored");
    let resp = client()
        .post(format!("{}/upload", server.base_url))
        .multipart(form)
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 303);
    let cookie = session_cookie(&resp);

    let page = get_page(&server.base_url, &cookie);
    assert!(page.contains("No file part in the request."));
}

#[test]
fn upload_with_empty_filename_flashes() {
    let server = start_server(7415);

    let part = reqwest::blocking::multipart::Part::bytes(b"%PDF-1.4".to_vec()).file_name("");
    let form = reqwest::blocking::multipart::Form::new().part("file", part);
    let resp = client()
        .post(format!("{}/upload", server.base_url))
        .multipart(form)
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 303);
    let cookie = session_cookie(&resp);

    let page = get_page(&server.base_url, &cookie);
    assert!(page.contains("No file selected."));
}

#[test]
fn uploaded_pdf_appears_in_source_list() {
    let server = start_server(7416);

    let part = reqwest::blocking::multipart::Part::bytes(b"not really a pdf".to_vec())
        .file_name("manual.pdf");
    let form = reqwest::blocking::multipart::Form::new().part("file", part);
    let resp = client()
        .post(format!("{}/upload", server.base_url))
        .multipart(form)
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 303);
    let cookie = session_cookie(&resp);

    let page = get_page(&server.base_url, &cookie);
    assert!(page.contains("Uploaded and indexed: manual.pdf"));
    assert!(page.contains("<option value=\"manual.pdf\""));
}

#[test]
fn multi_megabyte_upload_is_accepted() {
    let server = start_server(7419);

    // Well past the old framework default of 2 MB
    let body = vec![b'x'; 3 * 1024 * 1024];
    let part = reqwest::blocking::multipart::Part::bytes(body).file_name("big.pdf");
    let form = reqwest::blocking::multipart::Form::new().part("file", part);
    let resp = client()
        .post(format!("{}/upload", server.base_url))
        .multipart(form)
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 303, "large upload must not be rejected");
    let cookie = session_cookie(&resp);

    let page = get_page(&server.base_url, &cookie);
    assert!(page.contains("Uploaded and indexed: big.pdf"));
    assert!(page.contains("<option value=\"big.pdf\""));
}

#[test]
fn clear_flashes_and_is_idempotent() {
    let server = start_server(7417);

    let resp = client()
        .post(format!("{}/clear", server.base_url))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 303);
    let cookie = session_cookie(&resp);

    let page = get_page(&server.base_url, &cookie);
    assert!(page.contains("Chat cleared."));

    // Flash drains after one render
    let resp = client()
        .get(format!("{}/", server.base_url))
        .header("Cookie", &cookie)
        .send()
        .unwrap();
    let cookie2 = session_cookie(&resp);
    let page2 = get_page(&server.base_url, &cookie2);
    assert!(!page2.contains("Chat cleared."));
}

#[test]
fn tampered_cookie_falls_back_to_empty_session() {
    let server = start_server(7418);

    let page = get_page(&server.base_url, "docchat_session=forged.deadbeef");
    // Served fine, just with a fresh session
    assert!(page.contains("All documents"));
}
