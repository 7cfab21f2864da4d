//! Web chat UI.
//!
//! Routes:
//! - `GET /` renders the chat page: flash messages, conversation history,
//!   upload form, question form with a per-document source filter.
//! - `POST /upload` saves a PDF into the documents directory and
//!   re-indexes the corpus.
//! - `POST /ask` answers a question over the indexed corpus and appends
//!   both turns to the session.
//! - `POST /clear` drops the conversation.
//! - `GET /health` liveness and version.
//!
//! Every POST follows the redirect-after-post pattern: mutate the session,
//! set the cookie, redirect back to `/`. Indexing runs under a process-wide
//! mutex so concurrent uploads cannot interleave chunk syncs.

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Form, Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::index;
use crate::loader;
use crate::migrate;
use crate::query;
use crate::session::{ChatTurn, Role, SessionState, Signer, ALL_SOURCES, SESSION_COOKIE};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub signer: Signer,
    index_lock: Arc<Mutex<()>>,
}

/// Start the web server on the configured bind address.
pub async fn run_server(config: Config) -> Result<()> {
    config.ensure_dirs()?;
    migrate::run_migrations(&config).await?;

    let bind = config.server.bind.clone();
    let state = AppState {
        signer: Signer::new(&config.server.session_secret),
        config: Arc::new(config),
        index_lock: Arc::new(Mutex::new(())),
    };

    let app = Router::new()
        .route("/", get(handle_index))
        .route("/upload", post(handle_upload))
        .route("/ask", post(handle_ask))
        .route("/clear", post(handle_clear))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(
            state.config.server.max_upload_mb * 1024 * 1024,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(bind = %bind, "starting server");
    println!("docchat listening on http://{}", bind);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Handlers ============

async fn handle_index(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let mut session = load_session(&headers, &state.signer);

    let files = list_corpus(&state.config)?;
    // A deleted file should not stick as the filter
    if session.selected_source != ALL_SOURCES && !files.contains(&session.selected_source) {
        session.selected_source = ALL_SOURCES.to_string();
    }

    let flash = session.take_flash();
    let page = render_page(&flash, &session.messages, &session.selected_source, &files);

    let mut response = Html(page).into_response();
    set_session_cookie(&mut response, &state.signer, &session);
    Ok(response)
}

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut session = load_session(&headers, &state.signer);

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await.map_err(anyhow::Error::from)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(anyhow::Error::from)?;
        upload = Some((file_name, data.to_vec()));
        break;
    }

    let Some((raw_name, data)) = upload else {
        session.push_flash("No file part in the request.");
        return Ok(redirect_home(&state.signer, &session));
    };

    let Some(file_name) = sanitize_file_name(&raw_name) else {
        session.push_flash("No file selected.");
        return Ok(redirect_home(&state.signer, &session));
    };

    let dest = state.config.storage.documents_dir.join(&file_name);
    tokio::fs::write(&dest, &data)
        .await
        .map_err(anyhow::Error::from)?;

    {
        let _guard = state.index_lock.lock().await;
        let report = index::reindex_corpus(&state.config).await?;
        tracing::info!(
            file = %file_name,
            chunks_written = report.chunks_written,
            chunks_unchanged = report.chunks_unchanged,
            "upload indexed"
        );
    }

    session.push_flash(format!("Uploaded and indexed: {}", file_name));
    Ok(redirect_home(&state.signer, &session))
}

#[derive(Debug, Deserialize)]
struct AskForm {
    #[serde(default)]
    question: String,
    #[serde(default)]
    source: Option<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<AskForm>,
) -> Result<Response, AppError> {
    let mut session = load_session(&headers, &state.signer);

    if let Some(source) = form.source {
        if !source.is_empty() {
            session.selected_source = source;
        }
    }

    let question = form.question.trim().to_string();
    if question.is_empty() {
        session.push_flash("Please enter a question.");
        return Ok(redirect_home(&state.signer, &session));
    }

    session.record_question(&question);
    let filter = session.source_filter().map(str::to_string);
    let answer = query::answer_question(&state.config, &question, filter.as_deref()).await?;
    session.record_answer(&answer.text, answer.sources.into_option());

    Ok(redirect_home(&state.signer, &session))
}

async fn handle_clear(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let mut session = load_session(&headers, &state.signer);
    session.clear_history();
    session.push_flash("Chat cleared.");
    Ok(redirect_home(&state.signer, &session))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============ Session plumbing ============

fn load_session(headers: &HeaderMap, signer: &Signer) -> SessionState {
    let Some(cookie_header) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) else {
        return SessionState::default();
    };
    for pair in cookie_header.split(';') {
        if let Some((name, value)) = pair.trim().split_once('=') {
            if name == SESSION_COOKIE {
                return signer.decode(value);
            }
        }
    }
    SessionState::default()
}

fn set_session_cookie(response: &mut Response, signer: &Signer, session: &SessionState) {
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE,
        signer.encode(session)
    );
    if let Ok(value) = cookie.parse() {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
}

/// 303 back to `/` with the updated session cookie.
fn redirect_home(signer: &Signer, session: &SessionState) -> Response {
    let mut response = (StatusCode::SEE_OTHER, [(header::LOCATION, "/")]).into_response();
    set_session_cookie(&mut response, signer, session);
    response
}

/// Uploaded filenames are untrusted; keep only the final path component.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

fn list_corpus(config: &Config) -> Result<Vec<String>> {
    let pdfs = loader::list_pdfs(config)?;
    Ok(pdfs.into_iter().map(|p| p.file_name).collect())
}

// ============ Rendering ============

fn render_page(
    flash: &[String],
    messages: &[ChatTurn],
    selected_source: &str,
    files: &[String],
) -> String {
    let mut html = String::with_capacity(4096);
    html.push_str(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>docchat</title>\n<style>\n\
         body { font-family: sans-serif; max-width: 48rem; margin: 2rem auto; padding: 0 1rem; }\n\
         .flash { background: #fff3cd; padding: 0.5rem 1rem; margin: 0.5rem 0; border-radius: 4px; }\n\
         .turn { margin: 1rem 0; }\n\
         .turn.user { font-weight: bold; }\n\
         .sources { color: #666; font-size: 0.85rem; }\n\
         form { margin: 1rem 0; }\n\
         </style>\n</head>\n<body>\n<h1>docchat</h1>\n",
    );

    for message in flash {
        html.push_str("<div class=\"flash\">");
        html.push_str(&escape_html(message));
        html.push_str("</div>\n");
    }

    html.push_str(
        "<form method=\"post\" action=\"/upload\" enctype=\"multipart/form-data\">\n\
         <input type=\"file\" name=\"file\" accept=\".pdf\">\n\
         <button type=\"submit\">Upload PDF</button>\n</form>\n",
    );

    html.push_str("<div class=\"chat\">\n");
    for turn in messages {
        match turn.role {
            Role::User => {
                html.push_str("<div class=\"turn user\">You: ");
                html.push_str(&escape_html(&turn.content));
                html.push_str("</div>\n");
            }
            Role::Assistant => {
                html.push_str("<div class=\"turn assistant\">Assistant: ");
                html.push_str(&escape_html(&turn.content));
                match &turn.sources {
                    Some(sources) if !sources.is_empty() => {
                        html.push_str("<div class=\"sources\">Sources: ");
                        html.push_str(&escape_html(&sources.join(", ")));
                        html.push_str("</div>");
                    }
                    Some(_) => {}
                    None => {
                        html.push_str("<div class=\"sources\">Sources unavailable</div>");
                    }
                }
                html.push_str("</div>\n");
            }
        }
    }
    html.push_str("</div>\n");

    html.push_str("<form method=\"post\" action=\"/ask\">\n<select name=\"source\">\n");
    html.push_str(&render_option(ALL_SOURCES, "All documents", selected_source));
    for file in files {
        html.push_str(&render_option(file, file, selected_source));
    }
    html.push_str(
        "</select>\n\
         <input type=\"text\" name=\"question\" placeholder=\"Ask a question...\" size=\"40\">\n\
         <button type=\"submit\">Ask</button>\n</form>\n",
    );

    html.push_str(
        "<form method=\"post\" action=\"/clear\">\n\
         <button type=\"submit\">Clear chat</button>\n</form>\n</body>\n</html>\n",
    );

    html
}

fn render_option(value: &str, label: &str, selected: &str) -> String {
    format!(
        "<option value=\"{}\"{}>{}</option>\n",
        escape_html(value),
        if value == selected { " selected" } else { "" },
        escape_html(label)
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

// ============ Errors ============

/// Handler failure: rendered as a JSON 500.
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": { "code": "internal", "message": self.0.to_string() }
            })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_covers_special_chars() {
        assert_eq!(
            escape_html("<b>\"a\" & 'b'</b>"),
            "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(
            sanitize_file_name("../../etc/passwd.pdf"),
            Some("passwd.pdf".to_string())
        );
        assert_eq!(sanitize_file_name("rules.pdf"), Some("rules.pdf".to_string()));
        assert_eq!(sanitize_file_name(""), None);
        assert_eq!(sanitize_file_name(".."), None);
    }

    #[test]
    fn page_escapes_user_content() {
        let messages = vec![ChatTurn {
            role: Role::User,
            content: "<script>alert(1)</script>".to_string(),
            sources: None,
        }];
        let page = render_page(&[], &messages, ALL_SOURCES, &[]);
        assert!(!page.contains("<script>alert"));
        assert!(page.contains("&lt;script&gt;"));
    }

    #[test]
    fn page_marks_selected_source() {
        let files = vec!["a.pdf".to_string(), "b.pdf".to_string()];
        let page = render_page(&[], &[], "b.pdf", &files);
        assert!(page.contains("<option value=\"b.pdf\" selected>"));
        assert!(page.contains("<option value=\"a.pdf\">"));
        assert!(page.contains("<option value=\"__all__\">All documents</option>"));
    }

    #[test]
    fn page_shows_flash_and_sources() {
        let flash = vec!["Chat cleared.".to_string()];
        let messages = vec![ChatTurn {
            role: Role::Assistant,
            content: "Answer.".to_string(),
            sources: Some(vec!["doc.pdf:0:0".to_string()]),
        }];
        let page = render_page(&flash, &messages, ALL_SOURCES, &[]);
        assert!(page.contains("Chat cleared."));
        assert!(page.contains("Sources: doc.pdf:0:0"));
    }

    #[test]
    fn unavailable_sources_render_distinctly() {
        let messages = vec![ChatTurn {
            role: Role::Assistant,
            content: "Answer.".to_string(),
            sources: None,
        }];
        let page = render_page(&[], &messages, ALL_SOURCES, &[]);
        assert!(page.contains("Sources unavailable"));
    }
}
