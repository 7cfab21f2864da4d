//! Completion providers and prompt construction.
//!
//! The query engine hands over the retrieved chunk texts; this module
//! builds the grounded prompt and calls the configured completion backend
//! (`ollama` `/api/generate` or the OpenAI chat completions API) with the
//! same retry policy the embedding providers use.

use anyhow::{bail, Result};

use crate::config::LlmConfig;
use crate::net::{post_json, PostJson};

/// Build the grounded RAG prompt from the retrieved context chunks.
pub fn build_prompt(question: &str, context_chunks: &[String]) -> String {
    let context = context_chunks.join("\n\n---\n\n");
    format!(
        "Answer the question based only on the following context:\n\n\
         {}\n\n\
         ---\n\n\
         Answer the question based on the above context: {}",
        context, question
    )
}

/// Synthesize an answer for `question` grounded in `context_chunks`.
pub async fn synthesize_answer(
    config: &LlmConfig,
    question: &str,
    context_chunks: &[String],
) -> Result<String> {
    let prompt = build_prompt(question, context_chunks);

    match config.provider.as_str() {
        "ollama" => complete_ollama(config, &prompt).await,
        "openai" => complete_openai(config, &prompt).await,
        "disabled" => bail!("Completion provider is disabled. Set [llm] provider in config."),
        other => bail!("Unknown llm provider: {}", other),
    }
}

async fn complete_ollama(config: &LlmConfig, prompt: &str) -> Result<String> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("llm.model required"))?;
    let url = config.url.as_deref().unwrap_or("http://localhost:11434");

    let body = serde_json::json!({
        "model": model,
        "prompt": prompt,
        "stream": false,
    });
    let json = post_json(PostJson {
        url: format!("{}/api/generate", url),
        bearer: None,
        body: &body,
        timeout_secs: config.timeout_secs,
        max_retries: config.max_retries,
    })
    .await?;

    json.get("response")
        .and_then(|r| r.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
}

async fn complete_openai(config: &LlmConfig, prompt: &str) -> Result<String> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("llm.model required"))?;

    let body = serde_json::json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
    });
    let json = post_json(PostJson {
        url: "https://api.openai.com/v1/chat/completions".to_string(),
        bearer: Some(api_key),
        body: &body,
        timeout_secs: config.timeout_secs,
        max_retries: config.max_retries,
    })
    .await?;

    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_contains_context_and_question() {
        let prompt = build_prompt(
            "What is X?",
            &["Chunk one.".to_string(), "Chunk two.".to_string()],
        );
        assert!(prompt.contains("Chunk one.\n\n---\n\nChunk two."));
        assert!(prompt.ends_with("Answer the question based on the above context: What is X?"));
    }

    #[test]
    fn prompt_with_no_context_is_still_well_formed() {
        let prompt = build_prompt("What is X?", &[]);
        assert!(prompt.starts_with("Answer the question based only on the following context:"));
        assert!(prompt.contains("What is X?"));
    }

    #[tokio::test]
    async fn disabled_provider_errors() {
        let err = synthesize_answer(&Default::default(), "q", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }
}
