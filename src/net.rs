//! Shared HTTP plumbing for the embedding and completion providers.
//!
//! Retry policy: HTTP 429 and 5xx are retried with exponential backoff
//! (1s, 2s, 4s, ... capped at 32s), other 4xx fail immediately, network
//! errors are retried.

use anyhow::{bail, Result};
use std::time::Duration;

pub struct PostJson<'a> {
    pub url: String,
    pub bearer: Option<String>,
    pub body: &'a serde_json::Value,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// POST a JSON body and return the parsed JSON response, retrying
/// transient failures.
pub async fn post_json(req: PostJson<'_>) -> Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(req.timeout_secs))
        .build()?;

    let mut last_err = None;

    for attempt in 0..=req.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut builder = client
            .post(&req.url)
            .header("Content-Type", "application/json")
            .json(req.body);
        if let Some(ref token) = req.bearer {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("{} error {}: {}", req.url, status, body_text));
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} error {}: {}", req.url, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("request to {} failed: {}", req.url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("request failed after retries")))
}
