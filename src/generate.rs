//! Streaming generation capability and its OpenAI implementation.
//!
//! A generation call is a lazy, finite, non-restartable sequence of text
//! fragments. [`Generator::stream_chat`] hands back a channel receiver;
//! fragments arrive in upstream order as `Ok(String)` items, and a
//! mid-stream provider failure arrives as a single `Err` item followed by
//! channel close. The orchestrator owns what happens next — nothing here
//! retries or rewrites the stream.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::models::ChatMessage;

/// Receiver side of one generation stream.
pub type TokenReceiver = mpsc::Receiver<Result<String>>;

/// Capability: stream completion tokens for an ordered message list.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenReceiver>;
}

/// Generator backed by an OpenAI-compatible `/chat/completions` endpoint
/// with `stream: true` (server-sent events).
pub struct OpenAiGenerator {
    model: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            Error::GenerationFailure("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::GenerationFailure(e.to_string()))?;

        Ok(Self {
            model: config.model.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenReceiver> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::GenerationFailure(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::GenerationFailure(format!(
                "completion request failed {}: {}",
                status, text
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(pump_sse(resp, tx));
        Ok(rx)
    }
}

/// Read the SSE body chunk by chunk, split into lines, and forward each
/// `data:` payload's `delta.content` as one fragment.
async fn pump_sse(mut resp: reqwest::Response, tx: mpsc::Sender<Result<String>>) {
    let mut buffer = String::new();

    loop {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(idx) = buffer.find('\n') {
                    let line = buffer[..idx].trim().to_string();
                    buffer.drain(..=idx);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }
                    let Ok(json) = serde_json::from_str::<serde_json::Value>(data) else {
                        continue;
                    };
                    if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
                        if !content.is_empty()
                            && tx.send(Ok(content.to_string())).await.is_err()
                        {
                            // Receiver gone: the caller cancelled.
                            return;
                        }
                    }
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = tx
                    .send(Err(Error::GenerationFailure(e.to_string())))
                    .await;
                return;
            }
        }
    }
}
