//! OpenAI-compatible chat-completions client

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

use crate::context::ContextMessage;
use crate::core::config::ProviderConfig;
use crate::core::error::ClientError;
use crate::providers::CompletionClient;

const SYSTEM_PROMPT: &str = "You suggest short reply options for a chat conversation. \
Respond with one suggested reply per line, nothing else.";

/// Completion client speaking the OpenAI chat-completions dialect
pub struct HttpCompletionClient {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    timeout_ms: u64,
    max_suggestions: usize,
}

impl HttpCompletionClient {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self, ClientError> {
        let timeout = Duration::from_secs(cfg.timeout_seconds);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Network {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_base: cfg.api_base.clone(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            timeout_ms: timeout.as_millis() as u64,
            max_suggestions: cfg.max_suggestions,
        })
    }

    fn build_messages(&self, content: &str, context: &[ContextMessage]) -> Vec<JsonValue> {
        let mut out = Vec::with_capacity(context.len() + 2);
        out.push(json!({"role": "system", "content": SYSTEM_PROMPT}));
        for m in context {
            // Our own lines read as assistant turns, everyone else as user
            let role = if m.is_self { "assistant" } else { "user" };
            out.push(json!({
                "role": role,
                "content": format!("{}: {}", m.sender, m.content),
            }));
        }
        out.push(json!({"role": "user", "content": content}));
        out
    }

    fn map_http_error(status: u16, body: String) -> ClientError {
        if status == 429 {
            ClientError::RateLimited {
                message: format!("Rate limited by completion API: {}", body),
                status: Some(status),
                retry_after_ms: None,
            }
        } else {
            ClientError::Api {
                message: format!("Completion API returned {}: {}", status, body),
                status: Some(status),
            }
        }
    }

    /// Extract ordered option strings from the response body. Each returned
    /// choice yields one option; a single choice containing multiple lines is
    /// split on newlines.
    fn parse_options(&self, body: &JsonValue) -> Result<Vec<String>, ClientError> {
        let choices = body
            .get("choices")
            .and_then(|c| c.as_array())
            .ok_or_else(|| ClientError::MalformedResponse {
                message: "Response has no choices array".to_string(),
            })?;

        let mut options: Vec<String> = Vec::new();
        for choice in choices {
            let text = choice
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
                .ok_or_else(|| ClientError::MalformedResponse {
                    message: "Choice is missing message content".to_string(),
                })?;
            if choices.len() == 1 {
                options.extend(
                    text.lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string),
                );
            } else {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    options.push(trimmed.to_string());
                }
            }
        }

        if options.is_empty() {
            return Err(ClientError::MalformedResponse {
                message: "Response contained no usable options".to_string(),
            });
        }

        options.truncate(self.max_suggestions);
        Ok(options)
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn call(
        &self,
        content: &str,
        context: &[ContextMessage],
    ) -> Result<Vec<String>, ClientError> {
        let url = format!(
            "{}/chat/completions",
            self.api_base.trim_end_matches('/')
        );

        let payload = json!({
            "model": self.model,
            "messages": self.build_messages(content, context),
            "n": self.max_suggestions,
            "max_tokens": 120,
        });

        debug!("Requesting {} suggestions from {}", self.max_suggestions, url);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClientError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    ClientError::Network {
                        message: format!("Completion request failed: {}", e),
                    }
                }
            })?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| ClientError::Network {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !(200..300).contains(&status) {
            return Err(Self::map_http_error(status, text));
        }

        let body: JsonValue =
            serde_json::from_str(&text).map_err(|e| ClientError::MalformedResponse {
                message: format!("Response is not valid JSON: {}", e),
            })?;

        self.parse_options(&body)
    }
}
