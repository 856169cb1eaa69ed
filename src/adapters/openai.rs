//! OpenAI chat-completions responder.
//!
//! Sends the configured system prompt plus the viewer's comment and returns
//! the sanitized reply. Transient failures are retried per the configured
//! `RetryPolicy`; credential failures are returned immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ResponderConfig;

use super::{ResponderError, TextResponder};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI chat-completions client
pub struct OpenAiResponder {
    api_key: String,
    endpoint: String,
    config: ResponderConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiResponder {
    pub fn new(api_key: impl Into<String>, config: ResponderConfig) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            config,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Point at a compatible endpoint (proxies, local servers)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn request_once(&self, prompt: &str) -> Result<String, ResponderError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ResponderError::Unknown(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ResponderError::Unknown(format!("invalid response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(sanitize_reply(&content))
    }
}

#[async_trait]
impl TextResponder for OpenAiResponder {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str) -> Result<String, ResponderError> {
        let policy = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.request_once(prompt).await {
                Ok(reply) => return Ok(reply),
                Err(e @ ResponderError::AuthFailure(_)) => return Err(e),
                Err(e) if policy.should_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(attempt, error = %e, ?delay, "Responder call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!(attempt, "Responder retries exhausted");
                    return Err(e);
                }
            }
        }
    }
}

/// Map an HTTP failure status to a responder error
fn classify_status(status: StatusCode, detail: &str) -> ResponderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ResponderError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ResponderError::AuthFailure(format!("HTTP {}", status.as_u16()))
        }
        _ => ResponderError::Unknown(format!("HTTP {}: {}", status.as_u16(), detail.trim())),
    }
}

/// Collapse whitespace and make sure the reply ends like a sentence
pub fn sanitize_reply(text: &str) -> String {
    let mut reply = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some(last) = reply.chars().last() {
        if !matches!(last, '.' | '!' | '?') {
            reply.push('.');
        }
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_reply() {
        assert_eq!(sanitize_reply("  The mirror\n\nsees   you "), "The mirror sees you.");
        assert_eq!(sanitize_reply("Who goes there?"), "Who goes there?");
        assert_eq!(sanitize_reply("   "), "");
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ResponderError::RateLimited
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            ResponderError::AuthFailure(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, "oops"),
            ResponderError::Unknown(_)
        ));
    }

    #[test]
    fn test_responder_name() {
        let responder = OpenAiResponder::new("key", ResponderConfig::default());
        assert_eq!(responder.name(), "openai");
        assert_eq!(responder.endpoint, DEFAULT_ENDPOINT);
    }
}
