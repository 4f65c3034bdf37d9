//! AI provider client
//!
//! Thin chat-completions client used by the generation endpoint. The caller
//! reserves credits from an estimate before the request goes out; the
//! provider's reported token usage is what actually gets settled.

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Requested length of the generated reply, mapped to a provider token cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl ResponseSize {
    pub fn max_tokens(&self) -> i64 {
        match self {
            ResponseSize::Small => 100,
            ResponseSize::Medium => 300,
            ResponseSize::Large => 500,
        }
    }
}

/// Errors from the AI provider, split by retryability.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Network trouble, timeouts, rate limiting, provider 5xx
    #[error("AI provider transient failure: {0}")]
    Transient(String),
    /// The provider rejected the request itself
    #[error("AI provider rejected request: {0}")]
    Terminal(String),
}

/// A completed generation call.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub text: String,
    /// Total tokens billed by the provider for this call
    pub total_tokens: i64,
}

pub struct GenerationClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GenerationClient {
    pub fn new(http: reqwest::Client, base_url: String, api_key: String, model: String) -> Self {
        Self {
            http,
            base_url,
            api_key,
            model,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.ai_request_timeout_secs))
            .build()?;

        Ok(Self::new(
            http,
            config.ai_api_base_url.clone(),
            config.ai_api_key.clone(),
            config.ai_model.clone(),
        ))
    }

    /// Estimated credit cost of a call, computed before the provider is hit.
    /// Roughly four characters per prompt token, plus the response cap.
    pub fn estimate_credits(&self, prompt: &str, size: ResponseSize) -> i64 {
        (prompt.len() as i64 / 4) + size.max_tokens()
    }

    /// Run one chat completion and report the provider-billed token count.
    pub async fn generate(
        &self,
        prompt: &str,
        size: ResponseSize,
    ) -> Result<GenerationOutcome, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.7,
            "max_tokens": size.max_tokens(),
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    GenerationError::Transient(e.to_string())
                } else {
                    GenerationError::Terminal(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GenerationError::Transient(format!(
                "provider returned {}",
                status
            )));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GenerationError::Terminal(format!(
                "provider returned {}: {}",
                status, detail
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Terminal(format!("malformed provider response: {}", e)))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                GenerationError::Terminal("provider response contained no choices".to_string())
            })?;

        Ok(GenerationOutcome {
            text,
            total_tokens: completion.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: i64,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn client_for(server: &mockito::ServerGuard) -> GenerationClient {
        GenerationClient::new(
            reqwest::Client::new(),
            server.url(),
            "sk-test".to_string(),
            "gpt-4".to_string(),
        )
    }

    #[test]
    fn test_estimate_includes_prompt_and_response_cap() {
        let client = GenerationClient::new(
            reqwest::Client::new(),
            "http://localhost".to_string(),
            "k".to_string(),
            "m".to_string(),
        );

        // 400 chars ~ 100 prompt tokens, plus the medium cap of 300
        let prompt = "x".repeat(400);
        assert_eq!(client.estimate_credits(&prompt, ResponseSize::Medium), 400);
        assert_eq!(client.estimate_credits(&prompt, ResponseSize::Small), 200);
        assert_eq!(client.estimate_credits("", ResponseSize::Large), 500);
    }

    #[tokio::test]
    async fn test_generate_returns_text_and_token_usage() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "choices": [{ "message": { "role": "assistant", "content": "Thanks for the feedback!" } }],
                    "usage": { "prompt_tokens": 500, "completion_tokens": 230, "total_tokens": 730 }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let outcome = client_for(&server)
            .generate("prompt", ResponseSize::Medium)
            .await
            .unwrap();

        assert_eq!(outcome.text, "Thanks for the feedback!");
        assert_eq!(outcome.total_tokens, 730);
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .create_async()
            .await;

        let err = client_for(&server)
            .generate("prompt", ResponseSize::Small)
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::Transient(_)));
    }

    #[tokio::test]
    async fn test_client_error_is_terminal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_body("bad request")
            .create_async()
            .await;

        let err = client_for(&server)
            .generate("prompt", ResponseSize::Small)
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::Terminal(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .create_async()
            .await;

        let err = client_for(&server)
            .generate("prompt", ResponseSize::Small)
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::Transient(_)));
    }
}
