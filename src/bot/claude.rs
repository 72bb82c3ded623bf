//! Anthropic chat backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bot::retry::send_with_retry;
use crate::bot::{BotType, ChatBackend, ChatRequest};
use crate::config::AnthropicConfig;
use crate::error::BotError;
use crate::message::Role;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Used when MAX_OUTPUT_TOKENS is unset; the messages API requires the field.
const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

pub struct ClaudeBot {
    config: AnthropicConfig,
    max_tokens: u32,
    http: reqwest::Client,
}

impl ClaudeBot {
    pub fn new(config: AnthropicConfig, max_tokens: Option<u32>) -> Self {
        Self {
            config,
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatBackend for ClaudeBot {
    fn bot_type(&self) -> BotType {
        BotType::Claude
    }

    fn keeps_history(&self) -> bool {
        true
    }

    async fn chat(&self, req: ChatRequest<'_>) -> Result<String, BotError> {
        let mut messages: Vec<ApiMessage> = req
            .history
            .iter()
            .map(|turn| ApiMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: turn.joined_text(),
            })
            .collect();
        messages.push(ApiMessage {
            role: "user",
            content: req.text.to_string(),
        });

        let body = ApiRequest {
            model: req
                .model_override
                .unwrap_or(&self.config.model)
                .to_string(),
            max_tokens: self.max_tokens,
            system: req.system_prompt.map(str::to_string),
            messages,
        };

        let response = send_with_retry(|| {
            self.http
                .post(API_URL)
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::Upstream(format!("{status}: {body}")));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| BotError::Upstream(format!("bad response: {e}")))?;

        parsed
            .content
            .first()
            .map(|c| c.text.clone())
            .ok_or_else(|| BotError::Upstream("empty response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let body = ApiRequest {
            model: "claude-haiku-4-5-20251001".to_string(),
            max_tokens: 1024,
            system: Some("be helpful".to_string()),
            messages: vec![ApiMessage { role: "user", content: "hi".to_string() }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_tokens"], 1024);
        assert_eq!(json["system"], "be helpful");
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_system_omitted_when_absent() {
        let body = ApiRequest {
            model: "m".to_string(),
            max_tokens: 1024,
            system: None,
            messages: vec![],
        };
        assert!(!serde_json::to_string(&body).unwrap().contains("system"));
    }

    #[test]
    fn test_response_parse() {
        let raw = r#"{"content":[{"type":"text","text":"hello"}]}"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content[0].text, "hello");
    }
}
