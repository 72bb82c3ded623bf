//! OpenAI-compatible chat backend.
//!
//! Works against any endpoint speaking the chat-completions wire format;
//! the base URL is configurable for proxies and compatible providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bot::retry::send_with_retry;
use crate::bot::{BotType, ChatBackend, ChatRequest};
use crate::config::OpenAiConfig;
use crate::error::BotError;
use crate::message::Role;

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

pub struct OpenAiBot {
    config: OpenAiConfig,
    max_tokens: Option<u32>,
    http: reqwest::Client,
}

impl OpenAiBot {
    pub fn new(config: OpenAiConfig, max_tokens: Option<u32>) -> Self {
        Self {
            config,
            max_tokens,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiBot {
    fn bot_type(&self) -> BotType {
        BotType::Gpt
    }

    fn keeps_history(&self) -> bool {
        true
    }

    async fn chat(&self, req: ChatRequest<'_>) -> Result<String, BotError> {
        let mut messages = Vec::with_capacity(req.history.len() + 2);
        if let Some(prompt) = req.system_prompt {
            messages.push(ApiMessage {
                role: "system",
                content: prompt.to_string(),
            });
        }
        for turn in req.history {
            messages.push(ApiMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: turn.joined_text(),
            });
        }
        messages.push(ApiMessage {
            role: "user",
            content: req.text.to_string(),
        });

        let body = ApiRequest {
            model: req
                .model_override
                .unwrap_or(&self.config.model)
                .to_string(),
            messages,
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url);
        let response = send_with_retry(|| {
            self.http
                .post(&url)
                .bearer_auth(&self.config.api_key)
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
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| BotError::Upstream("empty response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Turn;

    fn bot() -> OpenAiBot {
        OpenAiBot::new(
            OpenAiConfig {
                api_key: "sk-test".to_string(),
                base_url: "http://localhost".to_string(),
                model: "gpt-4o-mini".to_string(),
            },
            Some(256),
        )
    }

    #[test]
    fn test_request_wire_shape() {
        let body = ApiRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![
                ApiMessage { role: "system", content: "be terse".to_string() },
                ApiMessage { role: "user", content: "hi".to_string() },
            ],
            max_tokens: Some(256),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["max_tokens"], 256);
    }

    #[test]
    fn test_max_tokens_omitted_when_unset() {
        let body = ApiRequest {
            model: "m".to_string(),
            messages: vec![],
            max_tokens: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("max_tokens"));
    }

    #[test]
    fn test_history_flattens_to_text() {
        // Image parts never reach the wire for this backend.
        let turn = Turn::user(vec![
            crate::message::ContentPart::image("http://x/p.jpg", None),
            crate::message::ContentPart::text("what is this?"),
        ]);
        assert_eq!(turn.joined_text(), "what is this?");
        let _ = bot();
    }
}
