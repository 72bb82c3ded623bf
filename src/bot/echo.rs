//! Echo backend: replies with the input unchanged.

use async_trait::async_trait;

use crate::bot::{BotType, ChatBackend, ChatRequest};
use crate::error::BotError;
use crate::message::Inbound;

pub struct EchoBot;

#[async_trait]
impl ChatBackend for EchoBot {
    fn bot_type(&self) -> BotType {
        BotType::Echo
    }

    async fn chat(&self, req: ChatRequest<'_>) -> Result<String, BotError> {
        Ok(req.text.to_string())
    }

    async fn handle_media(&self, _msg: &Inbound) -> Result<String, BotError> {
        Ok("Unsupported message type.".to_string())
    }
}
