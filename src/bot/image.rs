//! Image-hosting backend: replies to images with a hosting link.

use async_trait::async_trait;

use crate::bot::{BotType, ChatBackend, ChatRequest};
use crate::error::BotError;
use crate::message::{Inbound, MsgKind};

pub struct ImageBot;

#[async_trait]
impl ChatBackend for ImageBot {
    fn bot_type(&self) -> BotType {
        BotType::Image
    }

    async fn chat(&self, _req: ChatRequest<'_>) -> Result<String, BotError> {
        Ok("Send me an image and I'll reply with a hosting link.".to_string())
    }

    async fn handle_media(&self, msg: &Inbound) -> Result<String, BotError> {
        match (msg.kind, msg.pic_url.as_deref()) {
            (MsgKind::Image, Some(url)) => Ok(format!("Image hosted at:\n{url}")),
            _ => Ok("Send me an image and I'll reply with a hosting link.".to_string()),
        }
    }
}
