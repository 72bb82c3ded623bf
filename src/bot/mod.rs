//! Pluggable chat backends and the registry that owns them.
//!
//! Adding a backend means implementing [`ChatBackend`], adding a [`BotType`]
//! variant, and registering the instance; the router's branching never grows.

pub mod claude;
pub mod echo;
pub mod gemini;
pub mod image;
pub mod keyword;
pub mod openai;
pub mod retry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::BotError;
use crate::message::{Inbound, Turn};
use crate::platform::MediaFetcher;
use crate::store::UserStore;

pub use claude::ClaudeBot;
pub use echo::EchoBot;
pub use gemini::GeminiBot;
pub use image::ImageBot;
pub use keyword::KeywordBot;
pub use openai::OpenAiBot;

/// The closed set of backend identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BotType {
    Echo,
    Gpt,
    Claude,
    Gemini,
    Keyword,
    Image,
}

impl BotType {
    pub const ALL: [BotType; 6] = [
        BotType::Echo,
        BotType::Gpt,
        BotType::Claude,
        BotType::Gemini,
        BotType::Keyword,
        BotType::Image,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BotType::Echo => "echo",
            BotType::Gpt => "gpt",
            BotType::Claude => "claude",
            BotType::Gemini => "gemini",
            BotType::Keyword => "keyword",
            BotType::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.as_str() == s)
    }

    /// Whether the backend honors a per-user system prompt.
    pub fn supports_prompt(&self) -> bool {
        matches!(self, BotType::Gpt | BotType::Claude)
    }

    /// The slash command that switches to this backend.
    pub fn switch_command(&self) -> String {
        format!("/{}", self.as_str())
    }
}

impl fmt::Display for BotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a backend needs for one chat invocation. The router assembles
/// all store reads; backends stay stateless API clients.
pub struct ChatRequest<'a> {
    pub user_id: &'a str,
    pub text: &'a str,
    /// Platform-hosted image URL when this is a multimodal request.
    pub image_url: Option<&'a str>,
    /// Prior turns, oldest first. Empty for history-less backends.
    pub history: &'a [Turn],
    pub system_prompt: Option<&'a str>,
    pub model_override: Option<&'a str>,
}

/// The two-operation backend contract, plus capability flags the router
/// branches on.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn bot_type(&self) -> BotType;

    /// Accepts mixed text+image input.
    fn multimodal(&self) -> bool {
        false
    }

    /// Can process raw media (voice) downloaded from the platform.
    fn media_capable(&self) -> bool {
        false
    }

    /// Conversation turns should be persisted for this backend.
    fn keeps_history(&self) -> bool {
        false
    }

    async fn chat(&self, req: ChatRequest<'_>) -> Result<String, BotError>;

    /// Handle a non-text message directly (image link echo, voice
    /// understanding, ...). Default: the backend only accepts text.
    async fn handle_media(&self, _msg: &Inbound) -> Result<String, BotError> {
        Err(BotError::Unsupported {
            bot: self.bot_type(),
        })
    }
}

/// Maps bot-type identifiers to constructed backend instances.
pub struct Registry {
    backends: HashMap<BotType, Arc<dyn ChatBackend>>,
    default_bot: BotType,
}

impl Registry {
    pub fn new(default_bot: BotType) -> Self {
        Self {
            backends: HashMap::new(),
            default_bot,
        }
    }

    /// Build the registry from config: echo, image and keyword are always
    /// available; hosted-model backends only when their keys are configured.
    pub fn from_config(
        config: &Config,
        store: &UserStore,
        media: Option<Arc<dyn MediaFetcher>>,
    ) -> Self {
        let mut registry = Self::new(config.default_bot);
        registry.register(Arc::new(EchoBot));
        registry.register(Arc::new(ImageBot));

        let movie = config
            .tmdb_api_key
            .clone()
            .map(crate::client::MovieClient::new);
        registry.register(Arc::new(KeywordBot::new(
            store.clone(),
            config.keyword_match_mode,
            config.keyword_fallback.clone(),
            movie,
        )));

        if let Some(ref openai) = config.openai {
            registry.register(Arc::new(OpenAiBot::new(
                openai.clone(),
                config.max_output_tokens,
            )));
        }
        if let Some(ref anthropic) = config.anthropic {
            registry.register(Arc::new(ClaudeBot::new(
                anthropic.clone(),
                config.max_output_tokens,
            )));
        }
        if let Some(ref gemini) = config.gemini {
            registry.register(Arc::new(GeminiBot::new(
                gemini.clone(),
                config.max_output_tokens,
                media,
            )));
        }

        registry
    }

    pub fn register(&mut self, backend: Arc<dyn ChatBackend>) {
        self.backends.insert(backend.bot_type(), backend);
    }

    pub fn contains(&self, bot: BotType) -> bool {
        self.backends.contains_key(&bot)
    }

    pub fn get(&self, bot: BotType) -> Option<Arc<dyn ChatBackend>> {
        self.backends.get(&bot).cloned()
    }

    /// Resolve a selection to a concrete backend: the requested type if
    /// registered, else the configured default, else echo.
    pub fn resolve(&self, requested: Option<BotType>) -> Option<(BotType, Arc<dyn ChatBackend>)> {
        for bot in [requested, Some(self.default_bot), Some(BotType::Echo)]
            .into_iter()
            .flatten()
        {
            if let Some(backend) = self.get(bot) {
                return Some((bot, backend));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_type_parse_round_trip() {
        for bot in BotType::ALL {
            assert_eq!(BotType::parse(bot.as_str()), Some(bot));
        }
        assert_eq!(BotType::parse("skynet"), None);
        assert_eq!(BotType::parse("GPT"), None);
    }

    #[test]
    fn test_prompt_support() {
        assert!(BotType::Gpt.supports_prompt());
        assert!(BotType::Claude.supports_prompt());
        assert!(!BotType::Gemini.supports_prompt());
        assert!(!BotType::Keyword.supports_prompt());
    }

    #[test]
    fn test_registry_resolution_falls_back() {
        let mut registry = Registry::new(BotType::Gpt);
        registry.register(Arc::new(EchoBot));

        // Requested and default are both unregistered: echo wins.
        let (bot, _) = registry.resolve(Some(BotType::Gemini)).unwrap();
        assert_eq!(bot, BotType::Echo);

        // No selection: default is unregistered, echo wins.
        let (bot, _) = registry.resolve(None).unwrap();
        assert_eq!(bot, BotType::Echo);
    }

    #[test]
    fn test_registry_prefers_requested() {
        let mut registry = Registry::new(BotType::Echo);
        registry.register(Arc::new(EchoBot));
        registry.register(Arc::new(ImageBot));

        let (bot, _) = registry.resolve(Some(BotType::Image)).unwrap();
        assert_eq!(bot, BotType::Image);
    }
}
